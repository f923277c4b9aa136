//! Sequence geometry aggregation.
//!
//! A sequence's geometry is always rebuilt from its current membership.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::db::{Panorama, PanoramaStore};
use crate::geo::MultiPoint;

/// Collect the points of `panoramas` in the given order, skipping any
/// without a position.
pub fn build_sequence_geometry(panoramas: &[Panorama]) -> MultiPoint {
    MultiPoint::new(panoramas.iter().filter_map(Panorama::geom_point).collect())
}

/// Recompute and persist the geometry of `sequence_id`.
///
/// `excluding` names a panorama that is being deleted and must not
/// contribute even if the store still returns it.
pub fn aggregate_sequence<S>(store: &S, sequence_id: i64, excluding: Option<i64>) -> Result<MultiPoint>
where
    S: PanoramaStore + ?Sized,
{
    let members: Vec<Panorama> = store
        .list_panoramas_by_sequence(sequence_id, excluding)?
        .into_iter()
        .filter(|p| excluding.is_none() || p.id != excluding)
        .collect();

    let geometry = build_sequence_geometry(&members);
    store.save_sequence_geometry(sequence_id, &geometry)?;

    debug!(
        sequence_id,
        members = members.len(),
        points = geometry.0.len(),
        "Sequence geometry updated"
    );
    Ok(geometry)
}

/// One mutex per sequence, held across an aggregation's read and write.
#[derive(Debug, Default)]
pub struct SequenceLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SequenceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `sequence_id`.
    pub fn with_lock<T>(&self, sequence_id: i64, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.with_locks(&[sequence_id], f)
    }

    /// Run `f` while holding the locks of every sequence in `sequence_ids`.
    ///
    /// Locks are taken in ascending id order so that callers touching
    /// overlapping sets cannot deadlock.
    pub fn with_locks<T>(&self, sequence_ids: &[i64], f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut ids = sequence_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let locks: Vec<Arc<Mutex<()>>> = {
            let mut table = self
                .locks
                .lock()
                .map_err(|_| anyhow!("Sequence lock table poisoned"))?;
            ids.iter()
                .map(|id| Arc::clone(table.entry(*id).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for (id, lock) in ids.iter().zip(&locks) {
            guards.push(
                lock.lock()
                    .map_err(|_| anyhow!("Lock for sequence {} poisoned", id))?,
            );
        }
        f()
    }
}
