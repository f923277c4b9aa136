//! Persistence interface consumed by the sync engine.
//!
//! [`PanoramaStore`] is the set of reads and writes the engine needs;
//! [`AtomicStore`] groups them into units that commit together.
//! [`super::SqliteStore`] is the bundled implementation of both.

use anyhow::Result;
use chrono::NaiveDate;

use super::{Panorama, Sequence};
use crate::geo::MultiPoint;

pub trait PanoramaStore {
    // === Panorama Operations ===

    /// Load a panorama by id
    fn load_panorama(&self, id: i64) -> Result<Option<Panorama>>;

    /// Insert (when `id` is unset) or update a panorama, returning the stored record
    fn save_panorama(&self, record: &Panorama) -> Result<Panorama>;

    /// Remove a panorama and its image. Returns false if it did not exist.
    fn delete_panorama(&self, id: i64) -> Result<bool>;

    /// Panoramas of a sequence ordered by capture time ascending.
    ///
    /// Records without a capture time come last; ties are broken by id.
    fn list_panoramas_by_sequence(
        &self,
        sequence_id: i64,
        excluding: Option<i64>,
    ) -> Result<Vec<Panorama>>;

    // === Sequence Operations ===

    /// Create a sequence with an empty geometry
    fn create_sequence(&self, shooting_date: NaiveDate, note: Option<&str>) -> Result<i64>;

    /// Load a sequence by id
    fn load_sequence(&self, id: i64) -> Result<Option<Sequence>>;

    /// Replace a sequence's geometry
    fn save_sequence_geometry(&self, sequence_id: i64, geometry: &MultiPoint) -> Result<()>;

    // === Image Operations ===

    /// Raw image payload of a panorama
    fn load_image(&self, panorama_id: i64) -> Result<Option<Vec<u8>>>;

    /// Store or replace the raw image payload of a panorama
    fn save_image(&self, panorama_id: i64, data: &[u8]) -> Result<()>;
}

/// A store that can run a group of operations as one transaction.
pub trait AtomicStore: Send + Sync {
    /// Run `f` against a transactional view of the store.
    ///
    /// Every write made through the view is committed when `f` returns
    /// `Ok`, and discarded when it returns `Err`.
    fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn PanoramaStore) -> Result<T>;
}
