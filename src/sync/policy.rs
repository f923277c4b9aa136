//! Change-driven recomputation policy.
//!
//! The caller diffs the previous and proposed record into a [`DirtyFields`]
//! set; [`apply_recomputation`] then decides which derived values to rebuild
//! and rebuilds them in place. Nothing here touches storage.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::db::Panorama;
use crate::geo::project;
use crate::metadata::CaptureMetadata;

/// Mutable panorama fields tracked for change detection.
///
/// UTM fields are absent on purpose: they are only ever derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PanoramaField {
    RawImage,
    SequenceId,
    Longitude,
    Latitude,
    Elevation,
    Heading,
    Pitch,
    Roll,
    FieldOfView,
    CameraMake,
    CameraModel,
    CaptureTime,
    Address,
    Note,
}

/// Set of fields whose proposed value differs from the persisted one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyFields(BTreeSet<PanoramaField>);

impl DirtyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: PanoramaField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: PanoramaField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PanoramaField> + '_ {
        self.0.iter().copied()
    }

    /// Diff two versions of a record.
    ///
    /// With no previous version every populated field counts as dirty. The
    /// image counts as changed when its digest differs.
    pub fn between(previous: Option<&Panorama>, next: &Panorama) -> Self {
        let blank = Panorama::default();
        let prev = previous.unwrap_or(&blank);
        let mut dirty = Self::new();

        let mut check = |changed: bool, field: PanoramaField| {
            if changed {
                dirty.insert(field);
            }
        };

        check(prev.image_digest != next.image_digest, PanoramaField::RawImage);
        check(prev.sequence_id != next.sequence_id, PanoramaField::SequenceId);
        check(prev.longitude != next.longitude, PanoramaField::Longitude);
        check(prev.latitude != next.latitude, PanoramaField::Latitude);
        check(prev.elevation != next.elevation, PanoramaField::Elevation);
        check(prev.heading != next.heading, PanoramaField::Heading);
        check(prev.pitch != next.pitch, PanoramaField::Pitch);
        check(prev.roll != next.roll, PanoramaField::Roll);
        check(prev.field_of_view != next.field_of_view, PanoramaField::FieldOfView);
        check(prev.camera_make != next.camera_make, PanoramaField::CameraMake);
        check(prev.camera_model != next.camera_model, PanoramaField::CameraModel);
        check(prev.capture_time != next.capture_time, PanoramaField::CaptureTime);
        check(prev.address != next.address, PanoramaField::Address);
        check(prev.note != next.note, PanoramaField::Note);

        dirty
    }
}

impl FromIterator<PanoramaField> for DirtyFields {
    fn from_iter<I: IntoIterator<Item = PanoramaField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What [`apply_recomputation`] did to the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeOutcome {
    /// Capture metadata was re-extracted from the image.
    pub extracted: bool,
    /// UTM fields were recomputed.
    pub projected: bool,
    /// Position was dropped because it was partial or unprojectable.
    pub position_cleared: bool,
    /// A direct heading edit should be written back into the image.
    pub write_back_heading: bool,
}

/// Rebuild derived fields of `record` according to `dirty`.
///
/// `extract` is only invoked when the raw image changed; its result replaces
/// every metadata-derived field, nulls included.
pub fn apply_recomputation<F>(record: &mut Panorama, dirty: &DirtyFields, extract: F) -> RecomputeOutcome
where
    F: FnOnce() -> CaptureMetadata,
{
    let mut outcome = RecomputeOutcome::default();

    if dirty.contains(PanoramaField::RawImage) {
        let meta = extract();
        record.latitude = meta.latitude;
        record.longitude = meta.longitude;
        record.elevation = meta.altitude;
        record.heading = meta.heading;
        record.pitch = meta.pitch;
        record.roll = meta.roll;
        record.field_of_view = meta.field_of_view;
        record.camera_make = meta.camera_make;
        record.camera_model = meta.camera_model;
        record.capture_time = meta.capture_time;
        outcome.extracted = true;
    }

    let position_changed = outcome.extracted
        || dirty.contains(PanoramaField::Longitude)
        || dirty.contains(PanoramaField::Latitude);

    if position_changed {
        match (record.longitude, record.latitude) {
            (Some(lon), Some(lat)) => match project(lon, lat) {
                Ok(projection) => {
                    if !projection.within_standard_coverage {
                        warn!(
                            panorama_id = ?record.id,
                            latitude = lat,
                            "Position lies outside standard UTM coverage"
                        );
                    }
                    record.apply_projection(&projection);
                    outcome.projected = true;
                }
                Err(e) => {
                    warn!(panorama_id = ?record.id, error = %e, "Dropping unprojectable position");
                    record.clear_position();
                    outcome.position_cleared = true;
                }
            },
            (None, None) => record.clear_projection(),
            _ => {
                warn!(panorama_id = ?record.id, "Dropping partial position");
                record.clear_position();
                outcome.position_cleared = true;
            }
        }
    }

    outcome.write_back_heading = dirty.contains(PanoramaField::Heading)
        && !outcome.extracted
        && record.heading.is_some();

    debug!(panorama_id = ?record.id, ?outcome, "Recomputation applied");
    outcome
}
