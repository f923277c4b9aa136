//! Ingestion and synchronization engine.
//!
//! Entry points run the whole chain explicitly and in order: metadata
//! extraction, projection, persistence, then aggregation of every affected
//! sequence. There are no save hooks.
//!
//! Every request commits as one store transaction while holding the locks
//! of the sequences it touches. A request that fails leaves both the
//! panorama rows and the sequence geometries as they were.

pub mod aggregate;
pub mod policy;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use tracing::{debug, info, warn};

pub use aggregate::{aggregate_sequence, build_sequence_geometry, SequenceLocks};
pub use policy::{apply_recomputation, DirtyFields, PanoramaField, RecomputeOutcome};

use crate::config::IngestConfig;
use crate::db::{AtomicStore, Panorama, PanoramaStore, Sequence};
use crate::geo::MultiPoint;
use crate::metadata::{extract_capture_metadata, write_heading_tag, CaptureMetadata, MetadataDecoder};

/// Lowercase hex SHA-256 of an image payload.
pub fn image_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub struct Engine<S> {
    store: S,
    decoder: Box<dyn MetadataDecoder>,
    locks: SequenceLocks,
    settings: IngestConfig,
}

impl<S: AtomicStore> Engine<S> {
    pub fn new<D>(store: S, decoder: D, settings: IngestConfig) -> Self
    where
        D: MetadataDecoder + 'static,
    {
        Self {
            store,
            decoder: Box::new(decoder),
            locks: SequenceLocks::new(),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_sequence(&self, shooting_date: NaiveDate, note: Option<&str>) -> Result<i64> {
        let id = self
            .store
            .atomically(|tx| tx.create_sequence(shooting_date, note))?;
        info!(sequence_id = id, "Sequence created");
        Ok(id)
    }

    pub fn load_panorama(&self, id: i64) -> Result<Option<Panorama>> {
        self.store.atomically(|tx| tx.load_panorama(id))
    }

    pub fn load_sequence(&self, id: i64) -> Result<Option<Sequence>> {
        self.store.atomically(|tx| tx.load_sequence(id))
    }

    /// Members of a sequence in capture order.
    pub fn list_panoramas(&self, sequence_id: i64) -> Result<Vec<Panorama>> {
        self.store
            .atomically(|tx| tx.list_panoramas_by_sequence(sequence_id, None))
    }

    pub fn load_image(&self, panorama_id: i64) -> Result<Option<Vec<u8>>> {
        self.store.atomically(|tx| tx.load_image(panorama_id))
    }

    /// Persist a created or edited panorama and rebuild everything derived
    /// from it.
    ///
    /// `dirty` lists the fields that changed since the record was loaded.
    /// When it contains [`PanoramaField::RawImage`], `raw_image` (or the
    /// stored image, if none is given) is decoded and becomes the
    /// authoritative source of capture metadata.
    ///
    /// The record, its image and the geometry of every affected sequence
    /// are written in one transaction.
    pub fn ingest_or_update_panorama(
        &self,
        mut record: Panorama,
        dirty: &DirtyFields,
        raw_image: Option<&[u8]>,
    ) -> Result<Panorama> {
        let image_changed = dirty.contains(PanoramaField::RawImage);

        let image: Option<Cow<'_, [u8]>> = match (image_changed, raw_image) {
            (true, Some(bytes)) => Some(Cow::Borrowed(bytes)),
            (true, None) => self.stored_image(record.id)?.map(Cow::Owned),
            (false, Some(_)) => {
                debug!(panorama_id = ?record.id, "Image payload supplied but not marked changed; ignoring");
                None
            }
            (false, None) => None,
        };
        if let Some(bytes) = image.as_deref() {
            record.image_digest = Some(image_digest(bytes));
        }

        // A move between sequences must also refresh the sequence left behind
        let previous_sequence = match (dirty.contains(PanoramaField::SequenceId), record.id) {
            (true, Some(id)) => self.load_panorama(id)?.and_then(|p| p.sequence_id),
            _ => None,
        };

        let panorama_id = record.id;
        let outcome = apply_recomputation(&mut record, dirty, || match image.as_deref() {
            Some(bytes) => self.extract(panorama_id, bytes),
            None => {
                warn!(panorama_id = ?panorama_id, "Image marked changed but no payload available");
                CaptureMetadata::default()
            }
        });

        let mut affected: Vec<i64> = Vec::new();
        for sequence_id in previous_sequence.into_iter().chain(record.sequence_id) {
            if !affected.contains(&sequence_id) {
                affected.push(sequence_id);
            }
        }

        let saved = self.locks.with_locks(&affected, || {
            self.store.atomically(|tx| {
                let saved = tx.save_panorama(&record).context("Failed to save panorama")?;
                let id = saved.id.context("Store returned a panorama without id")?;

                if let (true, Some(bytes)) = (image_changed, raw_image) {
                    tx.save_image(id, bytes).context("Failed to store image")?;
                }

                if outcome.write_back_heading && self.settings.write_heading_to_image {
                    if let Some(heading) = saved.heading {
                        write_back_heading(tx, id, heading);
                    }
                }

                for &sequence_id in &affected {
                    aggregate_sequence(tx, sequence_id, None)?;
                }
                Ok(saved)
            })
        })?;

        info!(
            panorama_id = ?saved.id,
            sequence_id = ?saved.sequence_id,
            extracted = outcome.extracted,
            projected = outcome.projected,
            resynced = affected.len(),
            "Panorama saved"
        );
        Ok(saved)
    }

    /// Diff `record` against its stored version and run
    /// [`Engine::ingest_or_update_panorama`] with the result.
    pub fn save_panorama_changes(&self, mut record: Panorama, raw_image: Option<&[u8]>) -> Result<Panorama> {
        let previous = match record.id {
            Some(id) => Some(
                self.load_panorama(id)?
                    .with_context(|| format!("Panorama {} not found", id))?,
            ),
            None => None,
        };

        if let Some(bytes) = raw_image {
            record.image_digest = Some(image_digest(bytes));
        }

        let dirty = DirtyFields::between(previous.as_ref(), &record);
        self.ingest_or_update_panorama(record, &dirty, raw_image)
    }

    /// Rebuild a sequence's geometry without the panorama being deleted.
    pub fn on_panorama_deleted(&self, sequence_id: i64, deleted_panorama_id: i64) -> Result<MultiPoint> {
        self.locks.with_lock(sequence_id, || {
            self.store.atomically(|tx| {
                aggregate_sequence(tx, sequence_id, Some(deleted_panorama_id))
            })
        })
    }

    /// Delete a panorama and refresh its sequence in the same transaction.
    /// Returns false when no such panorama exists.
    pub fn delete_panorama(&self, id: i64) -> Result<bool> {
        let Some(pano) = self.load_panorama(id)? else {
            return Ok(false);
        };
        let locked: Vec<i64> = pano.sequence_id.into_iter().collect();

        let deleted = self.locks.with_locks(&locked, || {
            self.store.atomically(|tx| {
                let Some(current) = tx.load_panorama(id)? else {
                    return Ok(false);
                };
                if let Some(sequence_id) = current.sequence_id {
                    aggregate_sequence(tx, sequence_id, Some(id))?;
                }
                tx.delete_panorama(id)
            })
        })?;

        if deleted {
            info!(panorama_id = id, sequence_id = ?pano.sequence_id, "Panorama deleted");
        }
        Ok(deleted)
    }

    /// Rebuild a sequence's geometry from its current members.
    pub fn resync_sequence(&self, sequence_id: i64) -> Result<MultiPoint> {
        self.locks.with_lock(sequence_id, || {
            self.store
                .atomically(|tx| aggregate_sequence(tx, sequence_id, None))
        })
    }

    fn stored_image(&self, id: Option<i64>) -> Result<Option<Vec<u8>>> {
        match id {
            Some(id) => self.load_image(id),
            None => Ok(None),
        }
    }

    fn extract(&self, panorama_id: Option<i64>, bytes: &[u8]) -> CaptureMetadata {
        match self.decoder.decode_metadata(bytes) {
            Ok(tags) => extract_capture_metadata(&tags),
            Err(e) => {
                warn!(panorama_id = ?panorama_id, error = %e, "Unreadable image metadata");
                CaptureMetadata::default()
            }
        }
    }
}

/// Rewrite the stored image's heading tag.
///
/// Best effort; failures are logged and never block the save.
fn write_back_heading(tx: &dyn PanoramaStore, id: i64, heading: f64) {
    let result = tx.load_image(id).and_then(|image| match image {
        Some(image) => {
            let updated = write_heading_tag(&image, heading)?;
            tx.save_image(id, &updated)
        }
        None => {
            debug!(panorama_id = id, "No stored image to write heading into");
            Ok(())
        }
    });
    if let Err(e) = result {
        warn!(panorama_id = id, error = %e, "Failed to write heading into image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::geo::{geometry_to_wkt, Point};
    use crate::metadata::decode::tests::{ascii, field, jpeg_with_fields, rationals};
    use crate::metadata::{tags, ExifDecoder, Ratio, TagMap, TagValue};
    use chrono::NaiveDateTime;
    use exif::Tag;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Decoder returning prepared tag maps keyed by payload.
    #[derive(Default)]
    struct FakeDecoder {
        payloads: HashMap<Vec<u8>, TagMap>,
    }

    impl MetadataDecoder for FakeDecoder {
        fn decode_metadata(&self, raw_image: &[u8]) -> Result<TagMap> {
            self.payloads
                .get(raw_image)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown payload"))
        }
    }

    fn geotag(lon: f64, lat: f64, time: &str) -> TagMap {
        let to_dms = |v: f64| {
            TagValue::Ratios(vec![Ratio::new((v.abs() * 1_000_000.0).round() as i64, 1_000_000), Ratio::new(0, 1), Ratio::new(0, 1)])
        };
        let mut map = TagMap::new();
        map.insert(tags::GPS_LATITUDE.into(), to_dms(lat));
        map.insert(tags::GPS_LATITUDE_REF.into(), TagValue::Text(if lat < 0.0 { "S" } else { "N" }.into()));
        map.insert(tags::GPS_LONGITUDE.into(), to_dms(lon));
        map.insert(tags::GPS_LONGITUDE_REF.into(), TagValue::Text(if lon < 0.0 { "W" } else { "E" }.into()));
        map.insert(tags::DATE_TIME_DIGITIZED.into(), TagValue::Text(time.into()));
        map
    }

    fn engine(decoder: FakeDecoder) -> Engine<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        Engine::new(store, decoder, IngestConfig::default())
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 7, 14).unwrap()
    }

    fn geometry<S: AtomicStore>(engine: &Engine<S>, seq: i64) -> MultiPoint {
        engine.load_sequence(seq).unwrap().unwrap().geometry
    }

    fn three_panorama_engine() -> (Engine<SqliteStore>, i64, [i64; 3]) {
        let mut decoder = FakeDecoder::default();
        decoder.payloads.insert(b"a".to_vec(), geotag(1.0, 1.0, "2019:07:14 10:00:00"));
        decoder.payloads.insert(b"b".to_vec(), geotag(2.0, 2.0, "2019:07:14 10:00:05"));
        decoder.payloads.insert(b"c".to_vec(), geotag(3.0, 3.0, "2019:07:14 10:00:10"));
        let engine = engine(decoder);
        let seq = engine.create_sequence(day(), None).unwrap();

        // Uploaded out of order; capture time decides the trajectory order
        let mut ids = [0; 3];
        for (slot, payload) in [(2, b"c"), (0, b"a"), (1, b"b")] {
            let saved = engine
                .save_panorama_changes(Panorama::new(seq), Some(payload.as_slice()))
                .unwrap();
            ids[slot] = saved.id.unwrap();
        }
        (engine, seq, ids)
    }

    #[test]
    fn test_upload_extracts_projects_and_aggregates() {
        let mut decoder = FakeDecoder::default();
        decoder.payloads.insert(b"rome".to_vec(), geotag(12.5, 41.9, "2019:07:14 10:31:07"));
        let engine = engine(decoder);
        let seq = engine.create_sequence(day(), Some("rome")).unwrap();

        let saved = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"rome".as_slice()))
            .unwrap();

        assert!((saved.latitude.unwrap() - 41.9).abs() < 1e-6);
        assert!((saved.longitude.unwrap() - 12.5).abs() < 1e-6);
        assert_eq!(saved.utm_srid, Some(32633));
        assert_eq!(saved.utm_zone_code.as_deref(), Some("33T"));
        assert!(saved.has_projection());
        assert_eq!(
            saved.capture_time,
            NaiveDateTime::parse_from_str("2019-07-14T10:31:07", "%Y-%m-%dT%H:%M:%S").ok()
        );
        assert_eq!(saved.image_digest, Some(image_digest(b"rome")));

        let id = saved.id.unwrap();
        assert_eq!(engine.store().load_panorama(id).unwrap(), Some(saved.clone()));
        assert_eq!(engine.store().load_image(id).unwrap(), Some(b"rome".to_vec()));
        assert_eq!(geometry(&engine, seq).0, vec![saved.geom_point().unwrap()]);
    }

    #[test]
    fn test_unreadable_metadata_still_saves() {
        let engine = engine(FakeDecoder::default());
        let seq = engine.create_sequence(day(), None).unwrap();

        let saved = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"corrupt".as_slice()))
            .unwrap();

        assert!(saved.id.is_some());
        assert_eq!(saved.geom_point(), None);
        assert!(!saved.has_projection());
        assert!(geometry(&engine, seq).0.is_empty());
    }

    #[test]
    fn test_deleting_middle_panorama() {
        let (engine, seq, [a, b, c]) = three_panorama_engine();
        let points = |ids: &[i64]| -> Vec<Point> {
            ids.iter()
                .map(|&id| engine.store().load_panorama(id).unwrap().unwrap().geom_point().unwrap())
                .collect()
        };
        assert_eq!(geometry(&engine, seq).0, points(&[a, b, c]));

        let expected = points(&[a, c]);
        assert!(engine.delete_panorama(b).unwrap());
        assert_eq!(geometry(&engine, seq).0, expected);
        assert_eq!(engine.store().load_panorama(b).unwrap(), None);

        assert!(!engine.delete_panorama(b).unwrap());
    }

    #[test]
    fn test_on_panorama_deleted_excludes_row_still_present() {
        let (engine, seq, [a, b, c]) = three_panorama_engine();

        let geom = engine.on_panorama_deleted(seq, b).unwrap();

        // The row is still stored, yet it no longer contributes
        assert!(engine.store().load_panorama(b).unwrap().is_some());
        assert_eq!(geom.0.len(), 2);
        let a_point = engine.store().load_panorama(a).unwrap().unwrap().geom_point();
        let c_point = engine.store().load_panorama(c).unwrap().unwrap().geom_point();
        assert_eq!(Some(geom.0[0]), a_point);
        assert_eq!(Some(geom.0[1]), c_point);
    }

    #[test]
    fn test_resync_is_idempotent() {
        let (engine, seq, _) = three_panorama_engine();
        let first = geometry_to_wkt(&engine.resync_sequence(seq).unwrap());
        let second = geometry_to_wkt(&engine.resync_sequence(seq).unwrap());
        assert_eq!(first, second);
        assert_eq!(geometry_to_wkt(&geometry(&engine, seq)), first);
    }

    #[test]
    fn test_coordinate_edit_reprojects_and_updates_geometry() {
        let (engine, seq, [a, _, _]) = three_panorama_engine();
        let mut pano = engine.store().load_panorama(a).unwrap().unwrap();
        pano.longitude = Some(-58.4);
        pano.latitude = Some(-34.6);

        let saved = engine.save_panorama_changes(pano, None).unwrap();

        assert_eq!(saved.utm_srid, Some(32721));
        assert_eq!(geometry(&engine, seq).0[0], Point::new(-58.4, -34.6));
    }

    #[test]
    fn test_same_image_reupload_keeps_manual_edits() {
        let (engine, _, [a, _, _]) = three_panorama_engine();
        let mut pano = engine.store().load_panorama(a).unwrap().unwrap();
        pano.pitch = Some(1.5);
        let pano = engine.save_panorama_changes(pano, None).unwrap();

        let saved = engine.save_panorama_changes(pano, Some(b"a".as_slice())).unwrap();
        assert_eq!(saved.pitch, Some(1.5));
    }

    #[test]
    fn test_moving_panorama_refreshes_both_sequences() {
        let (engine, seq, [a, b, c]) = three_panorama_engine();
        let other = engine.create_sequence(day(), None).unwrap();

        let mut pano = engine.store().load_panorama(b).unwrap().unwrap();
        pano.sequence_id = Some(other);
        let moved = engine.save_panorama_changes(pano, None).unwrap();

        assert_eq!(geometry(&engine, other).0, vec![moved.geom_point().unwrap()]);
        let remaining: Vec<_> = [a, c]
            .iter()
            .map(|&id| engine.store().load_panorama(id).unwrap().unwrap().geom_point().unwrap())
            .collect();
        assert_eq!(geometry(&engine, seq).0, remaining);
    }

    #[test]
    fn test_missing_sequence_fails_the_update() {
        let engine = engine(FakeDecoder::default());
        let mut pano = Panorama::new(1);
        pano.sequence_id = None;
        let saved = engine.save_panorama_changes(pano, None).unwrap();

        let mut orphan = saved;
        orphan.sequence_id = Some(404);
        assert!(engine.save_panorama_changes(orphan, None).is_err());
    }

    #[test]
    fn test_heading_edit_is_written_into_image() {
        let jpeg = jpeg_with_fields(&[
            field(Tag::GPSLatitudeRef, ascii("N")),
            field(Tag::GPSLatitude, rationals(&[(41, 1), (54, 1), (0, 1)])),
            field(Tag::GPSLongitudeRef, ascii("E")),
            field(Tag::GPSLongitude, rationals(&[(12, 1), (30, 1), (0, 1)])),
        ]);
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        let engine = Engine::new(store, ExifDecoder::default(), IngestConfig::default());
        let seq = engine.create_sequence(day(), None).unwrap();

        let saved = engine
            .save_panorama_changes(Panorama::new(seq), Some(jpeg.as_slice()))
            .unwrap();
        assert_eq!(saved.heading, None);
        assert_eq!(saved.utm_srid, Some(32633));

        let mut edited = saved;
        edited.heading = Some(87.5);
        let edited = engine.save_panorama_changes(edited, None).unwrap();

        let image = engine.store().load_image(edited.id.unwrap()).unwrap().unwrap();
        let meta = extract_capture_metadata(&ExifDecoder::default().decode_metadata(&image).unwrap());
        assert_eq!(meta.heading, Some(87.5));
        assert!(meta.has_position());
    }

    #[test]
    fn test_heading_write_back_failure_is_not_fatal() {
        let engine = engine(FakeDecoder::default());
        let seq = engine.create_sequence(day(), None).unwrap();
        let saved = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"not a jpeg".as_slice()))
            .unwrap();

        let mut edited = saved;
        edited.heading = Some(10.0);
        let edited = engine.save_panorama_changes(edited, None).unwrap();

        assert_eq!(edited.heading, Some(10.0));
        let id = edited.id.unwrap();
        assert_eq!(engine.store().load_image(id).unwrap(), Some(b"not a jpeg".to_vec()));
    }

    /// Failures and delays injected into transactional writes.
    #[derive(Default)]
    struct Faults {
        fail_image_writes: AtomicBool,
        fail_geometry_writes: AtomicBool,
        delete_delay_ms: AtomicU64,
    }

    struct FaultyStore {
        inner: SqliteStore,
        faults: Faults,
    }

    impl AtomicStore for FaultyStore {
        fn atomically<T, F>(&self, f: F) -> Result<T>
        where
            F: FnOnce(&dyn PanoramaStore) -> Result<T>,
        {
            self.inner.atomically(|tx| {
                f(&FaultyView {
                    tx,
                    faults: &self.faults,
                })
            })
        }
    }

    struct FaultyView<'a> {
        tx: &'a dyn PanoramaStore,
        faults: &'a Faults,
    }

    impl PanoramaStore for FaultyView<'_> {
        fn load_panorama(&self, id: i64) -> Result<Option<Panorama>> {
            self.tx.load_panorama(id)
        }

        fn save_panorama(&self, record: &Panorama) -> Result<Panorama> {
            self.tx.save_panorama(record)
        }

        fn delete_panorama(&self, id: i64) -> Result<bool> {
            let delay = self.faults.delete_delay_ms.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(delay));
            self.tx.delete_panorama(id)
        }

        fn list_panoramas_by_sequence(&self, sequence_id: i64, excluding: Option<i64>) -> Result<Vec<Panorama>> {
            self.tx.list_panoramas_by_sequence(sequence_id, excluding)
        }

        fn create_sequence(&self, shooting_date: NaiveDate, note: Option<&str>) -> Result<i64> {
            self.tx.create_sequence(shooting_date, note)
        }

        fn load_sequence(&self, id: i64) -> Result<Option<Sequence>> {
            self.tx.load_sequence(id)
        }

        fn save_sequence_geometry(&self, sequence_id: i64, geometry: &MultiPoint) -> Result<()> {
            if self.faults.fail_geometry_writes.load(Ordering::SeqCst) {
                anyhow::bail!("geometry column locked");
            }
            self.tx.save_sequence_geometry(sequence_id, geometry)
        }

        fn load_image(&self, panorama_id: i64) -> Result<Option<Vec<u8>>> {
            self.tx.load_image(panorama_id)
        }

        fn save_image(&self, panorama_id: i64, data: &[u8]) -> Result<()> {
            if self.faults.fail_image_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.tx.save_image(panorama_id, data)
        }
    }

    fn faulty_engine() -> Engine<FaultyStore> {
        let mut decoder = FakeDecoder::default();
        decoder.payloads.insert(b"a".to_vec(), geotag(1.0, 1.0, "2019:07:14 10:00:00"));
        decoder.payloads.insert(b"b".to_vec(), geotag(2.0, 2.0, "2019:07:14 10:00:05"));
        let inner = SqliteStore::open_in_memory().unwrap();
        inner.initialize().unwrap();
        let store = FaultyStore {
            inner,
            faults: Faults::default(),
        };
        Engine::new(store, decoder, IngestConfig::default())
    }

    #[test]
    fn test_failed_image_write_rolls_back_the_upload() {
        let engine = faulty_engine();
        let seq = engine.create_sequence(day(), None).unwrap();

        engine.store().faults.fail_image_writes.store(true, Ordering::SeqCst);
        assert!(engine
            .save_panorama_changes(Panorama::new(seq), Some(b"a".as_slice()))
            .is_err());
        assert!(engine.list_panoramas(seq).unwrap().is_empty());
        assert!(geometry(&engine, seq).0.is_empty());

        // Retrying the same payload stores it in full
        engine.store().faults.fail_image_writes.store(false, Ordering::SeqCst);
        let saved = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"a".as_slice()))
            .unwrap();
        let id = saved.id.unwrap();
        assert_eq!(engine.load_image(id).unwrap(), Some(b"a".to_vec()));
        assert_eq!(geometry(&engine, seq).0, vec![saved.geom_point().unwrap()]);
    }

    #[test]
    fn test_failed_image_replacement_keeps_previous_digest() {
        let engine = faulty_engine();
        let seq = engine.create_sequence(day(), None).unwrap();
        let original = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"a".as_slice()))
            .unwrap();
        let id = original.id.unwrap();

        engine.store().faults.fail_image_writes.store(true, Ordering::SeqCst);
        assert!(engine
            .save_panorama_changes(original.clone(), Some(b"b".as_slice()))
            .is_err());
        assert_eq!(engine.load_panorama(id).unwrap(), Some(original.clone()));
        assert_eq!(engine.load_image(id).unwrap(), Some(b"a".to_vec()));

        engine.store().faults.fail_image_writes.store(false, Ordering::SeqCst);
        let replaced = engine
            .save_panorama_changes(original, Some(b"b".as_slice()))
            .unwrap();
        assert_eq!(replaced.image_digest, Some(image_digest(b"b")));
        assert_eq!(engine.load_image(id).unwrap(), Some(b"b".to_vec()));
        assert_eq!(geometry(&engine, seq).0, vec![Point::new(2.0, 2.0)]);
    }

    #[test]
    fn test_failed_aggregation_leaves_rows_unchanged() {
        let engine = faulty_engine();
        let seq = engine.create_sequence(day(), None).unwrap();
        let before = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"a".as_slice()))
            .unwrap();
        let id = before.id.unwrap();
        let geometry_before = geometry(&engine, seq);

        engine.store().faults.fail_geometry_writes.store(true, Ordering::SeqCst);
        let mut edit = before.clone();
        edit.longitude = Some(5.0);
        edit.latitude = Some(5.0);
        assert!(engine.save_panorama_changes(edit, None).is_err());
        assert_eq!(engine.load_panorama(id).unwrap(), Some(before));
        assert_eq!(geometry(&engine, seq), geometry_before);

        // A delete that cannot refresh the geometry keeps the row too
        assert!(engine.delete_panorama(id).is_err());
        assert!(engine.load_panorama(id).unwrap().is_some());
        assert_eq!(geometry(&engine, seq), geometry_before);
    }

    #[test]
    fn test_concurrent_edit_cannot_restore_deleted_point() {
        let engine = Arc::new(faulty_engine());
        let seq = engine.create_sequence(day(), None).unwrap();
        let a = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"a".as_slice()))
            .unwrap();
        let b = engine
            .save_panorama_changes(Panorama::new(seq), Some(b"b".as_slice()))
            .unwrap();
        let b_id = b.id.unwrap();

        engine.store().faults.delete_delay_ms.store(300, Ordering::SeqCst);
        let deleter = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.delete_panorama(b_id).unwrap())
        };

        // Edit a sibling while the delete is still in flight
        thread::sleep(Duration::from_millis(50));
        let mut edit = a.clone();
        edit.note = Some("edited".into());
        engine.save_panorama_changes(edit, None).unwrap();

        assert!(deleter.join().unwrap());
        assert_eq!(engine.list_panoramas(seq).unwrap().len(), 1);
        assert_eq!(geometry(&engine, seq).0, vec![a.geom_point().unwrap()]);
    }
}
