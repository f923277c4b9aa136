//! SQLite backend implementation.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::backend::{AtomicStore, PanoramaStore};
use super::schema::SCHEMA;
use super::{Panorama, Sequence, TIMESTAMP_FORMAT};
use crate::geo::{empty_geometry, geometry_from_wkt, geometry_to_wkt, MultiPoint};

const PANORAMA_COLUMNS: &str = r#"
    id, sequence_id, image_digest,
    lon, lat, elevation,
    utm_x, utm_y, utm_code, utm_srid,
    heading, pitch, roll, fov,
    camera_make, camera_model, captured_at,
    address, note
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Run a single operation outside any explicit transaction.
    fn with_view<T>(&self, f: impl FnOnce(&SqliteView<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        f(&SqliteView { conn: &conn })
    }
}

impl AtomicStore for SqliteStore {
    fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn PanoramaStore) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        // Dropping `tx` on the error path rolls everything back
        let result = f(&SqliteView { conn: &*tx })?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(result)
    }
}

impl PanoramaStore for SqliteStore {
    fn load_panorama(&self, id: i64) -> Result<Option<Panorama>> {
        self.with_view(|v| v.load_panorama(id))
    }

    fn save_panorama(&self, record: &Panorama) -> Result<Panorama> {
        self.with_view(|v| v.save_panorama(record))
    }

    fn delete_panorama(&self, id: i64) -> Result<bool> {
        self.with_view(|v| v.delete_panorama(id))
    }

    fn list_panoramas_by_sequence(
        &self,
        sequence_id: i64,
        excluding: Option<i64>,
    ) -> Result<Vec<Panorama>> {
        self.with_view(|v| v.list_panoramas_by_sequence(sequence_id, excluding))
    }

    fn create_sequence(&self, shooting_date: NaiveDate, note: Option<&str>) -> Result<i64> {
        self.with_view(|v| v.create_sequence(shooting_date, note))
    }

    fn load_sequence(&self, id: i64) -> Result<Option<Sequence>> {
        self.with_view(|v| v.load_sequence(id))
    }

    fn save_sequence_geometry(&self, sequence_id: i64, geometry: &MultiPoint) -> Result<()> {
        self.with_view(|v| v.save_sequence_geometry(sequence_id, geometry))
    }

    fn load_image(&self, panorama_id: i64) -> Result<Option<Vec<u8>>> {
        self.with_view(|v| v.load_image(panorama_id))
    }

    fn save_image(&self, panorama_id: i64, data: &[u8]) -> Result<()> {
        self.with_view(|v| v.save_image(panorama_id, data))
    }
}

/// Store operations bound to one connection or open transaction.
struct SqliteView<'c> {
    conn: &'c Connection,
}

fn row_to_panorama(row: &Row<'_>) -> rusqlite::Result<Panorama> {
    let captured_at: Option<String> = row.get(16)?;
    Ok(Panorama {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        image_digest: row.get(2)?,
        longitude: row.get(3)?,
        latitude: row.get(4)?,
        elevation: row.get(5)?,
        utm_easting: row.get(6)?,
        utm_northing: row.get(7)?,
        utm_zone_code: row.get(8)?,
        utm_srid: row.get(9)?,
        heading: row.get(10)?,
        pitch: row.get(11)?,
        roll: row.get(12)?,
        field_of_view: row.get(13)?,
        camera_make: row.get(14)?,
        camera_model: row.get(15)?,
        capture_time: captured_at
            .and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok()),
        address: row.get(17)?,
        note: row.get(18)?,
    })
}

impl PanoramaStore for SqliteView<'_> {
    // ========================================================================
    // Panorama operations
    // ========================================================================

    fn load_panorama(&self, id: i64) -> Result<Option<Panorama>> {
        let conn = self.conn;
        let sql = format!("SELECT {} FROM panoramas WHERE id = ?", PANORAMA_COLUMNS);
        let pano = conn.query_row(&sql, [id], row_to_panorama).optional()?;
        Ok(pano)
    }

    fn save_panorama(&self, record: &Panorama) -> Result<Panorama> {
        let conn = self.conn;
        let captured_at = record
            .capture_time
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string());

        let params = rusqlite::params![
            record.sequence_id,
            record.image_digest,
            record.longitude,
            record.latitude,
            record.elevation,
            record.utm_easting,
            record.utm_northing,
            record.utm_zone_code,
            record.utm_srid,
            record.heading,
            record.pitch,
            record.roll,
            record.field_of_view,
            record.camera_make,
            record.camera_model,
            captured_at,
            record.address,
            record.note,
        ];

        let mut saved = record.clone();
        match record.id {
            None => {
                conn.execute(
                    r#"
                    INSERT INTO panoramas (
                        sequence_id, image_digest,
                        lon, lat, elevation,
                        utm_x, utm_y, utm_code, utm_srid,
                        heading, pitch, roll, fov,
                        camera_make, camera_model, captured_at,
                        address, note
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params,
                )?;
                saved.id = Some(conn.last_insert_rowid());
            }
            Some(id) => {
                let mut values = params.to_vec();
                values.push(&id);
                let updated = conn.execute(
                    r#"
                    UPDATE panoramas SET
                        sequence_id = ?, image_digest = ?,
                        lon = ?, lat = ?, elevation = ?,
                        utm_x = ?, utm_y = ?, utm_code = ?, utm_srid = ?,
                        heading = ?, pitch = ?, roll = ?, fov = ?,
                        camera_make = ?, camera_model = ?, captured_at = ?,
                        address = ?, note = ?,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                    values.as_slice(),
                )?;
                if updated == 0 {
                    bail!("Panorama {} not found", id);
                }
            }
        }

        Ok(saved)
    }

    fn delete_panorama(&self, id: i64) -> Result<bool> {
        let conn = self.conn;
        conn.execute("DELETE FROM panorama_images WHERE panorama_id = ?", [id])?;
        let deleted = conn.execute("DELETE FROM panoramas WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    fn list_panoramas_by_sequence(
        &self,
        sequence_id: i64,
        excluding: Option<i64>,
    ) -> Result<Vec<Panorama>> {
        let conn = self.conn;
        let sql = format!(
            r#"
            SELECT {}
            FROM panoramas
            WHERE sequence_id = ?1 AND (?2 IS NULL OR id != ?2)
            ORDER BY captured_at IS NULL, captured_at, id
            "#,
            PANORAMA_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let panoramas = stmt
            .query_map(rusqlite::params![sequence_id, excluding], row_to_panorama)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(panoramas)
    }

    // ========================================================================
    // Sequence operations
    // ========================================================================

    fn create_sequence(&self, shooting_date: NaiveDate, note: Option<&str>) -> Result<i64> {
        let conn = self.conn;
        conn.execute(
            "INSERT INTO sequences (shooting_date, note, geom) VALUES (?, ?, ?)",
            rusqlite::params![
                shooting_date.format(DATE_FORMAT).to_string(),
                note,
                geometry_to_wkt(&empty_geometry())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_sequence(&self, id: i64) -> Result<Option<Sequence>> {
        let conn = self.conn;
        let row = conn
            .query_row(
                "SELECT id, shooting_date, note, geom FROM sequences WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, shooting_date, note, geom)) = row else {
            return Ok(None);
        };

        Ok(Some(Sequence {
            id,
            shooting_date: NaiveDate::parse_from_str(&shooting_date, DATE_FORMAT)
                .with_context(|| format!("Invalid shooting date for sequence {}", id))?,
            note,
            geometry: geometry_from_wkt(&geom)
                .with_context(|| format!("Invalid geometry for sequence {}", id))?,
        }))
    }

    fn save_sequence_geometry(&self, sequence_id: i64, geometry: &MultiPoint) -> Result<()> {
        let conn = self.conn;
        let updated = conn.execute(
            "UPDATE sequences SET geom = ?, geom_updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            rusqlite::params![geometry_to_wkt(geometry), sequence_id],
        )?;
        if updated == 0 {
            bail!("Sequence {} not found", sequence_id);
        }
        Ok(())
    }

    // ========================================================================
    // Image operations
    // ========================================================================

    fn load_image(&self, panorama_id: i64) -> Result<Option<Vec<u8>>> {
        let conn = self.conn;
        let data = conn
            .query_row(
                "SELECT data FROM panorama_images WHERE panorama_id = ?",
                [panorama_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    }

    fn save_image(&self, panorama_id: i64, data: &[u8]) -> Result<()> {
        let conn = self.conn;
        conn.execute(
            r#"
            INSERT INTO panorama_images (panorama_id, data) VALUES (?, ?)
            ON CONFLICT(panorama_id) DO UPDATE SET data = excluded.data, stored_at = CURRENT_TIMESTAMP
            "#,
            rusqlite::params![panorama_id, data],
        )?;
        Ok(())
    }
}
