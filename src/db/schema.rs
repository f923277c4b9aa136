pub const SCHEMA: &str = r#"
-- Sequences: trajectories owning a derived point-cloud geometry
CREATE TABLE IF NOT EXISTS sequences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shooting_date TEXT NOT NULL,          -- YYYY-MM-DD
    note TEXT,
    geom TEXT NOT NULL DEFAULT 'MULTIPOINT EMPTY',  -- WKT, SRID 4326
    geom_updated_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Panoramas: capture points along a sequence
CREATE TABLE IF NOT EXISTS panoramas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sequence_id INTEGER,
    image_digest TEXT,          -- SHA-256 of the raw payload

    -- WGS84 position
    lon REAL,
    lat REAL,
    elevation REAL,

    -- UTM projection, populated iff lon/lat are
    utm_x REAL,
    utm_y REAL,
    utm_code TEXT,
    utm_srid INTEGER,

    -- Orientation and optics
    heading REAL,
    pitch REAL,
    roll REAL,
    fov REAL,                   -- radians

    camera_make TEXT,
    camera_model TEXT,
    captured_at TEXT,           -- %Y-%m-%dT%H:%M:%S

    address TEXT,
    note TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (sequence_id) REFERENCES sequences(id)
);

CREATE INDEX IF NOT EXISTS idx_panoramas_sequence ON panoramas(sequence_id);
CREATE INDEX IF NOT EXISTS idx_panoramas_captured_at ON panoramas(captured_at);

-- Raw image payloads
CREATE TABLE IF NOT EXISTS panorama_images (
    panorama_id INTEGER PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (panorama_id) REFERENCES panoramas(id) ON DELETE CASCADE
);
"#;
