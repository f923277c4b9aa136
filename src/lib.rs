//! Geolocation ingestion and synchronization for panoramic image sequences.
//!
//! Panoramas are ingested with their raw image; capture metadata is read
//! from the image's EXIF block, positions are projected into UTM, and each
//! sequence's point-cloud geometry is kept in step with its members.

pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod geo;
pub mod logging;
pub mod metadata;
pub mod sync;

pub use error::GeoError;
pub use sync::Engine;
