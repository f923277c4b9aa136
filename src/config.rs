use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory for log files when journald is unavailable.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Propagate direct heading edits into the image's `GPSImgDirection` tag.
    #[serde(default = "default_write_heading_to_image")]
    pub write_heading_to_image: bool,

    /// File extensions picked up when ingesting a directory.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Names for vendor GPS tags, by tag number, e.g. `GPSPitch = 0xD000`.
    #[serde(default)]
    pub gps_tag_aliases: BTreeMap<String, u16>,
}

fn default_write_heading_to_image() -> bool {
    true
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "tif".to_string(),
        "tiff".to_string(),
    ]
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_heading_to_image: default_write_heading_to_image(),
            image_extensions: default_image_extensions(),
            gps_tag_aliases: BTreeMap::new(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("widesight")
        .join("widesight.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: None,
            ingest: IngestConfig::default(),
        }
    }
}

impl Config {
    /// Load from `WIDESIGHT_CONFIG` if set, otherwise the default location.
    pub fn load() -> Result<Self> {
        match std::env::var_os("WIDESIGHT_CONFIG") {
            Some(path) => Self::load_from(Path::new(&path)),
            None => Self::load_from(&Self::config_path()),
        }
    }

    /// Load from `path`, writing a default config there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("widesight")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.ingest.write_heading_to_image);
        assert!(config.ingest.image_extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "db_path = \"/tmp/ws.db\"\n\n[ingest]\nwrite_heading_to_image = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/ws.db"));
        assert!(!config.ingest.write_heading_to_image);
        assert_eq!(config.ingest.image_extensions, default_image_extensions());
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_gps_tag_aliases_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[ingest.gps_tag_aliases]\nGPSPitch = 53248\nGPSRoll = 53249\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.ingest.gps_tag_aliases.get("GPSPitch"), Some(&0xD000));

        config.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.ingest.gps_tag_aliases, config.ingest.gps_tag_aliases);
    }
}
