use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::database::retry::RetryPolicy;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 300;
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 85;
pub const DEFAULT_PHASH_RESOLUTIONS: [u32; 3] = [600, 800, 1400];
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine a default {what} directory")]
    NoDefaultDirectory { what: &'static str },
}

/// Brightness gate applied to sampled video frames, on a 0..=255 scale.
/// Frames at or below `low` read as black, at or above `high` as white.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrightnessThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for BrightnessThresholds {
    fn default() -> Self {
        Self {
            low: 30.0,
            high: 255.0 - 15.0,
        }
    }
}

impl BrightnessThresholds {
    pub fn accepts(&self, brightness: f64) -> bool {
        brightness > self.low && brightness < self.high
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// A watched directory as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    pub path: PathBuf,
    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub recursive: bool,
    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub enabled: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl FolderConfig {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
            enabled: true,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub database_path: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub thumbnail_size: u32,
    pub thumbnail_quality: u8,
    pub perceptual_hashing: bool,
    pub phash_resolutions: [u32; 3],
    pub frame_brightness: BrightnessThresholds,
    pub large_file_threshold: u64,
    pub scan_interval_secs: u64,
    pub retry: RetryConfig,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub folders: Vec<FolderConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let data_root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mediadex");
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mediadex");

        Self {
            database_path: data_root.join("catalog.db"),
            thumbnail_dir: cache_root.join("thumbnails"),
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            perceptual_hashing: true,
            phash_resolutions: DEFAULT_PHASH_RESOLUTIONS,
            frame_brightness: BrightnessThresholds::default(),
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            retry: RetryConfig::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            folders: Vec::new(),
        }
    }
}

impl CatalogConfig {
    /// Read a JSON configuration file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Config rooted entirely inside `root`, used by tests and `--data-dir`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            database_path: root.join("catalog.db"),
            thumbnail_dir: root.join("thumbnails"),
            ..Self::default()
        }
    }

    /// Create the directories the catalog writes into.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        match self.database_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                if !parent.exists() {
                    log::info!("Creating database directory {}", parent.display());
                    fs::create_dir_all(parent)?;
                }
            }
            Some(_) => {}
            None => return Err(ConfigError::NoDefaultDirectory { what: "database" }),
        }

        if !self.thumbnail_dir.exists() {
            log::info!(
                "Creating thumbnail directory {}",
                self.thumbnail_dir.display()
            );
            fs::create_dir_all(&self.thumbnail_dir)?;
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}

/// Older configuration files spell flags as booleans, numbers or strings.
/// Normalize all of them here so the rest of the crate only sees `bool`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
        Flag::Float(value) => value != 0.0,
        Flag::Text(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
    })
}
