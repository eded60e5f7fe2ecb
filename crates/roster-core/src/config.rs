//! Configuration types for roster sync components.
//!
//! Defaults are hardcoded here; an optional TOML file
//! (`~/.config/roster-sync/config.toml`) can override the upstream base URL
//! per region and the sync flags:
//!
//! ```toml
//! region = "uk"
//!
//! [sync]
//! batch_size = 25
//! skip_existing_people = true
//!
//! [regions]
//! uk = "https://api.wonde.com/v1.0/schools"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Maximum number of records the record store accepts in one atomic batch.
pub const MAX_BATCH_SIZE: usize = 25;

/// Upstream API deployment region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Au,
    Uk,
}

impl Region {
    /// Schools endpoint for this region.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Region::Au => "https://api-ap-southeast-2.wonde.com/v1.0/schools",
            Region::Uk => "https://api.wonde.com/v1.0/schools",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Au => write!(f, "au"),
            Region::Uk => write!(f, "uk"),
        }
    }
}

impl FromStr for Region {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "au" | "ap-southeast-2" => Ok(Region::Au),
            "uk" | "eu-west-2" => Ok(Region::Uk),
            other => Err(AppError::Config(format!("unknown region '{}'", other))),
        }
    }
}

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for upstream roster calls.
///
/// Roster pagination can span many pages, so the per-request timeout is
/// well above the few-second platform default.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub page_size: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            page_size: 200,
        }
    }
}

/// Sync pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records per batch write, clamped to [`MAX_BATCH_SIZE`].
    pub batch_size: usize,
    /// When set, students and teachers whose upstream id is already stored
    /// reuse their existing local id instead of being inserted again.
    pub skip_existing_people: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            skip_existing_people: false,
        }
    }
}

impl SyncConfig {
    /// Batch size actually used for writes: at least 1, at most 25.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

/// Contents of the optional TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub region: Option<Region>,
    pub sync: SyncConfig,
    /// Base URL overrides keyed by region name (`au`, `uk`).
    pub regions: HashMap<String, String>,
}

impl FileConfig {
    /// Base URL for `region`, preferring the file override.
    pub fn base_url(&self, region: Region) -> String {
        self.regions
            .get(&region.to_string())
            .cloned()
            .unwrap_or_else(|| region.default_base_url().to_string())
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("roster-sync").join("config.toml"))
}

/// Loads the configuration file at `path`, or the default path if `None`.
///
/// A missing file yields the defaults; an unreadable or malformed file is an error.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig, AppError> {
    let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(p) => p,
        None => return Ok(FileConfig::default()),
    };

    if !path.exists() {
        tracing::debug!("No config file at {}, using defaults", path.display());
        return Ok(FileConfig::default());
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&raw).map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
}
