//! TOML configuration. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! [collector]
//! half_life_rtol = 1e-6
//! boundary_rtol = 1e-9
//!
//! [export]
//! overwrite = false
//! compression = "zstd"
//!
//! [ingest]
//! workers = 4
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::data::registry::Tolerance;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub collector: CollectorConfig,
    pub export: ExportConfig,
    pub ingest: IngestConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// ---------------------------------------------------------------------------
// [collector]
// ---------------------------------------------------------------------------

/// Tolerances used when comparing reference data across runs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub half_life_rtol: f64,
    pub half_life_atol: f64,
    pub boundary_rtol: f64,
    pub boundary_atol: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            half_life_rtol: 1e-6,
            half_life_atol: 0.0,
            boundary_rtol: 1e-9,
            boundary_atol: 1e-12,
        }
    }
}

impl CollectorConfig {
    pub fn half_life_tolerance(&self) -> Tolerance {
        Tolerance::new(self.half_life_rtol, self.half_life_atol)
    }

    pub fn boundary_tolerance(&self) -> Tolerance {
        Tolerance::new(self.boundary_rtol, self.boundary_atol)
    }
}

// ---------------------------------------------------------------------------
// [export]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Replace existing parquet artifacts instead of failing.
    pub overwrite: bool,
    pub compression: Compression,
    pub row_group_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            compression: Compression::default(),
            row_group_size: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// [ingest]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Parser threads; 0 means one per available core.
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 64,
        }
    }
}

impl IngestConfig {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}
