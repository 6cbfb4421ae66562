use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::{NuclideId, RunKey};

// ---------------------------------------------------------------------------
// Parse errors – local to one run, raised before it reaches the collector
// ---------------------------------------------------------------------------

/// A run document that cannot be turned into a [`ParsedRun`](crate::data::model::ParsedRun).
///
/// `path` is the JSON field path of the offending value, e.g.
/// `inventory_data[2].nuclides[7].half_life`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}: missing required field")]
    Missing { path: String },

    #[error("{path}: expected {expected}")]
    Type { path: String, expected: &'static str },

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

impl ParseError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        ParseError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Field path of the offending value, if the error has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ParseError::Json(_) => None,
            ParseError::Missing { path }
            | ParseError::Type { path, .. }
            | ParseError::Invalid { path, .. } => Some(path),
        }
    }
}

// ---------------------------------------------------------------------------
// Collect errors – a run rejected by the collector, nothing committed
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("run {0} has already been collected")]
    DuplicateRun(RunKey),

    #[error(
        "run {key}: half-life of {nuclide} is {supplied:e} s, but {recorded:e} s was recorded"
    )]
    ReferenceDataConflict {
        key: RunKey,
        nuclide: NuclideId,
        recorded: f64,
        supplied: f64,
    },

    #[error("run {key}: zai {zai} is claimed by both {recorded} and {supplied}")]
    ZaiCollision {
        key: RunKey,
        zai: u32,
        recorded: NuclideId,
        supplied: NuclideId,
    },

    #[error("run {key}, time step {time_step_number}: gamma grid mismatch, {detail}")]
    GridMismatch {
        key: RunKey,
        time_step_number: u32,
        detail: String,
    },
}

impl CollectError {
    /// The run this error rejected.
    pub fn key(&self) -> RunKey {
        match self {
            CollectError::DuplicateRun(key)
            | CollectError::ReferenceDataConflict { key, .. }
            | CollectError::ZaiCollision { key, .. }
            | CollectError::GridMismatch { key, .. } => *key,
        }
    }
}

// ---------------------------------------------------------------------------
// Export errors – nothing of the dataset is considered written
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{} already exists and overwrite is not enabled", .0.display())]
    Exists(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("table {table}: {message}")]
    Schema { table: &'static str, message: String },
}

impl ExportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn schema(table: &'static str, message: impl Into<String>) -> Self {
        ExportError::Schema {
            table,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Any failure the crate can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
