//! Collects activation-analysis run outputs into normalized, column-oriented
//! tables and exports them to parquet files or an embedded SQLite store.
//!
//! ```no_run
//! use activation_collector::{parse_run, Collector};
//!
//! # fn main() -> anyhow::Result<()> {
//! let run = parse_run(&std::fs::read("run.json")?)?;
//! let mut collector = Collector::default();
//! collector.append(&run, 1, 54)?;
//! let dataset = collector.get_result();
//! # let _ = dataset;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod ingest;

pub use config::Config;
pub use data::collector::{Collector, SharedCollector};
pub use data::loader::{parse_run, parse_run_reader, parse_run_str};
pub use data::model::{ParsedRun, RunKey};
pub use data::tables::{Dataset, Table};
pub use error::{CollectError, Error, ExportError, ParseError, Result};
pub use export::parquet::{read_parquets, write_parquets};
pub use export::sqlite::SqliteStore;
