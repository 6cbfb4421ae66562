//! Persisting a [`Dataset`](crate::data::tables::Dataset): one parquet file
//! per table, or the relational schema in an embedded SQLite database.

pub mod parquet;
pub mod sqlite;
