//! Parallel, consistent logical backups for MySQL-compatible servers.
//!
//! The pipeline splits each table into primary-key ranges ("chunks"),
//! establishes one consistent snapshot across a pool of worker
//! transactions, and streams the chunks into per-table SQL files that can
//! be replayed to rebuild schema and data. Replication coordinates are
//! captured under the same lock as the snapshot so a dump can seed a
//! replica.
//!
//! The [`TaskManager`] drives a run end to end; everything else is a stage
//! of its pipeline.

pub mod chunk;
pub mod config;
pub mod encoder;
pub mod error;
pub mod manager;
pub mod replication;
pub mod sink;
pub mod table;
pub mod task;
pub mod worker;

pub use chunk::{Chunk, ChunkKind};
pub use config::{
    DumpConfig, IsolationLevel, MySqlCredentials, MySqlHost, UnkeyedTablePolicy,
};
pub use error::DumpError;
pub use manager::{DumpSummary, TaskManager};
pub use sink::{Sink, SinkOptions};
pub use table::Table;
