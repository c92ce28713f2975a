use std::fmt::Display;
use thiserror::Error;

/// All fatal conditions a dump run can end with.
///
/// A logical dump has no partial-success semantics: a missing chunk is a
/// silently incorrect backup, so every variant here aborts the run. The
/// variant tells the caller which stage failed; the message carries the
/// table (when one applies) and the underlying driver or I/O detail.
#[derive(Debug, Error)]
pub enum DumpError {
    /// A configuration value the engine cannot work with.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connecting to or pinging the server failed.
    #[error("database connection failed: {0}")]
    Connect(#[source] mysql_async::Error),

    /// `information_schema` / `SHOW CREATE TABLE` reads failed, or a table
    /// is unusable under the configured key policy.
    #[error("metadata read failed for {table}: {message}")]
    Metadata { table: String, message: String },

    /// Lock acquisition, transaction begin, or replication-coordinate
    /// capture failed.
    #[error("snapshot setup failed: {0}")]
    Snapshot(String),

    /// A chunk boundary query failed or the chunk queue went away.
    #[error("chunk planning failed for {table}: {message}")]
    Plan { table: String, message: String },

    /// Row scan or network drop while streaming a chunk.
    #[error("row streaming failed for {table}: {message}")]
    Stream { table: String, message: String },

    /// File create, write, compress, or close failure.
    #[error("sink error on {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before completion; output is incomplete.
    #[error("dump interrupted before completion")]
    Interrupted,
}

impl DumpError {
    pub(crate) fn metadata(table: impl Into<String>, message: impl Display) -> Self {
        DumpError::Metadata {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn snapshot(message: impl Display) -> Self {
        DumpError::Snapshot(message.to_string())
    }

    pub(crate) fn plan(table: impl Into<String>, message: impl Display) -> Self {
        DumpError::Plan {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn stream(table: impl Into<String>, message: impl Display) -> Self {
        DumpError::Stream {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn sink(path: impl Display, source: std::io::Error) -> Self {
        DumpError::Sink {
            path: path.to_string(),
            source,
        }
    }
}
