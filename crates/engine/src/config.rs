use crate::error::DumpError;
use mysql_async::{Opts, OptsBuilder};
use std::{collections::HashMap, path::PathBuf, str::FromStr};

/// Connection target. When a socket file is set it takes precedence over
/// the TCP host/port pair.
#[derive(Debug, Clone)]
pub struct MySqlHost {
    pub hostname: String,
    pub port: u16,
    pub socket_file: Option<String>,
}

impl Default for MySqlHost {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 3306,
            socket_file: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlCredentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Transaction isolation for the worker snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', " ").as_str() {
            "READ UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            other => Err(DumpError::Config(format!(
                "unknown isolation level: {other}"
            ))),
        }
    }
}

/// What to do with a table that has no usable integer or timestamp key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnkeyedTablePolicy {
    /// Dump the whole table as one chunk.
    SingleChunk,
    /// Fail the run.
    #[default]
    Error,
}

impl FromStr for UnkeyedTablePolicy {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-chunk" => Ok(UnkeyedTablePolicy::SingleChunk),
            "error" => Ok(UnkeyedTablePolicy::Error),
            other => Err(DumpError::Config(format!(
                "tables-without-uniquekey must be \"single-chunk\" or \"error\", got \"{other}\""
            ))),
        }
    }
}

/// Options consumed by the dump pipeline. The CLI builds this record from
/// flags and defaults files; the engine never reads the environment itself.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub host: MySqlHost,
    pub credentials: MySqlCredentials,
    /// Worker count, at least 1.
    pub threads: usize,
    /// Planner target rows per chunk.
    pub chunk_size: u64,
    /// Flush threshold, reserved for statement splitting.
    pub output_chunk_size: u64,
    /// Capacity of the chunk queue between planners and workers.
    pub channel_buffer_size: usize,
    pub lock_tables: bool,
    /// Take the server-wide read lock instead of per-table locks.
    pub lock_all: bool,
    pub tables_without_uk: UnkeyedTablePolicy,
    /// Output directory, must already exist.
    pub destination_dir: PathBuf,
    pub add_drop_table: bool,
    pub get_master_status: bool,
    pub get_slave_status: bool,
    pub skip_use_database: bool,
    pub compress: bool,
    /// Gzip level, 1..=9.
    pub compress_level: u32,
    pub isolation_level: IsolationLevel,
    /// Per-table filters keyed by `schema.table`.
    pub where_conditions: HashMap<String, String>,
    /// Fallback filter for tables without a specific entry.
    pub global_where_condition: Option<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            host: MySqlHost::default(),
            credentials: MySqlCredentials::default(),
            threads: 1,
            chunk_size: 1000,
            output_chunk_size: 0,
            channel_buffer_size: 1000,
            lock_tables: true,
            lock_all: false,
            tables_without_uk: UnkeyedTablePolicy::Error,
            destination_dir: PathBuf::new(),
            add_drop_table: false,
            get_master_status: true,
            get_slave_status: false,
            skip_use_database: false,
            compress: false,
            compress_level: 1,
            isolation_level: IsolationLevel::RepeatableRead,
            where_conditions: HashMap::new(),
            global_where_condition: None,
        }
    }
}

impl DumpConfig {
    /// Check the record before any I/O happens.
    pub fn validate(&self) -> Result<(), DumpError> {
        if self.threads < 1 {
            return Err(DumpError::Config("threads must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(DumpError::Config("chunk-size must be at least 1".into()));
        }
        if self.channel_buffer_size == 0 {
            return Err(DumpError::Config(
                "channel-buffer-size must be at least 1".into(),
            ));
        }
        if !(1..=9).contains(&self.compress_level) {
            return Err(DumpError::Config(format!(
                "compress-level must be within 1..=9, got {}",
                self.compress_level
            )));
        }
        if !self.destination_dir.is_dir() {
            return Err(DumpError::Config(format!(
                "destination directory {} does not exist",
                self.destination_dir.display()
            )));
        }
        Ok(())
    }

    /// Driver options for one server connection. The socket file, when
    /// configured, wins over the TCP endpoint.
    pub fn connection_opts(&self) -> Opts {
        let mut builder = OptsBuilder::default()
            .user(self.credentials.user.clone())
            .pass(self.credentials.password.clone());
        builder = match &self.host.socket_file {
            Some(socket) => builder.socket(Some(socket.clone())),
            None => builder
                .ip_or_hostname(self.host.hostname.clone())
                .tcp_port(self.host.port),
        };
        Opts::from(builder)
    }

    /// Filter to AND into the chunk SQL of `schema.table`, if any.
    pub fn where_for(&self, qualified_name: &str) -> Option<&str> {
        self.where_conditions
            .get(qualified_name)
            .or(self.global_where_condition.as_ref())
            .map(String::as_str)
    }
}
