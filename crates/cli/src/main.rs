use crate::{defaults::IniDefaults, error::CliError};
use clap::Parser;
use mysql_async::Conn;
use paradump_engine::{
    DumpConfig, DumpError, DumpSummary, IsolationLevel, TaskManager, UnkeyedTablePolicy,
};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

mod defaults;
mod error;
mod shutdown;
mod tables;

#[derive(Parser, Debug, Default)]
#[command(
    name = "paradump",
    version,
    about = "Parallel consistent logical backups for MySQL-compatible servers"
)]
struct Cli {
    /// Mysql-style INI file supplying defaults ([client], [mysqldump], [paradump])
    #[arg(long, value_name = "PATH")]
    defaults_file: Option<String>,

    #[arg(long, value_name = "USER")]
    mysql_user: Option<String>,

    #[arg(long, value_name = "PASSWORD")]
    mysql_password: Option<String>,

    #[arg(long, value_name = "HOST")]
    mysql_host: Option<String>,

    #[arg(long, value_name = "PORT")]
    mysql_port: Option<u16>,

    /// Unix socket; takes precedence over host and port
    #[arg(long, value_name = "PATH")]
    mysql_socket: Option<String>,

    /// Number of parallel dump workers
    #[arg(long)]
    threads: Option<usize>,

    /// Target rows per chunk
    #[arg(long)]
    chunk_size: Option<u64>,

    #[arg(long)]
    output_chunk_size: Option<u64>,

    /// Capacity of the chunk queue between planners and workers
    #[arg(long)]
    channel_buffer_size: Option<usize>,

    /// Hold read locks while the snapshot is established
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    lock_tables: Option<bool>,

    /// "single-chunk" or "error"
    #[arg(long, value_name = "POLICY")]
    tables_without_uniquekey: Option<String>,

    /// Output directory; must exist
    #[arg(long, value_name = "DIR")]
    destination: Option<String>,

    /// Prepend DROP TABLE IF EXISTS to definition files
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_drop_table: Option<bool>,

    /// Write master-data.sql with the binary-log coordinates
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    master_data: Option<bool>,

    /// Write slave-data.sql with the replication channel coordinates
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    slave_data: Option<bool>,

    /// Omit USE statements from the generated files
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    skip_use_database: Option<bool>,

    /// Gzip every output file
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    compress: Option<bool>,

    /// Gzip level, 1..=9
    #[arg(long)]
    compress_level: Option<u32>,

    /// Transaction isolation for the worker snapshots
    #[arg(long, value_name = "LEVEL")]
    isolation_level: Option<String>,

    /// Row filter: a bare condition, or table:cond,table:cond pairs
    #[arg(long = "where", value_name = "CONDITION")]
    where_option: Option<String>,

    /// Comma-separated schema.table list to dump
    #[arg(long, value_name = "LIST")]
    tables: Option<String>,

    /// Comma-separated databases whose base tables are dumped
    #[arg(long, value_name = "LIST")]
    databases: Option<String>,

    /// Dump every base table on the server
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    all_databases: Option<bool>,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    quiet: bool,
}

/// Flags win over the defaults file, which wins over built-in defaults.
fn build_config(cli: &Cli, defaults: &IniDefaults) -> Result<DumpConfig, CliError> {
    let base = DumpConfig::default();
    let mut config = DumpConfig::default();

    config.credentials.user = cli.mysql_user.clone().or_else(|| defaults.user.clone());
    config.credentials.password = cli
        .mysql_password
        .clone()
        .or_else(|| defaults.password.clone());
    config.host.hostname = cli
        .mysql_host
        .clone()
        .or_else(|| defaults.host.clone())
        .unwrap_or(base.host.hostname);
    config.host.port = cli.mysql_port.or(defaults.port).unwrap_or(base.host.port);
    config.host.socket_file = cli.mysql_socket.clone().or_else(|| defaults.socket.clone());

    config.threads = cli.threads.or(defaults.threads).unwrap_or(base.threads);
    config.chunk_size = cli
        .chunk_size
        .or(defaults.chunk_size)
        .unwrap_or(base.chunk_size);
    config.output_chunk_size = cli
        .output_chunk_size
        .or(defaults.output_chunk_size)
        .unwrap_or(base.output_chunk_size);
    config.channel_buffer_size = cli
        .channel_buffer_size
        .or(defaults.channel_buffer_size)
        .unwrap_or(base.channel_buffer_size);
    config.lock_tables = cli
        .lock_tables
        .or(defaults.lock_tables)
        .unwrap_or(base.lock_tables);
    config.lock_all = cli
        .all_databases
        .or(defaults.all_databases)
        .unwrap_or(false);
    config.add_drop_table = cli
        .add_drop_table
        .or(defaults.add_drop_table)
        .unwrap_or(base.add_drop_table);
    config.get_master_status = cli
        .master_data
        .or(defaults.get_master_status)
        .unwrap_or(base.get_master_status);
    config.get_slave_status = cli
        .slave_data
        .or(defaults.get_slave_status)
        .unwrap_or(base.get_slave_status);
    config.skip_use_database = cli
        .skip_use_database
        .or(defaults.skip_use_database)
        .unwrap_or(base.skip_use_database);
    config.compress = cli.compress.or(defaults.compress).unwrap_or(base.compress);
    config.compress_level = cli
        .compress_level
        .or(defaults.compress_level)
        .unwrap_or(base.compress_level);

    if let Some(policy) = cli
        .tables_without_uniquekey
        .as_deref()
        .or(defaults.tables_without_uniquekey.as_deref())
    {
        config.tables_without_uk = policy.parse::<UnkeyedTablePolicy>()?;
    }
    if let Some(level) = cli
        .isolation_level
        .as_deref()
        .or(defaults.isolation_level.as_deref())
    {
        config.isolation_level = level.parse::<IsolationLevel>()?;
    }

    let destination = cli
        .destination
        .clone()
        .or_else(|| defaults.destination.clone())
        .ok_or_else(|| CliError::Flag("--destination is required".into()))?;
    config.destination_dir = destination.into();

    if let Some(condition) = cli
        .where_option
        .as_deref()
        .or(defaults.where_option.as_deref())
    {
        let (per_table, global) = tables::parse_where_option(condition);
        config.where_conditions = per_table;
        config.global_where_condition = global;
    }

    Ok(config)
}

async fn resolve_targets(
    cli: &Cli,
    defaults: &IniDefaults,
    config: &DumpConfig,
) -> Result<Vec<(String, String)>, CliError> {
    if let Some(list) = cli.tables.as_deref().or(defaults.tables.as_deref()) {
        return tables::parse_table_list(list);
    }

    let mut conn = Conn::new(config.connection_opts())
        .await
        .map_err(DumpError::Connect)?;
    let targets = if let Some(list) = cli.databases.as_deref().or(defaults.databases.as_deref()) {
        tables::tables_from_databases(&mut conn, list).await?
    } else if config.lock_all {
        tables::tables_from_all_databases(&mut conn).await?
    } else {
        return Err(CliError::Flag(
            "nothing to dump; use --tables, --databases or --all-databases".into(),
        ));
    };
    conn.disconnect().await.ok();

    if targets.is_empty() {
        return Err(CliError::Flag("the selection matched no tables".into()));
    }
    Ok(targets)
}

fn print_summary(summary: &DumpSummary) {
    for planned in &summary.tables {
        println!("   {} -> {}", planned.chunks, planned.table);
    }
    info!(total_chunks = summary.total_chunks, "Dump finished.");
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), CliError> {
    let defaults = match &cli.defaults_file {
        Some(path) => defaults::load(path)?,
        None => IniDefaults::default(),
    };
    let config = build_config(&cli, &defaults)?;
    config.validate().map_err(CliError::Dump)?;

    let targets = resolve_targets(&cli, &defaults, &config).await?;
    info!(tables = targets.len(), "Resolved dump selection.");

    let mut manager = TaskManager::connect(config).await?;
    for (schema, table) in &targets {
        manager.add_table(schema, table).await?;
    }

    let summary = manager.run(cancel).await?;
    print_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let cancel = CancellationToken::new();
    shutdown::spawn_signal_listener(cancel.clone());

    let exit_code = match run(cli, cancel).await {
        Ok(()) => 0,
        Err(CliError::Dump(DumpError::Interrupted)) => {
            error!("Dump interrupted; the destination directory is incomplete.");
            130
        }
        Err(e) => {
            error!("{e}");
            1
        }
    };
    process::exit(exit_code);
}
