use crate::{
    config::DumpConfig,
    error::DumpError,
    replication::{MasterStatus, SlaveStatus},
    sink::{Sink, SinkOptions},
    table::Table,
    task::{PlannedTable, Task},
    worker::Worker,
};
use mysql_async::{prelude::*, Conn};
use std::{
    collections::HashMap,
    io::Write,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared run counters: chunks planned so far and chunks sitting in the
/// queue. Planners increment, workers decrement.
#[derive(Debug, Default)]
pub struct RunCounters {
    total_chunks: AtomicU64,
    queued: AtomicI64,
}

impl RunCounters {
    pub fn enqueued(&self) {
        self.total_chunks.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total_chunks.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> i64 {
        self.queued.load(Ordering::Relaxed)
    }
}

pub(crate) fn sink_options(config: &DumpConfig) -> SinkOptions {
    SinkOptions {
        compress: config.compress,
        compress_level: config.compress_level,
    }
}

/// What a completed run produced, for the caller's summary output.
#[derive(Debug)]
pub struct DumpSummary {
    /// Chunk counts per table, sorted by table name.
    pub tables: Vec<PlannedTable>,
    pub total_chunks: u64,
}

fn lock_tables_sql(tables: &[Arc<Table>]) -> String {
    let list = tables
        .iter()
        .map(|table| format!("{} READ", table.full_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("LOCK TABLES {list}")
}

fn write_status_file(config: &DumpConfig, name: &str, content: &str) -> Result<(), DumpError> {
    let path = config.destination_dir.join(name);
    let mut sink =
        Sink::create(&path, &sink_options(config)).map_err(|e| DumpError::sink(path.display(), e))?;
    sink.write_all(content.as_bytes())
        .map_err(|e| DumpError::sink(path.display(), e))?;
    sink.close().map_err(|e| DumpError::sink(path.display(), e))?;
    Ok(())
}

/// `<schema>.<table>-definition.sql`: session setup, optional drop, and the
/// server's own CREATE TABLE text, verbatim.
fn write_definition_file(config: &DumpConfig, table: &Table) -> Result<(), DumpError> {
    let path = config
        .destination_dir
        .join(format!("{}-definition.sql", table.qualified_name()));
    let mut sink =
        Sink::create(&path, &sink_options(config)).map_err(|e| DumpError::sink(path.display(), e))?;
    let fail = |e| DumpError::sink(path.display(), e);

    if !config.skip_use_database {
        writeln!(sink, "USE {};", table.escaped_schema()).map_err(fail)?;
    }
    writeln!(sink, "/*!40101 SET NAMES binary*/;").map_err(fail)?;
    writeln!(sink, "/*!40014 SET FOREIGN_KEY_CHECKS=0*/;").map_err(fail)?;
    if config.add_drop_table {
        writeln!(sink, "DROP TABLE IF EXISTS {};", table.escaped_name()).map_err(fail)?;
    }
    writeln!(sink, "{};", table.create_table_sql).map_err(fail)?;
    sink.close().map_err(fail)?;
    Ok(())
}

/// Owns the run: the task pool, the control connection used for locking and
/// metadata, the worker transactions, and the chunk queue between planners
/// and workers.
pub struct TaskManager {
    config: Arc<DumpConfig>,
    control: Conn,
    tasks: Vec<Task>,
    tables: Vec<Arc<Table>>,
    /// First table seen per storage engine.
    engines: HashMap<String, String>,
    counters: Arc<RunCounters>,
}

impl TaskManager {
    /// Open and verify the control connection.
    pub async fn connect(config: DumpConfig) -> Result<TaskManager, DumpError> {
        config.validate()?;
        let mut control = Conn::new(config.connection_opts())
            .await
            .map_err(DumpError::Connect)?;
        control.ping().await.map_err(DumpError::Connect)?;
        debug!(host = %config.host.hostname, "Control connection established.");

        Ok(TaskManager {
            config: Arc::new(config),
            control,
            tasks: Vec::new(),
            tables: Vec::new(),
            engines: HashMap::new(),
            counters: Arc::new(RunCounters::default()),
        })
    }

    /// Load one table's descriptor and register a dump task for it.
    pub async fn add_table(&mut self, schema: &str, name: &str) -> Result<(), DumpError> {
        let table = Arc::new(Table::load(&mut self.control, schema, name).await?);

        if !self.engines.contains_key(&table.engine) {
            self.engines
                .insert(table.engine.clone(), table.qualified_name());
            if !table.engine.eq_ignore_ascii_case("InnoDB") {
                warn!(
                    engine = %table.engine,
                    table = %table.qualified_name(),
                    "Non-transactional storage engine; rows changed during the dump \
                     may not match the snapshot."
                );
            }
        }

        let task = Task::new(table.clone(), &self.config);
        task.log_estimate();
        self.tasks.push(task);
        self.tables.push(table);
        Ok(())
    }

    /// Execute the whole run: snapshot establishment, coordinate capture,
    /// schema files, then the parallel chunk pipeline.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DumpSummary, DumpError> {
        if self.tasks.is_empty() {
            return Err(DumpError::Config("no tables selected for the dump".into()));
        }

        let mut worker_conns = self.open_worker_connections().await?;

        // Locks must be in place before any worker transaction begins so
        // that every snapshot lands on the same point in time, and the
        // replication coordinates must be read before the locks go away.
        let locking = self.config.lock_tables;
        let lock_started = Instant::now();
        if locking {
            info!("Locking tables to get a consistent backup.");
            self.lock_tables().await?;
        }
        let snapshot_result = self.establish_snapshots(&mut worker_conns).await;
        if locking {
            let unlock_result = self.unlock_tables().await;
            info!(
                locked_for = ?lock_started.elapsed(),
                "Unlocking the tables."
            );
            snapshot_result?;
            unlock_result?;
        } else {
            snapshot_result?;
        }

        for table in &self.tables {
            write_definition_file(&self.config, table)?;
        }

        self.pump_chunks(worker_conns, cancel).await
    }

    async fn open_worker_connections(&self) -> Result<Vec<Conn>, DumpError> {
        let opts = self.config.connection_opts();
        let mut conns = Vec::with_capacity(self.config.threads);
        for _ in 0..self.config.threads {
            let mut conn = Conn::new(opts.clone()).await.map_err(DumpError::Connect)?;
            conn.ping().await.map_err(DumpError::Connect)?;
            conns.push(conn);
        }
        debug!(count = conns.len(), "Worker connections ready.");
        Ok(conns)
    }

    async fn lock_tables(&mut self) -> Result<(), DumpError> {
        let sql = if self.config.lock_all {
            "FLUSH TABLES WITH READ LOCK".to_string()
        } else {
            lock_tables_sql(&self.tables)
        };
        self.control
            .query_drop(sql)
            .await
            .map_err(|e| DumpError::snapshot(format!("failed to lock tables: {e}")))
    }

    async fn unlock_tables(&mut self) -> Result<(), DumpError> {
        self.control
            .query_drop("UNLOCK TABLES")
            .await
            .map_err(|e| DumpError::snapshot(format!("failed to unlock tables: {e}")))
    }

    /// Begin every worker transaction under the held locks, then capture
    /// the replication coordinates that describe the shared snapshot.
    async fn establish_snapshots(&mut self, worker_conns: &mut [Conn]) -> Result<(), DumpError> {
        let level = self.config.isolation_level;
        for conn in worker_conns.iter_mut() {
            conn.query_drop(format!(
                "SET SESSION TRANSACTION ISOLATION LEVEL {}",
                level.as_sql()
            ))
            .await
            .map_err(|e| DumpError::snapshot(format!("failed to set isolation level: {e}")))?;

            let begin = if level == crate::config::IsolationLevel::RepeatableRead {
                "START TRANSACTION WITH CONSISTENT SNAPSHOT, READ ONLY"
            } else {
                "START TRANSACTION READ ONLY"
            };
            conn.query_drop(begin)
                .await
                .map_err(|e| DumpError::snapshot(format!("failed to begin transaction: {e}")))?;
        }
        debug!(count = worker_conns.len(), "Worker transactions started.");

        if self.config.get_master_status {
            let status = MasterStatus::capture(&mut self.control).await?;
            write_status_file(&self.config, "master-data.sql", &status.render())?;
        }
        if self.config.get_slave_status {
            let status = SlaveStatus::capture(&mut self.control).await?;
            write_status_file(&self.config, "slave-data.sql", &status.render())?;
        }
        Ok(())
    }

    /// Fan out planners and workers over the bounded chunk queue, join
    /// both pools, and assemble the summary.
    async fn pump_chunks(
        mut self,
        worker_conns: Vec<Conn>,
        cancel: CancellationToken,
    ) -> Result<DumpSummary, DumpError> {
        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.channel_buffer_size);
        let chunk_rx = Arc::new(Mutex::new(chunk_rx));

        info!(
            planners = self.tasks.len(),
            workers = worker_conns.len(),
            "Starting chunk pipeline."
        );

        let opts = self.config.connection_opts();
        let policy = self.config.tables_without_uk;
        let mut planner_handles = Vec::new();
        for task in std::mem::take(&mut self.tasks) {
            let opts = opts.clone();
            let chunk_tx = chunk_tx.clone();
            let counters = self.counters.clone();
            let cancel = cancel.clone();
            planner_handles.push(tokio::spawn(async move {
                let result = async {
                    let mut conn = Conn::new(opts).await.map_err(DumpError::Connect)?;
                    task.plan_chunks(&mut conn, chunk_tx, counters, policy, cancel.clone())
                        .await
                }
                .await;
                if result.is_err() {
                    cancel.cancel();
                }
                result
            }));
        }
        // Workers observe end-of-stream once the planners are done and the
        // queue has drained.
        drop(chunk_tx);

        let mut worker_handles = Vec::new();
        for (id, conn) in worker_conns.into_iter().enumerate() {
            let worker = Worker::new(id, conn, self.config.clone());
            let chunk_rx = chunk_rx.clone();
            let counters = self.counters.clone();
            let cancel = cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                let result = worker.run(chunk_rx, counters, cancel.clone()).await;
                if result.is_err() {
                    cancel.cancel();
                }
                result
            }));
        }

        let status_done = CancellationToken::new();
        let status_handle = tokio::spawn(report_queue_status(
            self.counters.clone(),
            status_done.clone(),
        ));

        let mut first_error: Option<DumpError> = None;
        let mut planned_tables = Vec::new();
        for handle in planner_handles {
            match handle.await {
                Ok(Ok(planned)) => planned_tables.push(planned),
                Ok(Err(e)) => {
                    cancel.cancel();
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    cancel.cancel();
                    first_error.get_or_insert(DumpError::plan("<planner>", join_error));
                }
            }
        }
        for handle in worker_handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    first_error
                        .get_or_insert(DumpError::stream("<worker>", join_error));
                }
            }
        }

        status_done.cancel();
        let _ = status_handle.await;
        let _ = self.control.disconnect().await;

        if let Some(error) = first_error {
            return Err(error);
        }
        if cancel.is_cancelled() {
            return Err(DumpError::Interrupted);
        }

        planned_tables.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(DumpSummary {
            tables: planned_tables,
            total_chunks: self.counters.total(),
        })
    }
}

async fn report_queue_status(counters: Arc<RunCounters>, done: CancellationToken) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                info!(
                    "Queue: {} of {} chunks pending.",
                    counters.pending(),
                    counters.total()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_queue_depth() {
        let counters = RunCounters::default();
        counters.enqueued();
        counters.enqueued();
        counters.enqueued();
        assert_eq!(counters.total(), 3);
        assert_eq!(counters.pending(), 3);

        counters.dequeued();
        counters.dequeued();
        assert_eq!(counters.total(), 3);
        assert_eq!(counters.pending(), 1);
    }

    #[test]
    fn test_lock_tables_sql_lists_every_table() {
        let tables = vec![
            Arc::new(Table::stub("shop", "orders", Some("id"))),
            Arc::new(Table::stub("shop", "users", Some("id"))),
        ];
        assert_eq!(
            lock_tables_sql(&tables),
            "LOCK TABLES `shop`.`orders` READ, `shop`.`users` READ"
        );
    }

    #[test]
    fn test_definition_file_full_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpConfig {
            destination_dir: dir.path().to_path_buf(),
            add_drop_table: true,
            ..DumpConfig::default()
        };
        let table = Table::stub("shop", "orders", Some("id"));

        write_definition_file(&config, &table).unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("shop.orders-definition.sql")).unwrap();
        assert_eq!(
            content,
            "USE `shop`;\n\
             /*!40101 SET NAMES binary*/;\n\
             /*!40014 SET FOREIGN_KEY_CHECKS=0*/;\n\
             DROP TABLE IF EXISTS `orders`;\n\
             CREATE TABLE `orders` (`id` int NOT NULL);\n"
        );
    }

    #[test]
    fn test_definition_file_respects_skip_use_and_no_drop() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpConfig {
            destination_dir: dir.path().to_path_buf(),
            skip_use_database: true,
            ..DumpConfig::default()
        };
        let table = Table::stub("shop", "orders", Some("id"));

        write_definition_file(&config, &table).unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("shop.orders-definition.sql")).unwrap();
        assert!(!content.contains("USE "));
        assert!(!content.contains("DROP TABLE"));
        assert!(content.ends_with("CREATE TABLE `orders` (`id` int NOT NULL);\n"));
    }

    #[test]
    fn test_status_file_written_and_compressed_variant() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpConfig {
            destination_dir: dir.path().to_path_buf(),
            ..DumpConfig::default()
        };
        write_status_file(&config, "master-data.sql", "Master File: binlog.000042\n").unwrap();
        let content = std::fs::read_to_string(dir.path().join("master-data.sql")).unwrap();
        assert_eq!(content, "Master File: binlog.000042\n");

        let compressed = DumpConfig {
            compress: true,
            ..config
        };
        write_status_file(&compressed, "slave-data.sql", "Connection Name: \n").unwrap();
        assert!(dir.path().join("slave-data.sql.gz").exists());
    }
}
