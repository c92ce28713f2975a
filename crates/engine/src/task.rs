use crate::{
    chunk::Chunk,
    config::{DumpConfig, UnkeyedTablePolicy},
    error::DumpError,
    manager::RunCounters,
    table::Table,
};
use async_trait::async_trait;
use mysql_async::{prelude::*, Conn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Boundary queries the planner walks a table's key space with. The only
/// implementation outside of tests is a plain server connection.
#[async_trait]
pub trait KeyProbe {
    /// The key value `chunk_size` rows past `from`, which becomes the upper
    /// bound of the next range. `None` once the key space is exhausted.
    async fn next_boundary(
        &mut self,
        table: &Table,
        from: i64,
        chunk_size: u64,
    ) -> Result<Option<i64>, DumpError>;

    /// The smallest key at or above `from`, if any row remains.
    async fn tail_start(&mut self, table: &Table, from: i64) -> Result<Option<i64>, DumpError>;

    /// Whether the table holds at least one row.
    async fn has_rows(&mut self, table: &Table) -> Result<bool, DumpError>;
}

fn boundary_sql(table: &Table, key: &str, chunk_size: u64) -> String {
    format!(
        "SELECT `{key}` FROM {} WHERE `{key}` >= ? LIMIT 1 OFFSET {chunk_size}",
        table.full_name()
    )
}

fn tail_sql(table: &Table, key: &str) -> String {
    format!(
        "SELECT `{key}` FROM {} WHERE `{key}` >= ? LIMIT 1",
        table.full_name()
    )
}

fn chunk_key(table: &Table) -> Result<&str, DumpError> {
    table
        .chunk_key()
        .ok_or_else(|| DumpError::plan(table.qualified_name(), "table has no chunk key"))
}

#[async_trait]
impl KeyProbe for Conn {
    async fn next_boundary(
        &mut self,
        table: &Table,
        from: i64,
        chunk_size: u64,
    ) -> Result<Option<i64>, DumpError> {
        let key = chunk_key(table)?;
        self.exec_first(boundary_sql(table, key, chunk_size), (from,))
            .await
            .map_err(|e| DumpError::plan(table.qualified_name(), e))
    }

    async fn tail_start(&mut self, table: &Table, from: i64) -> Result<Option<i64>, DumpError> {
        let key = chunk_key(table)?;
        self.exec_first(tail_sql(table, key), (from,))
            .await
            .map_err(|e| DumpError::plan(table.qualified_name(), e))
    }

    async fn has_rows(&mut self, table: &Table) -> Result<bool, DumpError> {
        let row: Option<i64> = self
            .query_first(format!("SELECT 1 FROM {} LIMIT 1", table.full_name()))
            .await
            .map_err(|e| DumpError::plan(table.qualified_name(), e))?;
        Ok(row.is_some())
    }
}

/// Planning outcome for one table, reported back for the run summary.
#[derive(Debug)]
pub struct PlannedTable {
    pub table: String,
    pub chunks: u64,
}

/// Binds one table to the per-run chunking parameters and walks its key
/// space, emitting chunk plans into the bounded queue.
pub struct Task {
    pub table: Arc<Table>,
    chunk_size: u64,
    chunk_min: i64,
    chunk_max: i64,
    total_chunks: u64,
    where_condition: Option<String>,
}

impl Task {
    pub fn new(table: Arc<Table>, config: &DumpConfig) -> Task {
        let where_condition = config
            .where_for(&table.qualified_name())
            .map(str::to_string);
        Task {
            table,
            chunk_size: config.chunk_size,
            chunk_min: 0,
            chunk_max: 0,
            total_chunks: 0,
            where_condition,
        }
    }

    pub fn log_estimate(&self) {
        let estimated_chunks = self.table.est_rows / self.chunk_size + 1;
        info!(
            table = %self.table.qualified_name(),
            engine = %self.table.engine,
            estimated_chunks,
            "Table queued for dump."
        );
    }

    /// Produce this table's chunk sequence. Ranges are emitted until the
    /// look-ahead probe runs dry, then one open-ended tail covers whatever
    /// remains. "No rows" from a probe is the normal end of planning, not
    /// an error.
    pub async fn plan_chunks(
        mut self,
        probe: &mut (impl KeyProbe + Send),
        queue: mpsc::Sender<Chunk>,
        counters: Arc<RunCounters>,
        policy: UnkeyedTablePolicy,
        cancel: CancellationToken,
    ) -> Result<PlannedTable, DumpError> {
        if self.table.chunk_key().is_none() {
            return self.plan_unkeyed(probe, &queue, &counters, policy, &cancel).await;
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match probe
                .next_boundary(&self.table, self.chunk_max, self.chunk_size)
                .await?
            {
                Some(bound) => {
                    self.chunk_max = bound;
                    self.total_chunks += 1;
                    let chunk = Chunk::range(
                        self.table.clone(),
                        self.total_chunks,
                        self.chunk_min,
                        self.chunk_max,
                        self.where_condition.clone(),
                    );
                    self.emit(chunk, &queue, &counters, &cancel).await?;
                    self.chunk_min = self.chunk_max + 1;
                }
                None => {
                    if probe.tail_start(&self.table, self.chunk_min).await?.is_some() {
                        self.total_chunks += 1;
                        let chunk = Chunk::tail(
                            self.table.clone(),
                            self.total_chunks,
                            self.chunk_min,
                            self.where_condition.clone(),
                        );
                        self.emit(chunk, &queue, &counters, &cancel).await?;
                    }
                    break;
                }
            }
        }

        debug!(
            table = %self.table.qualified_name(),
            chunks = self.total_chunks,
            "Table planned."
        );
        Ok(PlannedTable {
            table: self.table.qualified_name(),
            chunks: self.total_chunks,
        })
    }

    async fn plan_unkeyed(
        mut self,
        probe: &mut (impl KeyProbe + Send),
        queue: &mpsc::Sender<Chunk>,
        counters: &RunCounters,
        policy: UnkeyedTablePolicy,
        cancel: &CancellationToken,
    ) -> Result<PlannedTable, DumpError> {
        match policy {
            UnkeyedTablePolicy::SingleChunk => {
                debug!(
                    table = %self.table.qualified_name(),
                    "No usable primary or unique key, dumping as a single chunk."
                );
                if probe.has_rows(&self.table).await? {
                    self.total_chunks = 1;
                    let chunk = Chunk::single(self.table.clone(), self.where_condition.clone());
                    self.emit(chunk, queue, counters, cancel).await?;
                }
                Ok(PlannedTable {
                    table: self.table.qualified_name(),
                    chunks: self.total_chunks,
                })
            }
            UnkeyedTablePolicy::Error => Err(DumpError::metadata(
                self.table.qualified_name(),
                "table has no usable primary or unique key and tables-without-uniquekey is \"error\"",
            )),
        }
    }

    async fn emit(
        &self,
        chunk: Chunk,
        queue: &mpsc::Sender<Chunk>,
        counters: &RunCounters,
        cancel: &CancellationToken,
    ) -> Result<(), DumpError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DumpError::Interrupted),
            sent = queue.send(chunk) => {
                sent.map_err(|_| DumpError::plan(self.table.qualified_name(), "chunk queue closed"))?;
            }
        }
        counters.enqueued();
        Ok(())
    }
}
