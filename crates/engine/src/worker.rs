use crate::{
    chunk::Chunk,
    config::DumpConfig,
    encoder::InsertWriter,
    error::DumpError,
    manager::{sink_options, RunCounters},
    sink::Sink,
};
use mysql_async::{prelude::*, Conn, Statement};
use std::{
    collections::{hash_map::Entry, HashMap},
    io::Write,
    sync::Arc,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed header of every data file, in replay order.
pub const DATA_FILE_PREAMBLE: &str = "SET NAMES utf8;\n\
SET GLOBAL MAX_ALLOWED_PACKET=1073741824;\n\
SET TIME_ZONE='+00:00';\n\
SET UNIQUE_CHECKS=0;\n\
SET FOREIGN_KEY_CHECKS=0;\n\
SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO';\n";

/// Data file for one table as seen by one worker. Single-chunk tables get
/// the bare name since exactly one worker will ever touch them.
fn data_file_name(qualified_table: &str, single_chunk: bool, worker_id: usize) -> String {
    if single_chunk {
        format!("{qualified_table}.sql")
    } else {
        format!("{qualified_table}-thread{worker_id}.sql")
    }
}

fn open_table_sink(
    config: &DumpConfig,
    qualified_table: &str,
    single_chunk: bool,
    worker_id: usize,
) -> Result<Sink, DumpError> {
    let path = config
        .destination_dir
        .join(data_file_name(qualified_table, single_chunk, worker_id));
    let mut sink = Sink::create(&path, &sink_options(config))
        .map_err(|e| DumpError::sink(path.display(), e))?;
    sink.write_all(DATA_FILE_PREAMBLE.as_bytes())
        .map_err(|e| DumpError::sink(path.display(), e))?;
    Ok(sink)
}

/// One consumer of the chunk queue, bound to one connection whose snapshot
/// transaction was begun by the task manager before any chunk existed.
pub struct Worker {
    id: usize,
    conn: Conn,
    config: Arc<DumpConfig>,
    sinks: HashMap<String, Sink>,
    /// Statement cache: kept as long as the rendered SQL text is unchanged.
    prepared: Option<(String, Statement)>,
}

impl Worker {
    pub fn new(id: usize, conn: Conn, config: Arc<DumpConfig>) -> Worker {
        Worker {
            id,
            conn,
            config,
            sinks: HashMap::new(),
            prepared: None,
        }
    }

    /// Drain the queue until it closes, then commit and close the sinks.
    /// On cancellation the current chunk is finished, the transaction is
    /// rolled back, and the sinks are still closed.
    pub async fn run(
        mut self,
        queue: Arc<Mutex<mpsc::Receiver<Chunk>>>,
        counters: Arc<RunCounters>,
        cancel: CancellationToken,
    ) -> Result<(), DumpError> {
        loop {
            let chunk = {
                let mut receiver = queue.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    chunk = receiver.recv() => chunk,
                }
            };
            let Some(chunk) = chunk else {
                break;
            };
            counters.dequeued();
            self.dump_chunk(&chunk).await?;
        }
        debug!(
            worker = self.id,
            cancelled = cancel.is_cancelled(),
            "Worker exiting."
        );
        self.finish(cancel.is_cancelled()).await
    }

    async fn dump_chunk(&mut self, chunk: &Chunk) -> Result<(), DumpError> {
        let table_key = chunk.table.qualified_name();
        let statement = self.prepare(&table_key, chunk.select_sql()).await?;

        let sink = match self.sinks.entry(table_key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => {
                let sink =
                    open_table_sink(&self.config, &table_key, chunk.is_single(), self.id)?;
                debug!(worker = self.id, path = %sink.path().display(), "Opened data file.");
                slot.insert(sink)
            }
        };
        let sink_path = sink.path().display().to_string();

        if !self.config.skip_use_database {
            write!(sink, "USE {};\n", chunk.table.escaped_schema())
                .map_err(|e| DumpError::sink(&sink_path, e))?;
        }
        sink.write_all(chunk.header_comment().as_bytes())
            .map_err(|e| DumpError::sink(&sink_path, e))?;

        let mut result = self
            .conn
            .exec_iter(&statement, chunk.params())
            .await
            .map_err(|e| DumpError::stream(&table_key, e))?;

        let table_name = chunk.table.escaped_name();
        let mut insert = InsertWriter::new(&mut *sink, &table_name);
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| DumpError::stream(&table_key, e))?
        {
            insert
                .write_row(row)
                .map_err(|e| DumpError::sink(&sink_path, e))?;
        }
        let rows = insert.finish().map_err(|e| DumpError::sink(&sink_path, e))?;
        drop(result);

        sink.flush().map_err(|e| DumpError::sink(&sink_path, e))?;
        debug!(
            worker = self.id,
            table = %table_key,
            sequence = chunk.sequence,
            rows,
            "Chunk written."
        );
        Ok(())
    }

    async fn prepare(&mut self, table: &str, sql: String) -> Result<Statement, DumpError> {
        if let Some((cached_sql, statement)) = &self.prepared {
            if *cached_sql == sql {
                return Ok(statement.clone());
            }
        }
        if let Some((_, stale)) = self.prepared.take() {
            // Best effort; a failed deallocation does not hurt the dump.
            let _ = self.conn.close(stale).await;
        }
        let statement = self
            .conn
            .prep(&sql)
            .await
            .map_err(|e| DumpError::stream(table, e))?;
        self.prepared = Some((sql, statement.clone()));
        Ok(statement)
    }

    async fn finish(mut self, cancelled: bool) -> Result<(), DumpError> {
        let end = if cancelled { "ROLLBACK" } else { "COMMIT" };
        self.conn
            .query_drop(end)
            .await
            .map_err(|e| DumpError::snapshot(format!("worker {} {end} failed: {e}", self.id)))?;

        for (_, mut sink) in self.sinks.drain() {
            let path = sink.path().display().to_string();
            sink.close().map_err(|e| DumpError::sink(path, e))?;
        }
        let _ = self.conn.disconnect().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_data_file_naming() {
        assert_eq!(data_file_name("db.t", true, 3), "db.t.sql");
        assert_eq!(data_file_name("db.t", false, 0), "db.t-thread0.sql");
        assert_eq!(data_file_name("db.t", false, 7), "db.t-thread7.sql");
    }

    #[test]
    fn test_preamble_statement_order() {
        let statements: Vec<&str> = DATA_FILE_PREAMBLE.lines().collect();
        assert_eq!(
            statements,
            vec![
                "SET NAMES utf8;",
                "SET GLOBAL MAX_ALLOWED_PACKET=1073741824;",
                "SET TIME_ZONE='+00:00';",
                "SET UNIQUE_CHECKS=0;",
                "SET FOREIGN_KEY_CHECKS=0;",
                "SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO';",
            ]
        );
    }

    #[test]
    fn test_table_sink_starts_with_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpConfig {
            destination_dir: dir.path().to_path_buf(),
            ..DumpConfig::default()
        };

        let mut sink = open_table_sink(&config, "db.t", false, 1).unwrap();
        sink.close().unwrap();

        let content = std::fs::read_to_string(dir.path().join("db.t-thread1.sql")).unwrap();
        assert_eq!(content, DATA_FILE_PREAMBLE);
    }

    #[test]
    fn test_table_sink_honors_compression() {
        let dir = tempfile::tempdir().unwrap();
        let config = DumpConfig {
            destination_dir: dir.path().to_path_buf(),
            compress: true,
            compress_level: 4,
            ..DumpConfig::default()
        };

        let mut sink = open_table_sink(&config, "db.t", true, 0).unwrap();
        let expected: PathBuf = dir.path().join("db.t.sql.gz");
        assert_eq!(sink.path(), expected);
        sink.close().unwrap();
        assert!(expected.exists());
    }
}
