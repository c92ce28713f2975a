use crate::error::DumpError;
use mysql_async::{prelude::*, Conn, Row, Value};
use std::fmt::Write;
use tracing::{info, warn};

/// Binary-log coordinates of the server at snapshot time, written to
/// `master-data.sql` so the dump can seed a replica.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MasterStatus {
    pub file: String,
    pub position: u64,
    pub binlog_do_db: String,
    pub binlog_ignore_db: String,
    pub executed_gtid_set: Option<String>,
}

impl MasterStatus {
    pub async fn capture(conn: &mut Conn) -> Result<MasterStatus, DumpError> {
        info!("Getting master status");
        let rows: Vec<Row> = conn
            .query("SHOW MASTER STATUS")
            .await
            .map_err(DumpError::snapshot)?;
        let row = rows.into_iter().next().ok_or_else(|| {
            DumpError::snapshot(
                "SHOW MASTER STATUS returned nothing; enable the binary log \
                 or run with --master-data=false",
            )
        })?;
        let (names, values) = split_row(row);
        Ok(MasterStatus::from_columns(&names, &values))
    }

    fn from_columns(names: &[String], values: &[Value]) -> MasterStatus {
        let mut status = MasterStatus::default();
        for (name, value) in names.iter().zip(values) {
            match name.to_uppercase().as_str() {
                "FILE" => status.file = text(value),
                "POSITION" => status.position = unsigned(value),
                "BINLOG_DO_DB" => status.binlog_do_db = text(value),
                "BINLOG_IGNORE_DB" => status.binlog_ignore_db = text(value),
                "EXECUTED_GTID_SET" => status.executed_gtid_set = Some(text(value)),
                other => {
                    warn!(column = other, "Unknown SHOW MASTER STATUS column, ignoring.");
                }
            }
        }
        status
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Master File: {}", self.file);
        let _ = writeln!(out, "Master Position: {}", self.position);
        let _ = writeln!(out, "Binlog Do DB: {}", self.binlog_do_db);
        let _ = writeln!(out, "Binlog Ignore DB: {}", self.binlog_ignore_db);
        if let Some(gtid_set) = &self.executed_gtid_set {
            let _ = writeln!(out, "Executed Gtid Set: {gtid_set}");
        }
        out
    }
}

/// One replication channel of the server we are dumping from. Plain
/// replicas have exactly one with an empty connection name; multi-source
/// replicas have one per upstream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SlaveChannel {
    pub connection_name: String,
    pub master_host: String,
    pub master_port: u64,
    pub relay_master_log_file: String,
    pub exec_master_log_pos: u64,
    pub executed_gtid_set: Option<String>,
    pub gtid_slave_pos: Option<String>,
}

#[derive(Debug, Default)]
pub struct SlaveStatus {
    pub channels: Vec<SlaveChannel>,
}

impl SlaveStatus {
    pub async fn capture(conn: &mut Conn) -> Result<SlaveStatus, DumpError> {
        info!("Getting slave status");
        let query = if is_multi_source(conn).await {
            "SHOW ALL SLAVES STATUS"
        } else {
            "SHOW SLAVE STATUS"
        };
        let rows: Vec<Row> = conn.query(query).await.map_err(DumpError::snapshot)?;

        let channels: Vec<SlaveChannel> = rows
            .into_iter()
            .map(|row| {
                let (names, values) = split_row(row);
                SlaveChannel::from_columns(&names, &values)
            })
            .collect();

        if channels.is_empty() {
            return Err(DumpError::snapshot(
                "no slave information; make sure the server is acting as a replica \
                 or run without --slave-data",
            ));
        }
        Ok(SlaveStatus { channels })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for channel in &self.channels {
            let _ = writeln!(out, "Connection Name: {}", channel.connection_name);
            let _ = writeln!(out, "  Relay Master Log File: {}", channel.relay_master_log_file);
            let _ = writeln!(out, "  Master Host: {}", channel.master_host);
            let _ = writeln!(out, "  Master Port: {}", channel.master_port);
            let _ = writeln!(out, "  Exec Master Log Pos: {}", channel.exec_master_log_pos);
            if let Some(gtid_set) = &channel.executed_gtid_set {
                let _ = writeln!(out, "  Executed GTID Set: {gtid_set}");
            }
            if let Some(gtid_pos) = &channel.gtid_slave_pos {
                let _ = writeln!(out, "  GTID Slave Pos: {gtid_pos}");
            }
        }
        out
    }
}

impl SlaveChannel {
    fn from_columns(names: &[String], values: &[Value]) -> SlaveChannel {
        let mut channel = SlaveChannel::default();
        for (name, value) in names.iter().zip(values) {
            match name.to_uppercase().as_str() {
                "CONNECTION_NAME" => channel.connection_name = text(value),
                "MASTER_HOST" => channel.master_host = text(value),
                "MASTER_PORT" => channel.master_port = unsigned(value),
                "RELAY_MASTER_LOG_FILE" => channel.relay_master_log_file = text(value),
                "EXEC_MASTER_LOG_POS" => channel.exec_master_log_pos = unsigned(value),
                "EXECUTED_GTID_SET" => channel.executed_gtid_set = Some(text(value)),
                "GTID_SLAVE_POS" => channel.gtid_slave_pos = Some(text(value)),
                // SHOW SLAVE STATUS has dozens of columns we do not record.
                _ => {}
            }
        }
        channel
    }
}

/// MariaDB multi-source replicas answer `@@default_master_connection`;
/// everything else errors, which routes us to plain `SHOW SLAVE STATUS`.
async fn is_multi_source(conn: &mut Conn) -> bool {
    conn.query_drop("SELECT @@default_master_connection")
        .await
        .is_ok()
}

fn split_row(row: Row) -> (Vec<String>, Vec<Value>) {
    let names = row
        .columns_ref()
        .iter()
        .map(|column| column.name_str().to_string())
        .collect();
    (names, row.unwrap())
}

/// Status columns arrive over the text protocol, so numbers usually show up
/// as byte strings.
fn text(value: &Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

fn unsigned(value: &Value) -> u64 {
    match value {
        Value::Int(n) => u64::try_from(*n).unwrap_or(0),
        Value::UInt(n) => *n,
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_master_status_from_columns_and_render() {
        let status = MasterStatus::from_columns(
            &names(&[
                "File",
                "Position",
                "Binlog_Do_DB",
                "Binlog_Ignore_DB",
                "Executed_Gtid_Set",
            ]),
            &[
                Value::Bytes(b"binlog.000042".to_vec()),
                Value::Bytes(b"4711".to_vec()),
                Value::Bytes(b"".to_vec()),
                Value::Bytes(b"".to_vec()),
                Value::Bytes(b"3e11fa47-71ca-11e1-9e33-c80aa9429562:1-100".to_vec()),
            ],
        );
        assert_eq!(status.file, "binlog.000042");
        assert_eq!(status.position, 4711);
        assert_eq!(
            status.executed_gtid_set.as_deref(),
            Some("3e11fa47-71ca-11e1-9e33-c80aa9429562:1-100")
        );

        let rendered = status.render();
        assert!(rendered.contains("Master File: binlog.000042\n"));
        assert!(rendered.contains("Master Position: 4711\n"));
        assert!(rendered
            .contains("Executed Gtid Set: 3e11fa47-71ca-11e1-9e33-c80aa9429562:1-100\n"));
    }

    #[test]
    fn test_master_status_without_gtid_support() {
        let status = MasterStatus::from_columns(
            &names(&["File", "Position"]),
            &[
                Value::Bytes(b"mysql-bin.000007".to_vec()),
                Value::UInt(154),
            ],
        );
        assert_eq!(status.executed_gtid_set, None);
        assert!(!status.render().contains("Executed Gtid Set"));
    }

    #[test]
    fn test_slave_channel_render_per_channel_block() {
        let status = SlaveStatus {
            channels: vec![
                SlaveChannel {
                    connection_name: "shard1".into(),
                    master_host: "db1.internal".into(),
                    master_port: 3306,
                    relay_master_log_file: "binlog.000012".into(),
                    exec_master_log_pos: 98_431,
                    executed_gtid_set: None,
                    gtid_slave_pos: Some("0-1-77".into()),
                },
                SlaveChannel {
                    connection_name: String::new(),
                    master_host: "db2.internal".into(),
                    master_port: 3307,
                    relay_master_log_file: "binlog.000099".into(),
                    exec_master_log_pos: 4,
                    executed_gtid_set: Some("uuid:1-5".into()),
                    gtid_slave_pos: None,
                },
            ],
        };

        let rendered = status.render();
        assert!(rendered.contains("Connection Name: shard1\n"));
        assert!(rendered.contains("  Master Host: db1.internal\n"));
        assert!(rendered.contains("  Exec Master Log Pos: 98431\n"));
        assert!(rendered.contains("  GTID Slave Pos: 0-1-77\n"));
        assert!(rendered.contains("  Master Port: 3307\n"));
        assert!(rendered.contains("  Executed GTID Set: uuid:1-5\n"));
    }

    #[test]
    fn test_unsigned_parses_text_protocol_bytes() {
        assert_eq!(unsigned(&Value::Bytes(b"12345".to_vec())), 12345);
        assert_eq!(unsigned(&Value::UInt(7)), 7);
        assert_eq!(unsigned(&Value::Bytes(b"junk".to_vec())), 0);
    }
}
