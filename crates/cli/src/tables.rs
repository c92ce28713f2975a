use crate::error::CliError;
use mysql_async::{prelude::*, Conn};
use std::collections::{HashMap, HashSet};

/// Parse a `--tables schema.table,schema.table` list, keeping the given
/// order and dropping duplicates.
pub fn parse_table_list(input: &str) -> Result<Vec<(String, String)>, CliError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for entry in input.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((schema, table)) = entry.split_once('.') else {
            return Err(CliError::Flag(format!(
                "table \"{entry}\" must be written as schema.table"
            )));
        };
        if seen.insert(entry.to_string()) {
            targets.push((schema.to_string(), table.to_string()));
        }
    }
    if targets.is_empty() {
        return Err(CliError::Flag("--tables selected no tables".into()));
    }
    Ok(targets)
}

/// Every base table of the given comma-separated databases.
pub async fn tables_from_databases(
    conn: &mut Conn,
    databases: &str,
) -> Result<Vec<(String, String)>, CliError> {
    let mut targets = Vec::new();
    for database in databases.split(',') {
        let database = database.trim();
        if database.is_empty() {
            continue;
        }
        let tables: Vec<String> = conn
            .exec(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                (database,),
            )
            .await?;
        targets.extend(
            tables
                .into_iter()
                .map(|table| (database.to_string(), table)),
        );
    }
    Ok(targets)
}

/// Every base table on the server, minus the server's own bookkeeping
/// tables that cannot or should not be dumped.
pub async fn tables_from_all_databases(conn: &mut Conn) -> Result<Vec<(String, String)>, CliError> {
    let targets = conn
        .query(
            "SELECT TABLE_SCHEMA, TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' \
               AND TABLE_SCHEMA NOT IN ('performance_schema', 'information_schema', 'sys') \
               AND NOT (TABLE_SCHEMA = 'mysql' \
                        AND TABLE_NAME IN ('slow_log', 'general_log')) \
             ORDER BY TABLE_SCHEMA, TABLE_NAME",
        )
        .await?;
    Ok(targets)
}

/// Split a `--where` value into per-table conditions and a global fallback.
///
/// `users:age > 18,posts:published = 1` assigns conditions per table (keys
/// may be `table` or `schema.table`); a value without `:` applies to every
/// table.
pub fn parse_where_option(value: &str) -> (HashMap<String, String>, Option<String>) {
    if !value.contains(':') {
        return (HashMap::new(), Some(value.trim().to_string()));
    }
    let mut conditions = HashMap::new();
    for part in value.split(',') {
        if let Some((table, condition)) = part.trim().split_once(':') {
            conditions.insert(table.trim().to_string(), condition.trim().to_string());
        }
    }
    (conditions, None)
}
