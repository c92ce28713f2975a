use crate::error::DumpError;
use mysql_async::{prelude::*, Conn};
use tracing::debug;

/// Key columns usable for chunking: integer family or timestamp, declared
/// as primary, unique, or the first column of an index.
const COLUMN_CANDIDATES_SQL: &str = "SELECT COLUMN_NAME, COLUMN_KEY \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
       AND COLUMN_KEY IN ('PRI', 'UNI', 'MUL') \
       AND DATA_TYPE IN ('tinyint', 'smallint', 'int', 'mediumint', 'bigint', 'timestamp') \
     ORDER BY ORDINAL_POSITION";

const TABLE_INFORMATION_SQL: &str = "SELECT ENGINE, TABLE_COLLATION, DATA_LENGTH, INDEX_LENGTH, TABLE_ROWS \
     FROM information_schema.TABLES \
     WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = ? AND TABLE_NAME = ?";

/// A base table selected for the dump: identity, verbatim DDL, engine and
/// size estimates, and the key candidates that decide whether it can be
/// split into ranges.
#[derive(Debug, Clone)]
pub struct Table {
    schema: String,
    name: String,
    pub create_table_sql: String,
    pub engine: String,
    pub collation: String,
    pub est_rows: u64,
    pub est_data_size: u64,
    pub est_index_size: u64,
    primary_key: Vec<String>,
    unique_key: Vec<String>,
    chunk_key: Option<String>,
}

impl Table {
    /// Populate the descriptor in one pass over `SHOW CREATE TABLE` and
    /// `information_schema`. Any missing piece is fatal for the run.
    pub async fn load(conn: &mut Conn, schema: &str, name: &str) -> Result<Table, DumpError> {
        let mut table = Table {
            schema: schema.to_string(),
            name: name.to_string(),
            create_table_sql: String::new(),
            engine: String::new(),
            collation: String::new(),
            est_rows: 0,
            est_data_size: 0,
            est_index_size: 0,
            primary_key: Vec::new(),
            unique_key: Vec::new(),
            chunk_key: None,
        };
        let qualified = table.qualified_name();

        let ddl: Option<(String, String)> = conn
            .query_first(format!("SHOW CREATE TABLE {}", table.full_name()))
            .await
            .map_err(|e| DumpError::metadata(&qualified, e))?;
        table.create_table_sql = ddl
            .ok_or_else(|| DumpError::metadata(&qualified, "SHOW CREATE TABLE returned nothing"))?
            .1;

        let info: Option<(Option<String>, Option<String>, Option<u64>, Option<u64>, Option<u64>)> =
            conn.exec_first(TABLE_INFORMATION_SQL, (schema, name))
                .await
                .map_err(|e| DumpError::metadata(&qualified, e))?;
        let (engine, collation, data_length, index_length, rows) = info.ok_or_else(|| {
            DumpError::metadata(&qualified, "table not found in information_schema.TABLES")
        })?;
        table.engine = engine.unwrap_or_default();
        table.collation = collation.unwrap_or_default();
        table.est_data_size = data_length.unwrap_or(0);
        table.est_index_size = index_length.unwrap_or(0);
        table.est_rows = rows.unwrap_or(0);

        let candidates: Vec<(String, String)> = conn
            .exec(COLUMN_CANDIDATES_SQL, (schema, name))
            .await
            .map_err(|e| DumpError::metadata(&qualified, e))?;
        for (column, key) in candidates {
            match key.as_str() {
                "PRI" => table.primary_key.push(column),
                "UNI" => table.unique_key.push(column),
                // MUL columns cannot guarantee disjoint ranges.
                _ => {}
            }
        }
        table.chunk_key = select_chunk_key(&table.primary_key, &table.unique_key);

        debug!(
            table = %qualified,
            engine = %table.engine,
            est_rows = table.est_rows,
            chunk_key = table.chunk_key.as_deref().unwrap_or("<none>"),
            "Table descriptor loaded."
        );
        Ok(table)
    }

    /// `` `schema`.`table` ``
    pub fn full_name(&self) -> String {
        format!("`{}`.`{}`", self.schema, self.name)
    }

    /// `` `table` ``
    pub fn escaped_name(&self) -> String {
        format!("`{}`", self.name)
    }

    /// `` `schema` ``
    pub fn escaped_schema(&self) -> String {
        format!("`{}`", self.schema)
    }

    /// `schema.table`, unescaped, used for file names and messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column the planner splits this table on, when one exists.
    pub fn chunk_key(&self) -> Option<&str> {
        self.chunk_key.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn stub(schema: &str, name: &str, chunk_key: Option<&str>) -> Table {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
            create_table_sql: format!("CREATE TABLE `{name}` (`id` int NOT NULL)"),
            engine: "InnoDB".to_string(),
            collation: "utf8mb4_general_ci".to_string(),
            est_rows: 0,
            est_data_size: 0,
            est_index_size: 0,
            primary_key: chunk_key.map(str::to_string).into_iter().collect(),
            unique_key: Vec::new(),
            chunk_key: chunk_key.map(str::to_string),
        }
    }
}

/// Deterministic chunk-key selection, first match wins: a single-column
/// primary key, then the first unique-key column, otherwise none.
fn select_chunk_key(primary_key: &[String], unique_key: &[String]) -> Option<String> {
    if primary_key.len() == 1 {
        return Some(primary_key[0].clone());
    }
    unique_key.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_single_column_primary_key_wins() {
        assert_eq!(
            select_chunk_key(&keys(&["id"]), &keys(&["uuid"])),
            Some("id".to_string())
        );
    }

    #[test]
    fn test_composite_primary_key_falls_back_to_unique() {
        assert_eq!(
            select_chunk_key(&keys(&["tenant", "id"]), &keys(&["serial"])),
            Some("serial".to_string())
        );
    }

    #[test]
    fn test_no_usable_key() {
        assert_eq!(select_chunk_key(&keys(&["a", "b"]), &[]), None);
        assert_eq!(select_chunk_key(&[], &[]), None);
    }

    #[test]
    fn test_name_escaping() {
        let table = Table::stub("shop", "orders", Some("id"));
        assert_eq!(table.full_name(), "`shop`.`orders`");
        assert_eq!(table.escaped_name(), "`orders`");
        assert_eq!(table.escaped_schema(), "`shop`");
        assert_eq!(table.qualified_name(), "shop.orders");
    }
}
