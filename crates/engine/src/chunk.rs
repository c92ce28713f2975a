use crate::table::Table;
use mysql_async::{Params, Value};
use std::sync::Arc;

/// The shape of one key-range fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// The whole table in one query. Only used for tables without a chunk
    /// key, and mutually exclusive with the other kinds.
    Single,
    /// `min <= key <= max`.
    Range { min: i64, max: i64 },
    /// `key >= min`, the final open-ended range of a table.
    Tail { min: i64 },
}

/// An immutable description of one chunk fetch, produced by the planner and
/// executed by a worker.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub table: Arc<Table>,
    /// 1-based, dense within a table.
    pub sequence: u64,
    pub kind: ChunkKind,
    /// Extra filter AND-combined with the key predicate.
    where_condition: Option<String>,
}

impl Chunk {
    pub fn single(table: Arc<Table>, where_condition: Option<String>) -> Chunk {
        Chunk {
            table,
            sequence: 1,
            kind: ChunkKind::Single,
            where_condition,
        }
    }

    pub fn range(
        table: Arc<Table>,
        sequence: u64,
        min: i64,
        max: i64,
        where_condition: Option<String>,
    ) -> Chunk {
        debug_assert!(min <= max);
        Chunk {
            table,
            sequence,
            kind: ChunkKind::Range { min, max },
            where_condition,
        }
    }

    pub fn tail(table: Arc<Table>, sequence: u64, min: i64, where_condition: Option<String>) -> Chunk {
        Chunk {
            table,
            sequence,
            kind: ChunkKind::Tail { min },
            where_condition,
        }
    }

    pub fn is_single(&self) -> bool {
        self.kind == ChunkKind::Single
    }

    /// The prepared statement text for this chunk. Workers reuse the
    /// previous statement as long as this text is unchanged.
    pub fn select_sql(&self) -> String {
        let mut sql = format!(
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM {}",
            self.table.full_name()
        );

        let key = self.table.chunk_key();
        let mut predicates = Vec::new();
        match self.kind {
            ChunkKind::Single => {}
            ChunkKind::Range { .. } => {
                if let Some(key) = key {
                    predicates.push(format!("`{key}` BETWEEN ? AND ?"));
                }
            }
            ChunkKind::Tail { .. } => {
                if let Some(key) = key {
                    predicates.push(format!("`{key}` >= ?"));
                }
            }
        }
        if let Some(condition) = &self.where_condition {
            predicates.push(format!("({condition})"));
        }
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if !self.is_single() {
            if let Some(key) = key {
                sql.push_str(&format!(" ORDER BY `{key}`"));
            }
        }
        sql
    }

    /// Bind values for [`select_sql`](Chunk::select_sql).
    pub fn params(&self) -> Params {
        match self.kind {
            ChunkKind::Single => Params::Empty,
            ChunkKind::Range { min, max } => {
                Params::Positional(vec![Value::Int(min), Value::Int(max)])
            }
            ChunkKind::Tail { min } => Params::Positional(vec![Value::Int(min)]),
        }
    }

    /// The comment line written above the chunk's rows.
    pub fn header_comment(&self) -> String {
        match self.kind {
            ChunkKind::Single => {
                format!("-- Single chunk on {}\n", self.table.qualified_name())
            }
            ChunkKind::Range { min, max } => {
                format!("-- Chunk {} - from {} to {}\n", self.sequence, min, max)
            }
            ChunkKind::Tail { min } => {
                format!("-- Chunk {} - from {} to 0\n", self.sequence, min)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_table() -> Arc<Table> {
        Arc::new(Table::stub("shop", "orders", Some("id")))
    }

    fn keyless_table() -> Arc<Table> {
        Arc::new(Table::stub("shop", "audit", None))
    }

    #[test]
    fn test_range_sql_and_params() {
        let chunk = Chunk::range(keyed_table(), 2, 1001, 2000, None);
        assert_eq!(
            chunk.select_sql(),
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`orders` \
             WHERE `id` BETWEEN ? AND ? ORDER BY `id`"
        );
        assert_eq!(
            chunk.params(),
            Params::Positional(vec![Value::Int(1001), Value::Int(2000)])
        );
    }

    #[test]
    fn test_tail_sql_and_params() {
        let chunk = Chunk::tail(keyed_table(), 4, 7501, None);
        assert_eq!(
            chunk.select_sql(),
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`orders` \
             WHERE `id` >= ? ORDER BY `id`"
        );
        assert_eq!(chunk.params(), Params::Positional(vec![Value::Int(7501)]));
    }

    #[test]
    fn test_single_sql_has_no_predicate_or_order() {
        let chunk = Chunk::single(keyless_table(), None);
        assert_eq!(
            chunk.select_sql(),
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`audit`"
        );
        assert_eq!(chunk.params(), Params::Empty);
    }

    #[test]
    fn test_where_condition_is_and_combined() {
        let chunk = Chunk::range(keyed_table(), 1, 0, 100, Some("status = 'paid'".into()));
        assert_eq!(
            chunk.select_sql(),
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`orders` \
             WHERE `id` BETWEEN ? AND ? AND (status = 'paid') ORDER BY `id`"
        );

        let single = Chunk::single(keyless_table(), Some("status = 'paid'".into()));
        assert_eq!(
            single.select_sql(),
            "SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`audit` WHERE (status = 'paid')"
        );
    }

    #[test]
    fn test_header_comments() {
        assert_eq!(
            Chunk::range(keyed_table(), 1, 0, 2500, None).header_comment(),
            "-- Chunk 1 - from 0 to 2500\n"
        );
        assert_eq!(
            Chunk::tail(keyed_table(), 4, 7501, None).header_comment(),
            "-- Chunk 4 - from 7501 to 0\n"
        );
        assert_eq!(
            Chunk::single(keyless_table(), None).header_comment(),
            "-- Single chunk on shop.audit\n"
        );
    }
}
