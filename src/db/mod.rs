mod schema;


use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::debug;

pub use schema::{ColumnSpec, ID_LOOKUP_BATCH, TableSpec, quote_ident, validate_identifier};

/// One row bound for a destination table: metadata values in column order, then tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub values: Vec<Option<String>>,
    pub tags: Vec<bool>,
}

/// Database wrapper for a destination store.
///
/// One instance means one writer connection; nothing here locks against other
/// processes appending to the same table.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens an in-memory SQLite database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Opens a file-based SQLite database at the given path.
    ///
    /// Creates the database file if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Creates the destination table if it is absent.
    ///
    /// Existing tables are kept as they are, rows included.
    pub fn ensure_table(&self, spec: &TableSpec) -> Result<()> {
        self.conn
            .execute(&spec.create_statement(), [])
            .with_context(|| format!("Failed to create table {}", spec.name))?;
        Ok(())
    }

    /// Returns which of `ids` already exist in the table's identifier column.
    ///
    /// Lookups are batched with `IN (...)` lists of at most [`ID_LOOKUP_BATCH`] ids.
    pub fn existing_ids(&self, spec: &TableSpec, ids: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        if ids.is_empty() {
            return Ok(found);
        }

        let id = quote_ident(&spec.id_column);
        let table = quote_ident(&spec.name);
        for batch in ids.chunks(ID_LOOKUP_BATCH) {
            let placeholders: Vec<String> = (0..batch.len()).map(|_| "?".to_string()).collect();
            let query = format!(
                "SELECT CAST({id} AS TEXT) FROM {table} WHERE {id} IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = self
                .conn
                .prepare_cached(&query)
                .context("Failed to prepare id lookup")?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(batch.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .context("Failed to query existing ids")?;
            for row in rows {
                found.insert(row.context("Failed to read id")?);
            }
        }

        debug!(table = %spec.name, candidates = ids.len(), existing = found.len(), "id lookup");
        Ok(found)
    }

    /// Appends rows in a single transaction and returns how many were written.
    pub fn append_rows(&mut self, spec: &TableSpec, rows: &[TableRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx
                .prepare(&spec.insert_statement())
                .with_context(|| format!("Failed to prepare insert into {}", spec.name))?;
            for row in rows {
                let params: Vec<Value> = row
                    .values
                    .iter()
                    .map(|v| match v {
                        Some(text) => Value::Text(text.clone()),
                        None => Value::Null,
                    })
                    .chain(row.tags.iter().map(|t| Value::Integer(i64::from(*t))))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(params))
                    .with_context(|| format!("Failed to insert into {}", spec.name))?;
            }
        }
        tx.commit().context("Failed to commit append")?;
        Ok(rows.len())
    }

    /// Counts rows in a table.
    pub fn row_count(&self, table: &str) -> Result<u64> {
        validate_identifier(table)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
