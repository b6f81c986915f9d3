use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Destination;
use crate::dataset::{TEXT_COLUMN, Table};
use crate::db::{ColumnSpec, Database, TableRow, TableSpec};
use crate::extrapolate::is_flag_set;

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Rows handed to the store.
    pub candidates: usize,
    /// Rows dropped for repeating an earlier identifier of the same run, or lacking one.
    pub duplicates: usize,
    /// Rows dropped because the destination already holds their identifier.
    pub existing: usize,
    pub written: usize,
}

/// A destination that classified rows are merged into.
pub trait MergeTarget {
    /// Merges rows whose header holds the identifier column, metadata and tag columns.
    fn merge(&mut self, rows: Table) -> Result<StoreReport>;

    /// Human-readable location, recorded in the run ledger.
    fn location(&self) -> String;
}

/// Renames the `text` column to the source's extract field, or drops it.
pub fn finalize_text(table: &mut Table, extract_field: &str, keep_text: bool) {
    if keep_text {
        table.rename_column(TEXT_COLUMN, extract_field);
    } else {
        table.drop_column(TEXT_COLUMN);
    }
}

/// Trims identifiers in place, then drops rows with an empty or already-seen one, keeping
/// first occurrences.
///
/// Returns the number of rows removed.
pub fn dedup_ids(table: &mut Table, id_column: &str) -> Result<usize> {
    let id = table
        .require_column(id_column)
        .with_context(|| format!("Rows have no identifier column '{id_column}'"))?;
    let trimmed = table.rows().iter().map(|row| row[id].trim().to_string()).collect();
    table.set_column(id_column, trimmed)?;

    let before = table.len();
    let mut seen = HashSet::new();
    table.retain_rows(|row| {
        let value = &row[id];
        !value.is_empty() && seen.insert(value.clone())
    });
    Ok(before - table.len())
}

/// Appends to a SQLite table, skipping identifiers it already holds.
///
/// # Examples
///
/// ```
/// use craml::dataset::Table;
/// use craml::db::Database;
/// use craml::store::{MergeTarget, TableStore};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut rows = Table::new(vec!["id".into(), "fraud".into()]);
/// rows.push_row(vec!["7".into(), "1".into()]);
///
/// let mut store = TableStore::new(Database::in_memory()?, "jobs", "id", vec![], &["fraud".into()], rows.headers())?;
/// assert_eq!(store.merge(rows.clone())?.written, 1);
/// assert_eq!(store.merge(rows)?.written, 0);
/// # Ok(())
/// # }
/// ```
pub struct TableStore {
    db: Database,
    spec: TableSpec,
}

impl TableStore {
    /// Creates the table if needed.
    ///
    /// With no configured columns, every non-tag header becomes a `TEXT` column.
    pub fn new(
        db: Database,
        table: &str,
        id_column: &str,
        columns: Vec<ColumnSpec>,
        tags: &[String],
        headers: &[String],
    ) -> Result<Self> {
        let columns = if columns.is_empty() {
            headers
                .iter()
                .filter(|h| !tags.iter().any(|t| t.eq_ignore_ascii_case(h)))
                .map(ColumnSpec::text)
                .collect()
        } else {
            columns
        };
        let spec = TableSpec::new(table, id_column, columns, tags)?;
        db.ensure_table(&spec)?;
        Ok(Self { db, spec })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn to_rows(&self, table: &Table) -> Vec<TableRow> {
        let value_index: Vec<Option<usize>> = self
            .spec
            .columns
            .iter()
            .map(|c| table.column_index(&c.name))
            .collect();
        let tag_index: Vec<Option<usize>> = self
            .spec
            .tags
            .iter()
            .map(|t| {
                table
                    .headers()
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(t))
            })
            .collect();

        let unmapped: Vec<&String> = table
            .headers()
            .iter()
            .filter(|h| {
                !self.spec.columns.iter().any(|c| &c.name == *h)
                    && !self.spec.tags.iter().any(|t| t.eq_ignore_ascii_case(h))
            })
            .collect();
        if !unmapped.is_empty() {
            warn!(table = %self.spec.name, columns = ?unmapped, "columns not in destination table are skipped");
        }

        table
            .rows()
            .iter()
            .map(|row| TableRow {
                values: value_index
                    .iter()
                    .map(|i| i.map(|i| row[i].clone()).filter(|v| !v.is_empty()))
                    .collect(),
                tags: tag_index
                    .iter()
                    .map(|i| i.is_some_and(|i| is_flag_set(&row[i])))
                    .collect(),
            })
            .collect()
    }
}

impl MergeTarget for TableStore {
    fn merge(&mut self, mut rows: Table) -> Result<StoreReport> {
        let candidates = rows.len();
        let id_column = self.spec.id_column.as_str();
        let id = rows
            .require_column(id_column)
            .with_context(|| format!("Rows have no identifier column '{id_column}'"))?;
        let canonical = rows.rows().iter().map(|r| self.spec.canonical_id(&r[id])).collect();
        rows.set_column(id_column, canonical)?;
        let duplicates = dedup_ids(&mut rows, id_column)?;

        let ids: Vec<String> = rows.rows().iter().map(|r| r[id].clone()).collect();
        let existing = self.db.existing_ids(&self.spec, &ids)?;
        rows.retain_rows(|row| !existing.contains(&row[id]));

        let batch = self.to_rows(&rows);
        let written = self.db.append_rows(&self.spec, &batch)?;
        let report = StoreReport {
            candidates,
            duplicates,
            existing: existing.len(),
            written,
        };
        info!(
            table = %self.spec.name,
            candidates,
            duplicates,
            existing = report.existing,
            written,
            "merged into table"
        );
        Ok(report)
    }

    fn location(&self) -> String {
        self.spec.name.clone()
    }
}

/// Writes a flat CSV file. Only identifiers repeated within the run are dropped.
pub struct FileStore {
    path: PathBuf,
    id_column: String,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, id_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id_column: id_column.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MergeTarget for FileStore {
    fn merge(&mut self, mut rows: Table) -> Result<StoreReport> {
        let candidates = rows.len();
        let duplicates = dedup_ids(&mut rows, &self.id_column)?;
        rows.write(&self.path)?;
        info!(file = %self.path.display(), candidates, duplicates, written = rows.len(), "saved to file");
        Ok(StoreReport {
            candidates,
            duplicates,
            existing: 0,
            written: rows.len(),
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Opens the configured destination for rows with the given header.
pub fn open_destination(
    destination: &Destination,
    id_column: &str,
    tags: &[String],
    headers: &[String],
) -> Result<Box<dyn MergeTarget>> {
    match destination {
        Destination::Table {
            database,
            table,
            columns,
        } => {
            crate::utils::ensure_parent_directory(database)?;
            let db = Database::open(database)?;
            let store = TableStore::new(db, table, id_column, columns.clone(), tags, headers)?;
            Ok(Box::new(store))
        }
        Destination::File { path } => Ok(Box::new(FileStore::new(path, id_column))),
    }
}
