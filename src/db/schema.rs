use anyhow::Result;
use serde::{Deserialize, Serialize};

/// SQLite column types accepted for destination columns.
const ALLOWED_TYPES: &[&str] = &["TEXT", "INTEGER", "REAL", "NUMERIC", "BLOB"];

/// Types an identifier column may take; both compare exactly after [`TableSpec::canonical_id`].
const ID_TYPES: &[&str] = &["TEXT", "INTEGER"];

/// Maximum number of bound parameters per `IN (...)` lookup.
pub const ID_LOOKUP_BATCH: usize = 500;

fn default_type() -> String {
    "TEXT".to_string()
}

/// A metadata column of the destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub sql_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, default_type())
    }
}

/// Full layout of a destination table.
///
/// Column order is: metadata columns as configured (the identifier is prepended as
/// `TEXT` if it is not among them), then one `INTEGER NOT NULL` column per tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub id_column: String,
    pub columns: Vec<ColumnSpec>,
    pub tags: Vec<String>,
}

impl TableSpec {
    /// Builds and validates a table layout.
    ///
    /// Tag columns are lower-cased.
    ///
    /// # Errors
    ///
    /// Returns an error if any identifier is not a plain SQL name or a type is unknown.
    pub fn new(
        name: impl Into<String>,
        id_column: impl Into<String>,
        columns: Vec<ColumnSpec>,
        tags: &[String],
    ) -> Result<Self> {
        let name = name.into();
        let id_column = id_column.into();
        validate_identifier(&name)?;
        validate_identifier(&id_column)?;

        let mut columns = columns;
        if !columns.iter().any(|c| c.name == id_column) {
            columns.insert(0, ColumnSpec::text(id_column.clone()));
        }
        for column in &mut columns {
            validate_identifier(&column.name)?;
            let upper = column.sql_type.trim().to_ascii_uppercase();
            if !ALLOWED_TYPES.contains(&upper.as_str()) {
                anyhow::bail!("Unsupported column type '{}' for {}", column.sql_type, column.name);
            }
            column.sql_type = upper;
            if column.name == id_column && !ID_TYPES.contains(&column.sql_type.as_str()) {
                anyhow::bail!(
                    "Identifier column {} must be TEXT or INTEGER, not {}",
                    column.name,
                    column.sql_type
                );
            }
        }

        let tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        for tag in &tags {
            validate_identifier(tag)?;
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(tag)) {
                anyhow::bail!("Tag '{tag}' collides with a metadata column");
            }
        }

        Ok(Self {
            name,
            id_column,
            columns,
            tags,
        })
    }

    /// The form an identifier takes once stored: trimmed and, for an `INTEGER` key holding
    /// an integer, its plain decimal form.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::db::{ColumnSpec, TableSpec};
    ///
    /// let spec = TableSpec::new("jobs", "id", vec![ColumnSpec::new("id", "integer")], &[]).unwrap();
    /// assert_eq!(spec.canonical_id(" 007 "), "7");
    /// assert_eq!(spec.canonical_id("A-7"), "A-7");
    /// ```
    pub fn canonical_id(&self, raw: &str) -> String {
        let raw = raw.trim();
        if self.id_type() == "INTEGER" {
            if let Ok(value) = raw.parse::<i64>() {
                return value.to_string();
            }
        }
        raw.to_string()
    }

    fn id_type(&self) -> &str {
        self.columns
            .iter()
            .find(|c| c.name == self.id_column)
            .map_or("TEXT", |c| c.sql_type.as_str())
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.tags.iter().map(String::as_str))
            .collect()
    }

    pub fn create_statement(&self) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.name == self.id_column {
                    format!("{} {} PRIMARY KEY", quote_ident(&c.name), c.sql_type)
                } else {
                    format!("{} {}", quote_ident(&c.name), c.sql_type)
                }
            })
            .collect();
        defs.extend(
            self.tags
                .iter()
                .map(|t| format!("{} INTEGER NOT NULL", quote_ident(t))),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            defs.join(", ")
        )
    }

    pub fn insert_statement(&self) -> String {
        let names = self.column_names();
        let quoted: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            quoted.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        anyhow::bail!("Invalid SQL identifier: '{name}'");
    }
    Ok(())
}

/// Double-quotes an already validated identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}
