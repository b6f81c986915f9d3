//! Source readers: turn delimited text, XML, zip archives and document collections into
//! [`Record`]s carrying the requested fields.

mod archive;
mod collection;
mod delimited;
mod files;
mod xml;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::models::Record;

pub use collection::{DocumentCollection, JsonLinesCollection};
pub use files::{FILE_LIST_SEPARATOR, FileResolver};

/// Errors raised while reading a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source file could not be opened or read.
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The delimited reader failed on something other than a single malformed row.
    #[error("delimited source error: {0}")]
    Csv(#[from] csv::Error),

    /// The XML stream is not well formed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The zip container could not be opened.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Requested fields are absent from the source header.
    #[error("{path}: missing columns {missing:?}")]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    /// The configured delimiter is not a single ASCII character.
    #[error("delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(String),

    /// A zip archive does not contain exactly one inner file.
    #[error("{path}: expected exactly one file in archive, found {count}")]
    ArchiveLayout { path: PathBuf, count: usize },

    /// The configured extension names no known format.
    #[error("unsupported source format '{0}'")]
    UnsupportedFormat(String),
}

/// On-disk layout of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Delimited text with a single-byte delimiter.
    Delimited { delimiter: u8 },
    /// Sibling XML elements named after the fields.
    Xml,
    /// A zip archive holding one delimited or XML file.
    Zip { delimiter: u8 },
    /// Newline-delimited JSON documents.
    JsonLines,
}

impl SourceFormat {
    /// Picks a format from a configured extension (`csv`, `tsv`, `xml`, `zip`, `jsonl`, ...)
    /// and delimiter string.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::source::SourceFormat;
    ///
    /// assert_eq!(SourceFormat::from_settings("csv", ",").unwrap(), SourceFormat::Delimited { delimiter: b',' });
    /// assert_eq!(SourceFormat::from_settings(".TSV", "\\t").unwrap(), SourceFormat::Delimited { delimiter: b'\t' });
    /// assert_eq!(SourceFormat::from_settings("xml", "").unwrap(), SourceFormat::Xml);
    /// ```
    pub fn from_settings(ext: &str, delim: &str) -> Result<Self, SourceError> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        let delimiter = parse_delimiter(delim)?;
        match ext.as_str() {
            e if e.contains("zip") => Ok(Self::Zip { delimiter }),
            e if e.contains("xml") => Ok(Self::Xml),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            "csv" | "tsv" | "txt" | "psv" => Ok(Self::Delimited { delimiter }),
            other => Err(SourceError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Maps a configured delimiter to a byte; blank means comma and `\t`/`tab` mean tab.
fn parse_delimiter(delim: &str) -> Result<u8, SourceError> {
    match delim {
        "" => Ok(b','),
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        other => match other.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(SourceError::InvalidDelimiter(other.to_string())),
        },
    }
}

/// Which fields to read and which of them carries the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSchema {
    /// All requested fields in output order.
    pub fields: Vec<String>,
    /// Identifier field.
    pub id: String,
    /// Text field, or `None` for a metadata-only source.
    pub extract: Option<String>,
}

impl SourceSchema {
    pub fn new(fields: Vec<String>, id: impl Into<String>, extract: Option<String>) -> Self {
        Self {
            fields,
            id: id.into(),
            extract,
        }
    }

    /// Fields other than the extract field, in schema order.
    pub fn passthrough_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(String::as_str)
            .filter(move |f| Some(*f) != self.extract.as_deref())
    }
}

/// Reads one kind of source file into records.
#[derive(Debug, Clone)]
pub struct SourceReader {
    format: SourceFormat,
    schema: SourceSchema,
}

impl SourceReader {
    pub fn new(format: SourceFormat, schema: SourceSchema) -> Self {
        Self { format, schema }
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    /// Checks every file's header against the schema before any work starts.
    ///
    /// Only delimited sources (plain or zipped) carry a header; other formats pass.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingColumns`] naming the first file with absent fields.
    pub fn validate(&self, files: &[PathBuf]) -> Result<(), SourceError> {
        for path in files {
            match self.format {
                SourceFormat::Delimited { delimiter } => {
                    let file = open(path)?;
                    delimited::check_header(path, file, delimiter, &self.schema.fields)?;
                }
                SourceFormat::Zip { delimiter } => {
                    let (name, bytes) = archive::read_single_entry(path)?;
                    if !is_xml_name(&name) {
                        delimited::check_header(path, bytes.as_slice(), delimiter, &self.schema.fields)?;
                    }
                }
                SourceFormat::Xml | SourceFormat::JsonLines => {}
            }
        }
        Ok(())
    }

    /// Reads all well-formed records of one file.
    ///
    /// Rows that cannot be parsed or lack a requested field are omitted.
    pub fn read(&self, path: &Path) -> Result<Vec<Record>, SourceError> {
        let records = match self.format {
            SourceFormat::Delimited { delimiter } => {
                let file = open(path)?;
                delimited::read_records(path, file, delimiter, &self.schema.fields)?
            }
            SourceFormat::Xml => {
                let file = open(path)?;
                xml::read_records(std::io::BufReader::new(file), &self.schema.fields)?
            }
            SourceFormat::Zip { delimiter } => {
                let (name, bytes) = archive::read_single_entry(path)?;
                if is_xml_name(&name) {
                    xml::read_records(bytes.as_slice(), &self.schema.fields)?
                } else {
                    delimited::read_records(path, bytes.as_slice(), delimiter, &self.schema.fields)?
                }
            }
            SourceFormat::JsonLines => JsonLinesCollection::new(path).find(&self.schema.fields)?,
        };
        debug!(file = %path.display(), records = records.len(), "read source file");
        Ok(records)
    }
}

fn open(path: &Path) -> Result<std::fs::File, SourceError> {
    std::fs::File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn is_xml_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|e| e.to_string_lossy().to_ascii_lowercase().contains("xml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn schema() -> SourceSchema {
        SourceSchema::new(
            vec!["id".into(), "title".into(), "body".into()],
            "id",
            Some("body".into()),
        )
    }

    #[test]
    fn from_settings_rejects_unknown_extension() {
        assert!(matches!(
            SourceFormat::from_settings("docx", ","),
            Err(SourceError::UnsupportedFormat(_))
        ));
        assert_eq!(
            SourceFormat::from_settings("zip", "|").unwrap(),
            SourceFormat::Zip { delimiter: b'|' }
        );
    }

    #[test]
    fn from_settings_rejects_wide_delimiters() {
        for delim in [";;", "§", "\\|"] {
            assert!(
                matches!(
                    SourceFormat::from_settings("csv", delim),
                    Err(SourceError::InvalidDelimiter(d)) if d == delim
                ),
                "{delim:?} accepted"
            );
        }
        assert_eq!(
            SourceFormat::from_settings("txt", "tab").unwrap(),
            SourceFormat::Delimited { delimiter: b'\t' }
        );
    }

    #[test]
    fn passthrough_fields_skip_extract() {
        let binding = schema();
        let fields: Vec<&str> = binding.passthrough_fields().collect();
        assert_eq!(fields, vec!["id", "title"]);
    }

    #[test]
    fn validate_reports_missing_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "id,body\n1,text\n").unwrap();

        let reader = SourceReader::new(SourceFormat::Delimited { delimiter: b',' }, schema());
        let err = reader.validate(&[path]).unwrap_err();
        match err {
            SourceError::MissingColumns { missing, .. } => assert_eq!(missing, vec!["title"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_dispatches_on_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.xml");
        fs::write(
            &path,
            "<root><doc><id>1</id><title>t</title><body>b</body></doc></root>",
        )
        .unwrap();

        let reader = SourceReader::new(SourceFormat::Xml, schema());
        let records = reader.read(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("body"), Some("b"));
    }
}
