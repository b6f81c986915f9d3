use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::{SourceError, open};
use crate::models::Record;

/// A queryable collection of documents.
///
/// Implementations return one record per document holding exactly the projected fields;
/// documents missing any projected field are skipped.
pub trait DocumentCollection: Send + Sync {
    fn find(&self, projection: &[String]) -> Result<Vec<Record>, SourceError>;
}

/// A collection stored as newline-delimited JSON objects.
#[derive(Debug, Clone)]
pub struct JsonLinesCollection {
    path: PathBuf,
}

impl JsonLinesCollection {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DocumentCollection for JsonLinesCollection {
    fn find(&self, projection: &[String]) -> Result<Vec<Record>, SourceError> {
        let reader = BufReader::new(open(&self.path)?);
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (offset, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let document: Value = match serde_json::from_str(&line) {
                Ok(document) => document,
                Err(e) => {
                    debug!(line = offset + 1, error = %e, "skipping malformed document");
                    skipped += 1;
                    continue;
                }
            };

            match project(&document, projection) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(collection = %self.path.display(), skipped, "skipped malformed or incomplete documents");
        }
        Ok(records)
    }
}

fn project(document: &Value, projection: &[String]) -> Option<Record> {
    let object = document.as_object()?;
    let mut record = Record::new();
    for field in projection {
        let value = match object.get(field)? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        record.insert(field.clone(), value);
    }
    Some(record)
}
