use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single extraction, training or pipeline run.
///
/// Every run writes its intermediate output under a directory named after its id,
/// so ids must be unique and filesystem-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh, random run id.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::RunId;
    ///
    /// let a = RunId::generate();
    /// let b = RunId::generate();
    /// assert_ne!(a, b);
    /// assert_eq!(a.as_str().len(), 32);
    /// ```
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing id, e.g. one read back from a run ledger or the command line.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
