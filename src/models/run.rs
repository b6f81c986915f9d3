use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use super::RunId;

/// The kinds of long-running job, each with its own ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Extract,
    /// Rule re-application or embedding expansion over an earlier extraction run.
    Extrapolate,
    Train,
    Pipeline,
}

impl RunKind {
    /// File name of this kind's ledger under the project's `logs/` directory.
    pub fn ledger_file(self) -> &'static str {
        match self {
            Self::Extract => "ext_procs.json",
            Self::Extrapolate => "extrap_procs.json",
            Self::Train => "train_procs.json",
            Self::Pipeline => "pipe_procs.json",
        }
    }

    pub fn all() -> [RunKind; 4] {
        [Self::Extract, Self::Extrapolate, Self::Train, Self::Pipeline]
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Extrapolate => write!(f, "extrapolate"),
            Self::Train => write!(f, "train"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Lifecycle status of a run, stored in the ledger as a plain string.
///
/// `Running!`, `Finished` and `Removed` are fixed strings; a stage status holds the stage
/// label verbatim (e.g. `Classifying fraud`); failures are written as `Failed: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Running,
    Stage(String),
    Finished,
    Failed(String),
    Removed,
}

const RUNNING: &str = "Running!";
const FINISHED: &str = "Finished";
const REMOVED: &str = "Removed";
const FAILED_PREFIX: &str = "Failed: ";

impl RunStatus {
    /// `Finished` and `Removed` end a run; a failed run stays listed until removed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Removed)
    }

    /// Whether elapsed time should keep advancing.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Stage(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str(RUNNING),
            Self::Stage(label) => f.write_str(label),
            Self::Finished => f.write_str(FINISHED),
            Self::Failed(message) => write!(f, "{FAILED_PREFIX}{message}"),
            Self::Removed => f.write_str(REMOVED),
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            RUNNING => Self::Running,
            FINISHED => Self::Finished,
            REMOVED => Self::Removed,
            other => match other.strip_prefix(FAILED_PREFIX) {
                Some(message) => Self::Failed(message.to_string()),
                None => Self::Stage(value),
            },
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.to_string()
    }
}

/// One ledger line: a launched job and where its output lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    /// OS process id of the launching process.
    pub pid: u32,
    pub run_id: RunId,
    /// Human label chosen at launch.
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    /// Seconds since `start`, refreshed while the run is live.
    pub elapsed: u64,
    pub status: RunStatus,
    /// Output directory or file.
    pub save: String,
    /// Destination table for pipeline runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
}

impl RunEntry {
    /// Creates a `Running!` entry stamped with the current time and process id.
    pub fn started(run_id: RunId, name: impl Into<String>, save: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            run_id,
            name: name.into(),
            start: OffsetDateTime::now_utc(),
            elapsed: 0,
            status: RunStatus::Running,
            save: save.into(),
            db_table: None,
        }
    }

    pub fn with_db_table(mut self, table: impl Into<String>) -> Self {
        self.db_table = Some(table.into());
        self
    }

    /// Recomputes `elapsed` against `now`, clamping clock skew to zero.
    pub fn refresh_elapsed(&mut self, now: OffsetDateTime) {
        let seconds = (now - self.start).whole_seconds();
        self.elapsed = u64::try_from(seconds).unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Stage("Classifying fraud".to_string()),
            RunStatus::Finished,
            RunStatus::Failed("disk full".to_string()),
            RunStatus::Removed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
        assert_eq!(RunStatus::Running.to_string(), "Running!");
    }

    #[test]
    fn every_kind_has_its_own_ledger() {
        let files: std::collections::HashSet<_> =
            RunKind::all().into_iter().map(RunKind::ledger_file).collect();
        assert_eq!(files.len(), RunKind::all().len());
        assert_eq!(RunKind::Extrapolate.ledger_file(), "extrap_procs.json");
        assert_eq!(RunKind::Extrapolate.to_string(), "extrapolate");
    }

    #[test]
    fn failed_runs_are_not_terminal() {
        assert!(!RunStatus::Failed("x".into()).is_terminal());
        assert!(!RunStatus::Failed("x".into()).is_live());
        assert!(RunStatus::Removed.is_terminal());
        assert!(RunStatus::Stage("Storing".into()).is_live());
    }

    #[test]
    fn entry_serializes_start_as_rfc3339() {
        let mut entry = RunEntry::started(RunId::new("r1"), "nightly", "/tmp/out");
        entry.start = datetime!(2024-03-01 12:00:00 UTC);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["start"], "2024-03-01T12:00:00Z");
        assert_eq!(json["status"], "Running!");
        assert!(json.get("db_table").is_none());
    }

    #[test]
    fn refresh_elapsed_counts_seconds() {
        let mut entry = RunEntry::started(RunId::new("r1"), "n", "s");
        entry.start = datetime!(2024-03-01 12:00:00 UTC);
        entry.refresh_elapsed(datetime!(2024-03-01 12:01:30 UTC));
        assert_eq!(entry.elapsed, 90);

        entry.refresh_elapsed(datetime!(2024-03-01 11:00:00 UTC));
        assert_eq!(entry.elapsed, 0);
    }
}
