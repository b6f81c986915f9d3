//! Run ledgers: one JSON array of [`RunEntry`] per run kind.
//!
//! Entries are appended at launch and updated in place as progress events arrive. A
//! removed run keeps its entry (status `Removed`) but loses its on-disk output.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::Project;
use crate::models::{RunEntry, RunId, RunKind, RunStatus};
use crate::progress::ProgressEvent;
use crate::utils::ensure_parent_directory;

/// How long [`RunMonitor::poll`] waits for the first event.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// The ledger file of one run kind.
#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_kind(project: &Project, kind: RunKind) -> Self {
        Self::new(project.ledger_path(kind))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every entry; a missing ledger is empty.
    pub fn load(&self) -> Result<Vec<RunEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger {}", self.path.display()))
    }

    fn save(&self, entries: &[RunEntry]) -> Result<()> {
        ensure_parent_directory(&self.path)?;
        let json = serde_json::to_string_pretty(entries)?;
        // Replace atomically so a reader never sees a half-written ledger.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)
            .with_context(|| format!("Failed to write ledger {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("Failed to replace ledger {}", self.path.display()))?;
        Ok(())
    }

    pub fn append(&self, entry: RunEntry) -> Result<()> {
        let mut entries = self.load()?;
        info!(run = %entry.run_id, name = %entry.name, ledger = %self.path.display(), "run registered");
        entries.push(entry);
        self.save(&entries)
    }

    /// Applies `f` to the entry of `run_id`. Returns `false` if there is none.
    pub fn update(&self, run_id: &RunId, f: impl FnOnce(&mut RunEntry)) -> Result<bool> {
        let mut entries = self.load()?;
        let Some(entry) = entries.iter_mut().find(|e| &e.run_id == run_id) else {
            return Ok(false);
        };
        f(entry);
        self.save(&entries)?;
        Ok(true)
    }

    /// Sets a run's status and refreshes its elapsed time.
    ///
    /// A `Finished` or `Removed` run keeps its status; late events from its workers are
    /// ignored.
    pub fn set_status(&self, run_id: &RunId, status: RunStatus) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        self.update(run_id, |entry| {
            if entry.status.is_terminal() {
                debug!(run = %run_id, current = %entry.status, ignored = %status, "run already ended");
                return;
            }
            if entry.status.is_live() {
                entry.refresh_elapsed(now);
            }
            entry.status = status;
        })
    }

    /// Refreshes elapsed seconds of every live entry and returns the ledger.
    pub fn refresh(&self, now: OffsetDateTime) -> Result<Vec<RunEntry>> {
        let mut entries = self.load()?;
        let mut changed = false;
        for entry in entries.iter_mut().filter(|e| e.status.is_live()) {
            entry.refresh_elapsed(now);
            changed = true;
        }
        if changed {
            self.save(&entries)?;
        }
        Ok(entries)
    }

    /// Marks a run `Removed` and deletes its output.
    ///
    /// Workers of a run that is still going are not stopped and may recreate files.
    pub fn remove(&self, run_id: &RunId) -> Result<Option<RunEntry>> {
        let mut entries = self.load()?;
        let Some(entry) = entries.iter_mut().find(|e| &e.run_id == run_id) else {
            return Ok(None);
        };
        if entry.status.is_live() {
            warn!(run = %run_id, "removing a run that is still in progress");
        }

        let output = PathBuf::from(&entry.save);
        if output.is_dir() {
            fs::remove_dir_all(&output)
                .with_context(|| format!("Failed to delete {}", output.display()))?;
        } else if output.is_file() {
            fs::remove_file(&output)
                .with_context(|| format!("Failed to delete {}", output.display()))?;
        }
        entry.status = RunStatus::Removed;
        let removed = entry.clone();
        self.save(&entries)?;
        info!(run = %run_id, output = %output.display(), "run removed");
        Ok(Some(removed))
    }
}

/// Result of one [`RunMonitor::poll`].
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub events: Vec<ProgressEvent>,
    /// Every sender is gone; no further events can arrive.
    pub disconnected: bool,
}

/// Drains the shared progress channel into the ledgers.
pub struct RunMonitor {
    rx: Receiver<ProgressEvent>,
    ledgers: HashMap<RunKind, RunLedger>,
    timeout: Duration,
}

impl RunMonitor {
    pub fn new(project: &Project, rx: Receiver<ProgressEvent>) -> Self {
        let ledgers = RunKind::all()
            .into_iter()
            .map(|kind| (kind, RunLedger::for_kind(project, kind)))
            .collect();
        Self {
            rx,
            ledgers,
            timeout: POLL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ledger(&self, kind: RunKind) -> Option<&RunLedger> {
        self.ledgers.get(&kind)
    }

    fn apply(&self, event: &ProgressEvent) -> Result<()> {
        let Some(ledger) = self.ledgers.get(&event.kind()) else {
            return Ok(());
        };
        let status = match event {
            ProgressEvent::Stage { label, .. } => RunStatus::Stage(label.clone()),
            ProgressEvent::Finished { .. } => RunStatus::Finished,
            ProgressEvent::Failed { message, .. } => RunStatus::Failed(message.clone()),
        };
        debug!(run = %event.run_id(), status = %status, "progress");
        if !ledger.set_status(event.run_id(), status)? {
            warn!(run = %event.run_id(), kind = %event.kind(), "progress for unknown run");
        }
        Ok(())
    }

    /// Waits up to the timeout for an event, then drains whatever else is queued.
    ///
    /// Elapsed time of live runs is refreshed on every poll.
    pub fn poll(&self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        match self.rx.recv_timeout(self.timeout) {
            Ok(event) => outcome.events.push(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => outcome.disconnected = true,
        }
        outcome.events.extend(self.rx.try_iter());

        for event in &outcome.events {
            self.apply(event)?;
        }
        let now = OffsetDateTime::now_utc();
        for ledger in self.ledgers.values() {
            ledger.refresh(now)?;
        }
        Ok(outcome)
    }

    /// Polls until every sender has been dropped, calling `on_event` for each event.
    pub fn watch(&self, mut on_event: impl FnMut(&ProgressEvent)) -> Result<()> {
        loop {
            let outcome = self.poll()?;
            outcome.events.iter().for_each(&mut on_event);
            if outcome.disconnected {
                return Ok(());
            }
        }
    }
}
