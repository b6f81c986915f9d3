//! Stage tracking for long-running jobs.
//!
//! A job advances a [`StageMachine`] and reports each transition as a [`ProgressEvent`]
//! on a shared crossbeam channel. Delivery is best-effort: a job never fails because
//! nobody is listening.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;

use crate::models::{RunId, RunKind};

/// Phases of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Extracting,
    Retrieving,
    Classifying(String),
    Storing,
    Complete,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extracting => write!(f, "Extracting"),
            Self::Retrieving => write!(f, "Retrieving Data"),
            Self::Classifying(tag) => write!(f, "Classifying {tag}"),
            Self::Storing => write!(f, "Storing"),
            Self::Complete => write!(f, "Pipeline Complete."),
        }
    }
}

/// Explicit state machine over [`PipelineStage`].
///
/// `Extracting → Retrieving → Classifying(t) for each tag → Storing → Complete`.
///
/// # Examples
///
/// ```
/// use craml::progress::{PipelineStage, StageMachine};
///
/// let mut stages = StageMachine::new(vec!["fraud".to_string()]);
/// let labels: Vec<String> = std::iter::from_fn(|| stages.advance())
///     .map(|s| s.to_string())
///     .collect();
///
/// assert_eq!(
///     labels,
///     ["Extracting", "Retrieving Data", "Classifying fraud", "Storing", "Pipeline Complete."]
/// );
/// assert_eq!(stages.current(), Some(&PipelineStage::Complete));
/// ```
#[derive(Debug, Clone)]
pub struct StageMachine {
    tags: Vec<String>,
    current: Option<PipelineStage>,
}

impl StageMachine {
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&PipelineStage> {
        self.current.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.current == Some(PipelineStage::Complete)
    }

    fn next_stage(&self) -> Option<PipelineStage> {
        let first_tag_or_store = || match self.tags.first() {
            Some(tag) => PipelineStage::Classifying(tag.clone()),
            None => PipelineStage::Storing,
        };
        match &self.current {
            None => Some(PipelineStage::Extracting),
            Some(PipelineStage::Extracting) => Some(PipelineStage::Retrieving),
            Some(PipelineStage::Retrieving) => Some(first_tag_or_store()),
            Some(PipelineStage::Classifying(tag)) => {
                let next = self
                    .tags
                    .iter()
                    .position(|t| t == tag)
                    .and_then(|i| self.tags.get(i + 1));
                Some(match next {
                    Some(tag) => PipelineStage::Classifying(tag.clone()),
                    None => PipelineStage::Storing,
                })
            }
            Some(PipelineStage::Storing) => Some(PipelineStage::Complete),
            Some(PipelineStage::Complete) => None,
        }
    }

    /// Moves to the next stage and returns it, or `None` once complete.
    pub fn advance(&mut self) -> Option<PipelineStage> {
        let next = self.next_stage()?;
        self.current = Some(next.clone());
        Some(next)
    }
}

/// A status change of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage {
        kind: RunKind,
        run_id: RunId,
        label: String,
    },
    Finished {
        kind: RunKind,
        run_id: RunId,
    },
    Failed {
        kind: RunKind,
        run_id: RunId,
        message: String,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Stage { run_id, .. } | Self::Finished { run_id, .. } | Self::Failed { run_id, .. } => {
                run_id
            }
        }
    }

    pub fn kind(&self) -> RunKind {
        match self {
            Self::Stage { kind, .. } | Self::Finished { kind, .. } | Self::Failed { kind, .. } => *kind,
        }
    }
}

/// Sending half of the progress channel, bound to one run.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<Sender<ProgressEvent>>,
    kind: RunKind,
    run_id: RunId,
}

/// Creates the shared progress queue.
pub fn channel() -> (Sender<ProgressEvent>, Receiver<ProgressEvent>) {
    unbounded()
}

impl ProgressSender {
    pub fn new(tx: Sender<ProgressEvent>, kind: RunKind, run_id: RunId) -> Self {
        Self {
            tx: Some(tx),
            kind,
            run_id,
        }
    }

    /// A sender that drops every event.
    pub fn disconnected(kind: RunKind, run_id: RunId) -> Self {
        Self {
            tx: None,
            kind,
            run_id,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!(run = %self.run_id, "progress receiver gone");
            }
        }
    }

    pub fn stage(&self, label: impl fmt::Display) {
        self.send(ProgressEvent::Stage {
            kind: self.kind,
            run_id: self.run_id.clone(),
            label: label.to_string(),
        });
    }

    pub fn finished(&self) {
        self.send(ProgressEvent::Finished {
            kind: self.kind,
            run_id: self.run_id.clone(),
        });
    }

    pub fn failed(&self, message: impl fmt::Display) {
        self.send(ProgressEvent::Failed {
            kind: self.kind,
            run_id: self.run_id.clone(),
            message: message.to_string(),
        });
    }
}
