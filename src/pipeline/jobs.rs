use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use rayon::ThreadPool;
use tracing::{error, info};

use super::source_extractor;
use crate::classifier::{ForestParams, ModelKind, TagReport, Trainer};
use crate::config::Project;
use crate::extract::{ExtractOptions, ExtractedFile, extraction_files};
use crate::extrapolate::{Extrapolator, SimilarityTagger};
use crate::models::{RuleFile, RunEntry, RunId, RunKind};
use crate::ollama::Embedder;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::runlog::RunLedger;
use crate::training::{TrainingOptions, TrainingSet, TrainingSetBuilder};

/// Starts jobs on their own threads, each registered in its kind's ledger.
///
/// Every job reports to the same progress channel. A job that returns an error sends
/// `Failed`; one that panics sends nothing and its ledger entry stays live.
pub struct JobLauncher {
    project: Project,
    tx: Sender<ProgressEvent>,
    handles: Vec<(RunId, JoinHandle<()>)>,
}

impl JobLauncher {
    pub fn new(project: Project, tx: Sender<ProgressEvent>) -> Self {
        Self {
            project,
            tx,
            handles: Vec::new(),
        }
    }

    /// Records `entry` and runs `job` on a new thread.
    pub fn launch<F>(&mut self, kind: RunKind, entry: RunEntry, job: F) -> Result<()>
    where
        F: FnOnce(&ProgressSender) -> Result<()> + Send + 'static,
    {
        let run_id = entry.run_id.clone();
        RunLedger::for_kind(&self.project, kind).append(entry)?;

        let progress = ProgressSender::new(self.tx.clone(), kind, run_id.clone());
        let handle = std::thread::Builder::new()
            .name(format!("craml-{kind}"))
            .spawn(move || match job(&progress) {
                Ok(()) => {
                    info!(run = %progress.run_id(), kind = %kind, "run finished");
                    progress.finished();
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(run = %progress.run_id(), kind = %kind, error = %message, "run failed");
                    progress.failed(message);
                }
            })
            .context("Failed to spawn job thread")?;
        self.handles.push((run_id, handle));
        Ok(())
    }

    /// Drops the launcher's own sender so the channel disconnects once every job is done.
    pub fn into_jobs(self) -> RunningJobs {
        RunningJobs {
            handles: self.handles,
        }
    }
}

/// Threads of launched jobs.
pub struct RunningJobs {
    handles: Vec<(RunId, JoinHandle<()>)>,
}

impl RunningJobs {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every job thread.
    pub fn join(self) -> Result<()> {
        let panicked: Vec<String> = self
            .handles
            .into_iter()
            .filter_map(|(run_id, handle)| handle.join().is_err().then(|| run_id.to_string()))
            .collect();
        if !panicked.is_empty() {
            anyhow::bail!("Job threads panicked: {}", panicked.join(", "));
        }
        Ok(())
    }
}

/// Parameters of an extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractJob {
    pub options: ExtractOptions,
    /// Tags whose keywords to extract around; empty means every tag.
    pub tags: Vec<String>,
    /// Overrides the source's configured files.
    pub files: Vec<PathBuf>,
}

/// Extracts the project's extraction source into `csv/<run_id>/`.
pub fn run_extraction(
    project: &Project,
    run_id: &RunId,
    job: &ExtractJob,
    pool: &ThreadPool,
    progress: &ProgressSender,
) -> Result<Vec<ExtractedFile>> {
    let settings = project.load_settings()?;
    let (name, source) = settings
        .extraction()
        .context("settings.json defines no extraction source")?;
    let keyword_set = project.load_keywords()?;
    let keywords = if job.tags.is_empty() {
        keyword_set.all_keywords()
    } else {
        keyword_set.restricted_to(&job.tags).all_keywords()
    };
    if keywords.is_empty() {
        anyhow::bail!("No keywords configured for the selected tags");
    }

    info!(run = %run_id, source = name, keywords = keywords.len(), "extraction started");
    let extractor = source_extractor(source, keywords, job.options.clone())?;
    let files = if job.files.is_empty() {
        &source.files
    } else {
        &job.files
    };
    extractor.run(files, &project.csv_dir(run_id), pool, |i, n, _| {
        progress.stage(format!("Extracting file {i}/{n}"));
    })
}

/// Embedding backend and cut-off for similarity mode.
#[derive(Clone)]
pub struct EmbedSettings {
    pub embedder: Arc<dyn Embedder>,
    pub threshold: f64,
}

/// Parameters of an extrapolation run.
#[derive(Clone)]
pub struct ExtrapolateJob {
    /// Extraction run whose files are classified.
    pub source_run: RunId,
    pub rules: Vec<PathBuf>,
    /// Similarity mode when set, literal matching otherwise.
    pub embed: Option<EmbedSettings>,
}

/// Labels every file of an extraction run into `csv/<run_id>/`.
pub fn run_extrapolation(
    project: &Project,
    run_id: &RunId,
    job: &ExtrapolateJob,
    pool: &ThreadPool,
    progress: &ProgressSender,
) -> Result<Vec<PathBuf>> {
    let files = extraction_files(&project.csv_dir(&job.source_run))?;
    let rule_files = job
        .rules
        .iter()
        .map(RuleFile::load)
        .collect::<Result<Vec<_>, _>>()?;
    let out_dir = project.csv_dir(run_id);

    match &job.embed {
        None => {
            progress.stage("Extrapolating");
            Extrapolator::new(rule_files).run(&files, &out_dir, pool)
        }
        Some(embed) => {
            progress.stage("Embedding rules");
            let keywords = project.load_keywords()?;
            let tagger =
                SimilarityTagger::new(Arc::clone(&embed.embedder), &rule_files, &keywords, embed.threshold)?;
            progress.stage("Extrapolating");
            tagger.run(&files, &out_dir)
        }
    }
}

/// Builds `train/<run_id>/<rule stem>.csv` from an extraction run.
pub fn run_training_set(
    project: &Project,
    run_id: &RunId,
    source_run: &RunId,
    rules: &Path,
    options: TrainingOptions,
    pool: &ThreadPool,
    progress: &ProgressSender,
) -> Result<TrainingSet> {
    let rule_file = RuleFile::load(rules)?;
    let files = extraction_files(&project.csv_dir(source_run))?;
    progress.stage(format!("Building {}", rule_file.name));
    let output = project
        .train_dir(run_id)
        .join(format!("{}.csv", rule_file.name));
    TrainingSetBuilder::new(&rule_file, options).build(&files, &output, pool)
}

/// Trains every tag of a corpus, reporting each as it completes.
pub fn run_training(
    corpus: &Path,
    kind: ModelKind,
    sample_rate: f64,
    params: ForestParams,
    out_dir: &Path,
    progress: &ProgressSender,
) -> Result<Vec<TagReport>> {
    let trainer = Trainer::from_corpus(corpus, kind, sample_rate, out_dir)?.with_params(params);
    let total = trainer.tags().count();
    let mut reports = Vec::with_capacity(total);
    for (i, report) in trainer.reports().enumerate() {
        let report = report?;
        progress.stage(format!("Trained {} ({}/{total})", report.tag, i + 1));
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use crate::progress::channel;
    use crate::runlog::RunMonitor;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn launched_jobs_reach_their_ledgers() {
        let dir = tempdir().unwrap();
        let project = Project::new(dir.path());
        let (tx, rx) = channel();
        let monitor = RunMonitor::new(&project, rx).with_timeout(Duration::from_millis(20));

        let mut launcher = JobLauncher::new(project.clone(), tx);
        let ok = RunEntry::started(RunId::new("ok"), "extract all", "csv/ok");
        launcher
            .launch(RunKind::Extract, ok, |progress| {
                progress.stage("Extracting file 1/1");
                Ok(())
            })
            .unwrap();
        let bad = RunEntry::started(RunId::new("bad"), "train", "train/bad");
        launcher
            .launch(RunKind::Train, bad, |_| anyhow::bail!("corpus is empty"))
            .unwrap();

        let jobs = launcher.into_jobs();
        assert_eq!(jobs.len(), 2);
        monitor.watch(|_| {}).unwrap();
        jobs.join().unwrap();

        let extract = RunLedger::for_kind(&project, RunKind::Extract).load().unwrap();
        assert_eq!(extract[0].status, RunStatus::Finished);
        let train = RunLedger::for_kind(&project, RunKind::Train).load().unwrap();
        assert_eq!(train[0].status, RunStatus::Failed("corpus is empty".into()));
    }

    #[test]
    fn extraction_without_settings_fails() {
        let dir = tempdir().unwrap();
        let project = Project::new(dir.path());
        let pool = crate::utils::build_pool(1).unwrap();
        let progress = ProgressSender::disconnected(RunKind::Extract, RunId::new("r"));

        let err = run_extraction(&project, &RunId::new("r"), &ExtractJob::default(), &pool, &progress)
            .unwrap_err();
        assert!(format!("{err:#}").contains("settings"));
    }
}
