use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use craml::classifier::{ForestParams, ModelKind};
use craml::config::{PipelineConfig, Project};
use craml::dataset::Table;
use craml::extract::{ChunkSampler, ExtractOptions, SampleMode, extraction_files};
use craml::ollama::{Embedder, OllamaClientBuilder};
use craml::pipeline::{
    EmbedSettings, ExtractJob, ExtrapolateJob, JobLauncher, Pipeline, run_extraction,
    run_extrapolation, run_training, run_training_set,
};
use craml::progress::{ProgressEvent, ProgressSender, channel};
use craml::runlog::{RunLedger, RunMonitor};
use craml::training::TrainingOptions;
use craml::utils::{build_pool, worker_count};
use craml::{ChunkMode, RunEntry, RunId, RunKind, RunStatus};

/// craml - keyword-window extraction and rule-based labelling for bulk text
#[derive(Parser)]
#[command(name = "craml")]
#[command(about = "Build labelled text datasets from keyword windows and analyst rules")]
#[command(version)]
struct Cli {
    /// Project directory (defaults to $CRAML_PROJECT, then the platform data directory)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Worker threads for CPU-bound stages (defaults to 75% of available cores)
    #[arg(long, global = true, value_name = "N", env = "CRAML_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract keyword windows from the configured extraction source
    Extract(ExtractCommand),
    /// Draw frequent or random chunks from an extraction run for rule writing
    Sample(SampleCommand),
    /// Label an extraction run with rule files
    Extrapolate(ExtrapolateCommand),
    /// Build a training corpus from an extraction run and one rule file
    BuildTraining(BuildTrainingCommand),
    /// Train one classifier per tag of a training corpus
    Train(TrainCommand),
    /// Run a pipeline job file end to end
    Pipeline(PipelineCommand),
    /// List recorded runs
    Runs(RunsCommand),
    /// Mark a run removed and delete its output
    RemoveRun(RemoveRunCommand),
}

#[derive(Args)]
struct ExtractCommand {
    /// Comma-separated tags whose keywords to use (default: all)
    #[arg(short, long, value_name = "TAGS")]
    tags: Option<String>,

    /// Units kept either side of a keyword
    #[arg(short = 'n', long, default_value_t = 6)]
    window: usize,

    #[arg(long, default_value = "word")]
    mode: ChunkMode,

    /// Spell numbers out instead of dropping them
    #[arg(long)]
    keep_numbers: bool,

    /// Label recorded in the run ledger
    #[arg(long, default_value = "extraction")]
    name: String,
}

#[derive(Args)]
struct SampleCommand {
    /// Extraction run to sample from
    #[arg(long, value_name = "RUN")]
    run: String,

    #[arg(short, long)]
    tag: String,

    #[arg(short = 'n', long, default_value_t = 3)]
    window: usize,

    #[arg(long, default_value = "word")]
    mode: ChunkMode,

    /// TOP or RANDOM
    #[arg(long, default_value = "TOP")]
    sample: SampleMode,

    #[arg(long, default_value_t = 50)]
    size: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write `chunk,count` rows here instead of printing them
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ExtrapolateCommand {
    /// Extraction run to label
    #[arg(long, value_name = "RUN")]
    run: String,

    /// Comma-separated rule files (names resolve under the project's rules/ directory)
    #[arg(short, long, value_name = "FILES")]
    rules: String,

    /// Tag by embedding similarity instead of literal matching
    #[arg(long)]
    embed: bool,

    /// Similarity a chunk must exceed in embedding mode
    #[arg(long, default_value_t = 0.6)]
    threshold: f64,
}

#[derive(Args)]
struct BuildTrainingCommand {
    /// Extraction run to build from
    #[arg(long, value_name = "RUN")]
    run: String,

    /// Rule file (a name resolves under the project's rules/ directory)
    #[arg(short, long)]
    rules: PathBuf,

    /// Fraction of rows sampled from each file
    #[arg(long, default_value_t = 1.0)]
    sample: f64,

    /// Add non-matching chunks as zero-labelled examples
    #[arg(long)]
    negative_sampling: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args)]
struct TrainCommand {
    /// Training corpus produced by build-training
    #[arg(short, long)]
    corpus: PathBuf,

    /// NB or RF
    #[arg(short, long, default_value = "NB")]
    model: ModelKind,

    /// Sample rate the corpus was built with, recorded in the model name
    #[arg(long, default_value_t = 1.0)]
    sample_rate: f64,

    #[arg(long, default_value_t = 100)]
    n_estimators: usize,

    #[arg(long, default_value_t = 2)]
    min_samples_split: usize,

    #[arg(long, default_value_t = 1)]
    min_samples_leaf: usize,
}

#[derive(Args)]
struct PipelineCommand {
    /// Pipeline job file (JSON)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

#[derive(Args)]
struct RunsCommand {
    /// extract, extrapolate, train or pipeline (default: all)
    #[arg(long)]
    kind: Option<String>,
}

#[derive(Args)]
struct RemoveRunCommand {
    /// extract, extrapolate, train or pipeline
    #[arg(long)]
    kind: String,

    #[arg(value_name = "RUN")]
    run: String,
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = dispatch(&cli) {
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

/// Reads the filter from `CRAML_LOG`, then `RUST_LOG`, defaulting to `craml=info`.
fn init_tracing() {
    let filter = std::env::var("CRAML_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("craml=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are bad arguments or project configuration; everything else, including a
/// job that failed while running, is internal.
fn is_user_error(error: &anyhow::Error) -> bool {
    const USER_ERRORS: [&str; 7] = [
        "No classifier configured",
        "Duplicate tag",
        "defines no extraction source",
        "No keywords configured",
        "Unknown run kind",
        "No run",
        "must be between",
    ];
    let message = error.to_string();
    USER_ERRORS.iter().any(|pattern| message.contains(pattern))
        || error.downcast_ref::<craml::models::RuleFileError>().is_some()
}

fn dispatch(cli: &Cli) -> Result<()> {
    let project = Project::resolve(cli.project.as_deref())?;
    project.ensure_layout()?;
    let workers = cli.workers.unwrap_or_else(worker_count);

    match &cli.command {
        Commands::Extract(cmd) => handle_extract(&project, workers, cmd),
        Commands::Sample(cmd) => handle_sample(&project, workers, cmd),
        Commands::Extrapolate(cmd) => handle_extrapolate(&project, workers, cmd),
        Commands::BuildTraining(cmd) => handle_build_training(&project, workers, cmd),
        Commands::Train(cmd) => handle_train(&project, cmd),
        Commands::Pipeline(cmd) => handle_pipeline(&project, workers, cmd),
        Commands::Runs(cmd) => handle_runs(&project, cmd),
        Commands::RemoveRun(cmd) => handle_remove_run(&project, cmd),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_kind(value: &str) -> Result<RunKind> {
    RunKind::all()
        .into_iter()
        .find(|kind| kind.to_string().eq_ignore_ascii_case(value.trim()))
        .with_context(|| format!("Unknown run kind '{value}' (expected extract, extrapolate, train or pipeline)"))
}

/// Resolves a bare rule file name under `rules/`, adding `.csv` if missing.
fn rule_path(project: &Project, value: &Path) -> PathBuf {
    if value.components().count() > 1 || value.is_absolute() {
        return value.to_path_buf();
    }
    let mut path = project.rules_dir().join(value);
    if path.extension().is_none() {
        path.set_extension("csv");
    }
    path
}

/// Registers and runs one job, streaming its stage updates to stderr until it ends.
fn run_job<F>(project: &Project, kind: RunKind, entry: RunEntry, job: F) -> Result<()>
where
    F: FnOnce(&ProgressSender) -> Result<()> + Send + 'static,
{
    let run_id = entry.run_id.clone();
    let (tx, rx) = channel();
    let monitor = RunMonitor::new(project, rx);
    let mut launcher = JobLauncher::new(project.clone(), tx);
    launcher.launch(kind, entry, job)?;
    eprintln!("{kind} run {run_id} started");

    let jobs = launcher.into_jobs();
    monitor.watch(|event| match event {
        ProgressEvent::Stage { label, .. } => eprintln!("  {label}"),
        ProgressEvent::Finished { .. } => eprintln!("  Finished"),
        ProgressEvent::Failed { message, .. } => eprintln!("  Failed: {message}"),
    })?;
    jobs.join()?;

    let entries = RunLedger::for_kind(project, kind).load()?;
    match entries.iter().find(|e| e.run_id == run_id).map(|e| &e.status) {
        Some(RunStatus::Failed(message)) => anyhow::bail!("Run {run_id} failed: {message}"),
        _ => Ok(()),
    }
}

fn handle_extract(project: &Project, workers: usize, cmd: &ExtractCommand) -> Result<()> {
    let run_id = RunId::generate();
    let job = ExtractJob {
        options: ExtractOptions {
            window: cmd.window,
            mode: cmd.mode,
            keep_numbers: cmd.keep_numbers,
        },
        tags: cmd.tags.as_deref().map(split_list).unwrap_or_default(),
        files: Vec::new(),
    };
    let save = project.csv_dir(&run_id);
    let entry = RunEntry::started(run_id.clone(), &cmd.name, save.display().to_string());

    let project_for_job = project.clone();
    run_job(project, RunKind::Extract, entry, move |progress| {
        let pool = build_pool(workers)?;
        let outputs = run_extraction(&project_for_job, &run_id, &job, &pool, progress)?;
        for file in outputs {
            println!("{}\t{} rows", file.output.display(), file.rows);
        }
        Ok(())
    })
}

fn handle_sample(project: &Project, workers: usize, cmd: &SampleCommand) -> Result<()> {
    let keywords = project.load_keywords()?;
    let tag_keywords = keywords.keywords_for(&cmd.tag).to_vec();
    if tag_keywords.is_empty() {
        anyhow::bail!("No keywords configured for tag '{}'", cmd.tag);
    }
    let sampler = ChunkSampler {
        keywords: tag_keywords,
        window: cmd.window,
        mode: cmd.mode,
        sample: cmd.sample,
        size: cmd.size,
        seed: cmd.seed,
    };
    let files = extraction_files(&project.csv_dir(&RunId::new(&cmd.run)))?;
    let pool = build_pool(workers)?;
    let chunks = sampler.sample(&files, &pool)?;

    match &cmd.output {
        Some(path) => {
            let mut table = Table::new(vec!["chunk".into(), "count".into()]);
            for chunk in &chunks {
                table.push_row(vec![chunk.chunk.clone(), chunk.count.to_string()]);
            }
            table.write(path)?;
            println!("Wrote {} chunks to {}", chunks.len(), path.display());
        }
        None => {
            for chunk in &chunks {
                println!("{}\t{}", chunk.count, chunk.chunk);
            }
        }
    }
    Ok(())
}

fn handle_extrapolate(project: &Project, workers: usize, cmd: &ExtrapolateCommand) -> Result<()> {
    let rules: Vec<PathBuf> = split_list(&cmd.rules)
        .iter()
        .map(|name| rule_path(project, Path::new(name)))
        .collect();
    if rules.is_empty() {
        anyhow::bail!("No rule files given");
    }
    let embed = if cmd.embed {
        if !(0.0..=1.0).contains(&cmd.threshold) {
            anyhow::bail!("Threshold must be between 0 and 1");
        }
        let client = OllamaClientBuilder::new()
            .build()
            .context("Failed to configure the embedding backend")?;
        let embedder: Arc<dyn Embedder> = Arc::new(client);
        Some(EmbedSettings {
            embedder,
            threshold: cmd.threshold,
        })
    } else {
        None
    };

    let run_id = RunId::generate();
    let job = ExtrapolateJob {
        source_run: RunId::new(&cmd.run),
        rules,
        embed,
    };
    let save = project.csv_dir(&run_id);
    let entry = RunEntry::started(run_id.clone(), format!("extrapolate {}", cmd.run), save.display().to_string());

    let project_for_job = project.clone();
    run_job(project, RunKind::Extrapolate, entry, move |progress| {
        let pool = build_pool(workers)?;
        for output in run_extrapolation(&project_for_job, &run_id, &job, &pool, progress)? {
            println!("{}", output.display());
        }
        Ok(())
    })
}

fn handle_build_training(project: &Project, workers: usize, cmd: &BuildTrainingCommand) -> Result<()> {
    if !(cmd.sample > 0.0 && cmd.sample <= 1.0) {
        anyhow::bail!("Sample fraction must be between 0 (exclusive) and 1");
    }
    let run_id = RunId::generate();
    let source_run = RunId::new(&cmd.run);
    let rules = rule_path(project, &cmd.rules);
    let options = TrainingOptions {
        sample: cmd.sample,
        negative_sampling: cmd.negative_sampling,
        seed: cmd.seed,
    };
    let save = project.train_dir(&run_id);
    let entry = RunEntry::started(run_id.clone(), format!("training set {}", rules.display()), save.display().to_string());

    let project_for_job = project.clone();
    run_job(project, RunKind::Train, entry, move |progress| {
        let pool = build_pool(workers)?;
        let set = run_training_set(&project_for_job, &run_id, &source_run, &rules, options, &pool, progress)?;
        println!("{}\t{} rows", set.output.display(), set.rows);
        for file in &set.files {
            println!("  {}\t+{} -{}", file.file.display(), file.positives, file.negatives);
        }
        Ok(())
    })
}

fn handle_train(project: &Project, cmd: &TrainCommand) -> Result<()> {
    let out_dir = cmd
        .corpus
        .parent()
        .map(|dir| dir.join("clf"))
        .unwrap_or_else(|| PathBuf::from("clf"));
    let params = ForestParams {
        n_estimators: cmd.n_estimators,
        min_samples_split: cmd.min_samples_split,
        min_samples_leaf: cmd.min_samples_leaf,
        ..ForestParams::default()
    };
    let corpus = cmd.corpus.clone();
    let kind = cmd.model;
    let sample_rate = cmd.sample_rate;
    let entry = RunEntry::started(RunId::generate(), format!("{kind} {}", corpus.display()), out_dir.display().to_string());

    run_job(project, RunKind::Train, entry, move |progress| {
        let reports = run_training(&corpus, kind, sample_rate, params, &out_dir, progress)?;
        for report in reports {
            println!(
                "{}\taccuracy {:.3}\tprecision {:.3}\trecall {:.3}\tf1 {:.3}\t{}",
                report.tag,
                report.metrics.accuracy,
                report.metrics.precision,
                report.metrics.recall,
                report.metrics.f1,
                report.model_path.display()
            );
        }
        Ok(())
    })
}

fn handle_pipeline(project: &Project, workers: usize, cmd: &PipelineCommand) -> Result<()> {
    let config = PipelineConfig::load(&cmd.config)?;
    let run_id = RunId::generate();
    let pipeline = Pipeline::new(project, run_id.clone(), config.clone())?;

    let mut entry = RunEntry::started(run_id, &config.name, pipeline.output_dir().display().to_string());
    if let craml::config::Destination::Table { table, .. } = pipeline.destination() {
        entry = entry.with_db_table(table);
    }

    run_job(project, RunKind::Pipeline, entry, move |progress| {
        let pool = build_pool(workers)?;
        let outcome = pipeline.run(&pool, progress)?;
        println!(
            "{}: {} rows, {} written, {} already stored, {} duplicates",
            outcome.location,
            outcome.rows,
            outcome.report.written,
            outcome.report.existing,
            outcome.report.duplicates
        );
        Ok(())
    })
}

fn handle_runs(project: &Project, cmd: &RunsCommand) -> Result<()> {
    let kinds = match &cmd.kind {
        Some(kind) => vec![parse_kind(kind)?],
        None => RunKind::all().to_vec(),
    };
    let now = time::OffsetDateTime::now_utc();
    for kind in kinds {
        let entries = RunLedger::for_kind(project, kind).refresh(now)?;
        if entries.is_empty() {
            continue;
        }
        println!("{kind}:");
        for entry in entries {
            let table = entry.db_table.as_deref().unwrap_or("-");
            println!(
                "  {}  {}  {}s  {}  {}  {}",
                entry.run_id, entry.name, entry.elapsed, entry.status, entry.save, table
            );
        }
    }
    Ok(())
}

fn handle_remove_run(project: &Project, cmd: &RemoveRunCommand) -> Result<()> {
    let kind = parse_kind(&cmd.kind)?;
    let run_id = RunId::new(&cmd.run);
    match RunLedger::for_kind(project, kind).remove(&run_id)? {
        Some(entry) => {
            println!("Removed {} ({})", entry.run_id, entry.save);
            Ok(())
        }
        None => anyhow::bail!("No run '{run_id}' in the {kind} ledger"),
    }
}
