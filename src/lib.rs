pub mod classifier;
pub mod config;
pub mod dataset;
pub mod db;
pub mod extract;
pub mod extrapolate;
pub mod models;
pub mod ollama;
pub mod pipeline;
pub mod progress;
pub mod runlog;
pub mod source;
pub mod store;
pub mod training;
pub mod utils;

pub use db::Database;
pub use models::{Chunk, ChunkMode, KeywordSet, Record, RuleFile, RunEntry, RunId, RunKind, RunStatus};
