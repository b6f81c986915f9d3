mod chunk;
mod ids;
mod keyword_set;
mod record;
mod rule;
mod run;

pub use chunk::{CHUNK_DELIMITER, Chunk, ChunkMode, join_chunks, split_context};
pub use ids::RunId;
pub use keyword_set::KeywordSet;
pub use record::Record;
pub use rule::{
    REGEX_MARKER, REGEX_SEPARATOR, Rule, RuleFile, RuleFileError, RuleMatch, RulePattern,
    TagEncoding,
};
pub use run::{RunEntry, RunKind, RunStatus};
