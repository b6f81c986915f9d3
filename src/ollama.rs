/// Embedding backend.
///
/// A blocking client for an Ollama embedding endpoint, with retry and timeout handling,
/// behind the `Embedder` trait used by similarity tagging.
mod client;

pub use client::{
    DEFAULT_EMBED_MODEL, DEFAULT_HOST, Embedder, OllamaClient, OllamaClientBuilder, OllamaError,
    RetryPolicy, retry_with_backoff,
};
