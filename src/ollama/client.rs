/// Ollama embedding client.
///
/// Provides `OllamaClient`, a blocking client for the `/api/embed` endpoint, the
/// `Embedder` trait it implements, and retry handling for transient failures.
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default embedding model when neither the builder nor `OLLAMA_EMBED_MODEL` names one.
pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";

/// Default host when neither the builder nor `OLLAMA_HOST` names one.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Errors that can occur when requesting embeddings.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The server answered but the payload is unusable
    #[error("Ollama API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl OllamaError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::Network(error)
        }
    }
}

/// Turns text into dense vectors.
///
/// Implemented by [`OllamaClient`]; tests substitute deterministic mocks.
pub trait Embedder: Send + Sync {
    /// Embeds each text, returning one vector per input in the same order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OllamaError>;
}

/// Delays between attempts of a retried request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }
}

impl Default for RetryPolicy {
    /// Three retries after 1s, 2s and 4s.
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ])
    }
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use craml::ollama::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .model("nomic-embed-text")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.model(), "nomic-embed-text");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    batch_size: Option<usize>,
    retry: Option<RetryPolicy>,
}

impl OllamaClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL (e.g. "http://localhost:11434").
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the embedding model (e.g. "all-minilm").
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Maximum number of texts sent per request (default 64).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size.max(1));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Builds the client.
    ///
    /// Unset values fall back to `OLLAMA_HOST` / `OLLAMA_EMBED_MODEL`, then to
    /// [`DEFAULT_HOST`] / [`DEFAULT_EMBED_MODEL`].
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let base_url = self
            .base_url
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();

        let model = self
            .model
            .or_else(|| std::env::var("OLLAMA_EMBED_MODEL").ok())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());

        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            client,
            base_url,
            model,
            batch_size: self.batch_size.unwrap_or(64),
            retry: self.retry.unwrap_or_default(),
        })
    }
}

/// Blocking client for the Ollama embedding API.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Parses an `/api/embed` response body and checks it has one vector per input.
fn parse_embed_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, OllamaError> {
    let response: EmbedResponse =
        serde_json::from_str(body).map_err(OllamaError::Serialization)?;
    if response.embeddings.len() != expected {
        return Err(OllamaError::Api {
            message: format!(
                "expected {} embeddings, got {}",
                expected,
                response.embeddings.len()
            ),
        });
    }
    Ok(response.embeddings)
}

impl OllamaClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, OllamaError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            input: batch,
        };

        retry_with_backoff(&self.retry, || {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .map_err(OllamaError::from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                // 4xx are final, 5xx are retried
                return Err(OllamaError::Http {
                    status: status.as_u16(),
                });
            }

            let text = response.text().map_err(OllamaError::from_reqwest)?;
            parse_embed_response(&text, batch.len())
        })
    }
}

impl Embedder for OllamaClient {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OllamaError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, size = batch.len(), "embedding batch");
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}

/// Runs `f`, retrying transient failures after each delay of the policy.
///
/// Only network errors, timeouts and HTTP 5xx are retried; everything else is returned
/// immediately.
pub fn retry_with_backoff<F, T>(policy: &RetryPolicy, mut f: F) -> Result<T, OllamaError>
where
    F: FnMut() -> Result<T, OllamaError>,
{
    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) if !should_retry(&e) => return Err(e),
        Err(e) => e,
    };

    for delay in &policy.delays {
        warn!(error = %last_error, delay_ms = delay.as_millis() as u64, "retrying embedding request");
        thread::sleep(*delay);

        match f() {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}

fn should_retry(error: &OllamaError) -> bool {
    match error {
        OllamaError::Network(_) | OllamaError::Timeout(_) => true,
        OllamaError::Http { status } => (500..600).contains(status),
        OllamaError::Serialization(_) | OllamaError::Api { .. } | OllamaError::InvalidUrl(_) => {
            false
        }
    }
}
