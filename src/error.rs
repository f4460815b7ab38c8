//! Typed error taxonomy for the chunking and retrieval core.
//!
//! Configuration errors are fatal and abort the run; provider timeouts and
//! rate limits are transient — the caller retries the whole failed batch.
//! Empty-index and not-found conditions are reported to the caller and are
//! never fatal to the process.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal: invalid options, missing credentials, or an embedding dimension
    /// that does not match the vectors already in the index.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding backend did not respond within the configured timeout,
    /// after retries. The whole batch should be retried.
    #[error("embedding provider timed out: {0}")]
    ProviderTimeout(String),

    /// The embedding backend kept rate-limiting past all retries.
    #[error("embedding provider rate limited: {0}")]
    ProviderRateLimit(String),

    /// Any other embedding backend failure (bad response shape, model
    /// initialization, non-retryable HTTP status).
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// A query was issued against an index with no chunks.
    #[error("index is empty; run `docdex index` first")]
    EmptyIndex,

    /// An unknown chunk id was referenced.
    #[error("chunk not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
