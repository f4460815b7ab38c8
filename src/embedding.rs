//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete backends:
//! - **disabled** — errors on use; lets chunk-only indexing and header or
//!   context lookups run without a model.
//! - **openai** — remote API, batched, with retry and exponential backoff.
//! - **local** — fastembed; models download once and then run offline.
//!
//! The trait carries provider metadata only; the embedding work itself lives
//! in free async functions dispatched on the configured provider name.
//! Selection happens once at startup via [`create_provider`], never via
//! runtime type inspection.
//!
//! Contract: `embed_texts` returns vectors in input order, one per input.
//! A partial failure fails the whole call — callers retry the whole batch.
//!
//! # Retry strategy
//!
//! Transient failures (HTTP 429, 5xx, network errors) retry with exponential
//! backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped). Exhausted retries surface as
//! [`Error::ProviderRateLimit`] or [`Error::ProviderTimeout`] so callers can
//! distinguish them; other 4xx statuses fail immediately.
//!
//! Also provides the vector plumbing shared with the store:
//! [`vec_to_blob`] / [`blob_to_vec`] (little-endian f32 BLOB encoding) and
//! [`cosine_similarity`].

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Capability interface for embedding backends: fixed output dimension,
/// interchangeable without affecting any other component.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality, e.g. `1536`.
    fn dims(&self) -> usize;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(Error::Configuration(
            "local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(Error::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embed a batch of texts with the configured backend.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        #[cfg(feature = "local-embeddings")]
        "local" => embed_local(config, texts).await,
        "disabled" => Err(Error::Configuration(
            "embedding provider is disabled".to_string(),
        )),
        other => Err(Error::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embed a single query text.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("empty embedding response".to_string()))
}

// ============ Disabled provider ============

/// Placeholder provider for configurations without embeddings.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI provider ============

/// Remote provider backed by the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY` in the environment; its absence is a
/// configuration error surfaced at startup, not at first request.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::Configuration("embedding.model required for the openai provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::Configuration("embedding.dims required for the openai provider".to_string())
        })?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Configuration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| Error::Configuration("OPENAI_API_KEY not set".to_string()))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| Error::Configuration("embedding.model required".to_string()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err: Option<Error> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json, texts.len());
                }

                let body_text = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 {
                    last_err = Some(Error::ProviderRateLimit(format!(
                        "OpenAI API {}: {}",
                        status, body_text
                    )));
                    continue;
                }
                if status.is_server_error() {
                    last_err = Some(Error::Provider(format!(
                        "OpenAI API {}: {}",
                        status, body_text
                    )));
                    continue;
                }

                // Client error other than 429 — not retryable.
                return Err(Error::Provider(format!(
                    "OpenAI API {}: {}",
                    status, body_text
                )));
            }
            Err(e) if e.is_timeout() => {
                last_err = Some(Error::ProviderTimeout(e.to_string()));
                continue;
            }
            Err(e) => {
                last_err = Some(Error::Http(e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Provider("embedding failed after retries".to_string())))
}

fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Provider("invalid OpenAI response: missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Provider("invalid OpenAI response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    if embeddings.len() != expected {
        return Err(Error::Provider(format!(
            "OpenAI returned {} embeddings for {} inputs",
            embeddings.len(),
            expected
        )));
    }

    Ok(embeddings)
}

// ============ Local provider (fastembed) ============

/// Local provider running models via fastembed. The model downloads on first
/// use and is cached; subsequent runs need no network at all.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = normalize_local_model(config);
        let dims = config
            .dims
            .unwrap_or_else(|| local_model_dims(&model_name));
        Ok(Self { model_name, dims })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings")]
fn normalize_local_model(config: &EmbeddingConfig) -> String {
    config
        .model
        .as_deref()
        .unwrap_or("all-minilm-l6-v2")
        .to_lowercase()
}

#[cfg(feature = "local-embeddings")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings")]
fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(Error::Configuration(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
async fn embed_local(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model_name = normalize_local_model(config);
    let fastembed_model = to_fastembed_model(&model_name)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| Error::Provider(format!("failed to initialize local model: {}", e)))?;

        model
            .embed(texts, Some(batch_size))
            .map_err(|e| Error::Provider(format!("local embedding failed: {}", e)))
    })
    .await
    .map_err(|e| Error::Provider(format!("local embedding task panicked: {}", e)))?
}

// ============ Vector plumbing ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical_is_max() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        // Scaling does not change direction
        let scaled: Vec<f32> = v.iter().map(|x| x * 7.0).collect();
        assert!((cosine_similarity(&v, &scaled) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_disabled_provider_metadata() {
        let p = DisabledProvider;
        assert_eq!(p.model_name(), "disabled");
        assert_eq!(p.dims(), 0);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors_on_use() {
        let config = EmbeddingConfig::default();
        let err = embed_texts(&config, &["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        // Even with no provider configured, an empty batch never errors.
        let config = EmbeddingConfig::default();
        let out = embed_texts(&config, &[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_openai_provider_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAIProvider::new(&config),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_openai_response_shape() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let out = parse_openai_response(&json, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], vec![0.3f32, 0.4]);

        // Length mismatch fails the whole call — no partial results.
        assert!(parse_openai_response(&json, 3).is_err());
        assert!(parse_openai_response(&serde_json::json!({}), 1).is_err());
    }

    #[cfg(feature = "local-embeddings")]
    #[test]
    fn test_local_model_dims_table() {
        assert_eq!(local_model_dims("all-minilm-l6-v2"), 384);
        assert_eq!(local_model_dims("bge-large-en-v1.5"), 1024);
        // Original-style capitalization normalizes to the same model
        let config = EmbeddingConfig {
            provider: "local".to_string(),
            model: Some("all-MiniLM-L6-v2".to_string()),
            ..Default::default()
        };
        let p = LocalProvider::new(&config).unwrap();
        assert_eq!(p.model_name(), "all-minilm-l6-v2");
        assert_eq!(p.dims(), 384);
    }
}
