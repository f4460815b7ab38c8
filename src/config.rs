use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/docdex.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size, measured in characters.
    pub max_chars: usize,
    /// Trailing characters carried into the next chunk of the same section.
    pub overlap_chars: usize,
    /// Header levels tracked in chunk lineage; deeper headers flow as body.
    pub header_levels: u8,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 200,
            header_levels: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_results: usize,
    pub score_threshold: f32,
    pub context_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            score_threshold: 0.0,
            context_size: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `local`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// A missing file is not an error — defaults apply, which keeps the tool
/// usable with nothing but environment variables set.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(v) = std::env::var("DOCDEX_DB") {
        config.db.path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("EMBEDDING_MODEL_TYPE") {
        // "remote" is accepted as an alias for the OpenAI-backed provider.
        config.embedding.provider = match v.to_lowercase().as_str() {
            "remote" => "openai".to_string(),
            other => other.to_string(),
        };
    }
    if let Ok(v) = std::env::var("EMBEDDING_MODEL_NAME") {
        config.embedding.model = Some(v);
    }
    if let Ok(v) = std::env::var("CHUNK_SIZE") {
        config.chunking.max_chars = parse_env("CHUNK_SIZE", &v)?;
    }
    if let Ok(v) = std::env::var("CHUNK_OVERLAP") {
        config.chunking.overlap_chars = parse_env("CHUNK_OVERLAP", &v)?;
    }
    if let Ok(v) = std::env::var("MAX_RESULTS") {
        config.retrieval.max_results = parse_env("MAX_RESULTS", &v)?;
    }
    if let Ok(v) = std::env::var("SIMILARITY_THRESHOLD") {
        config.retrieval.score_threshold = parse_env("SIMILARITY_THRESHOLD", &v)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid {}: '{}'", name, value)))
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        return Err(Error::Configuration(
            "chunking.max_chars must be > 0".to_string(),
        ));
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        return Err(Error::Configuration(format!(
            "chunking.overlap_chars ({}) must be < chunking.max_chars ({})",
            config.chunking.overlap_chars, config.chunking.max_chars
        )));
    }
    if config.chunking.header_levels == 0 || config.chunking.header_levels > 6 {
        return Err(Error::Configuration(
            "chunking.header_levels must be in 1..=6".to_string(),
        ));
    }
    if config.retrieval.max_results < 1 {
        return Err(Error::Configuration(
            "retrieval.max_results must be >= 1".to_string(),
        ));
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => {
            return Err(Error::Configuration(format!(
                "unknown embedding provider: '{}'. Must be disabled, openai, or local.",
                other
            )))
        }
    }
    Ok(())
}
