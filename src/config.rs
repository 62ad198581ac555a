use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the raw uploaded documents.
    pub data_dir: PathBuf,
    /// Directory the persisted index generation is written to.
    pub index_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk span in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks, so a fact severed at a
    /// boundary stays retrievable from at least one chunk.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of `hashing`, `openai`, `ollama`, `disabled`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Bounded retry on transient collaborator failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    1
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// One of `openai`, `ollama`, `disabled`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    /// Schedule-adherence tolerance, in percentage points.
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
    /// Completion fraction per issue status, matched on trimmed lowercase.
    /// Statuses absent from this table are a validation error, never a
    /// silent default.
    #[serde(default = "default_status_weights")]
    pub status_weights: HashMap<String, f64>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: default_tolerance_pct(),
            status_weights: default_status_weights(),
        }
    }
}

fn default_tolerance_pct() -> f64 {
    5.0
}

fn default_status_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("new".to_string(), 0.0),
        ("open".to_string(), 0.0),
        ("in progress".to_string(), 0.5),
        ("feedback".to_string(), 0.75),
        ("resolved".to_string(), 1.0),
        ("closed".to_string(), 1.0),
    ])
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    /// How long a terminal task stays queryable by id before it may be
    /// discarded.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::validation(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::validation(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::validation("chunking.chunk_size must be > 0"));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(Error::validation(
            "chunking.overlap must be smaller than chunking.chunk_size",
        ));
    }
    if config.retrieval.top_k == 0 {
        return Err(Error::validation("retrieval.top_k must be >= 1"));
    }

    match config.embedding.provider.as_str() {
        "hashing" | "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                return Err(Error::validation(format!(
                    "embedding.model must be set when provider is '{}'",
                    config.embedding.provider
                )));
            }
            if config.embedding.dims.map_or(true, |d| d == 0) {
                return Err(Error::validation(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                )));
            }
        }
        other => {
            return Err(Error::validation(format!(
                "unknown embedding provider: '{}'. Must be hashing, openai, ollama, or disabled.",
                other
            )));
        }
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                return Err(Error::validation(format!(
                    "generation.model must be set when provider is '{}'",
                    config.generation.provider
                )));
            }
        }
        other => {
            return Err(Error::validation(format!(
                "unknown generation provider: '{}'. Must be openai, ollama, or disabled.",
                other
            )));
        }
    }

    if !(0.0..=50.0).contains(&config.prediction.tolerance_pct) {
        return Err(Error::validation(
            "prediction.tolerance_pct must be in [0, 50]",
        ));
    }
    if config.prediction.status_weights.is_empty() {
        return Err(Error::validation(
            "prediction.status_weights must not be empty",
        ));
    }
    for (status, weight) in &config.prediction.status_weights {
        if !(0.0..=1.0).contains(weight) {
            return Err(Error::validation(format!(
                "prediction.status_weights['{}'] must be in [0, 1]",
                status
            )));
        }
    }

    Ok(())
}
