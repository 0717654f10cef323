//! Persisted config (documents folder, index location, model settings) in the app data
//! directory. Every field has a default, so a partial or missing file still loads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app_data;
use crate::chunks::{ChunkError, Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embed::{Embedder, HashingEmbedder, DEFAULT_HASHING_DIMENSION};
use crate::index::{IngestOptions, DEFAULT_EMBED_BATCH, DEFAULT_LOG_BATCH};
use crate::ollama::{OllamaClient, OllamaEmbedder, OllamaError, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL};
use crate::providers::{ProviderKind, ProviderSettings};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder with the source documents (chosen by the operator).
    pub docs_dir: Option<String>,
    /// Index directory; defaults to `index/` in the app data directory.
    pub index_dir: Option<String>,
    /// Source metadata table; defaults to `sources.toml` inside `docs_dir`.
    pub sources: Option<String>,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> Result<Chunker, ChunkError> {
        Chunker::new(self.size, self.overlap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ollama,
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub base_url: String,
    pub batch_size: usize,
    /// Vector size of the hashing backend; Ollama models fix their own.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            model: DEFAULT_EMBED_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_size: DEFAULT_EMBED_BATCH,
            dimensions: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    /// Build the configured embedder. Ingestion and querying must use the same one.
    pub fn embedder(&self) -> Result<Box<dyn Embedder>, OllamaError> {
        Ok(match self.backend {
            EmbeddingBackend::Ollama => {
                let client = OllamaClient::from_url(&self.base_url)?.with_embed_model(self.model.clone());
                Box::new(OllamaEmbedder::new(client)?)
            }
            EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(self.dimensions)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: crate::assistant::DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `chatgpt`, `deepseek` or `ollama`.
    pub name: String,
    pub model: Option<String>,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: ProviderKind::ChatGpt.to_string(),
            model: None,
            temperature: 0.0,
        }
    }
}

impl Config {
    /// Ingestion options from the chunking and embedding sections.
    pub fn ingest_options(&self) -> Result<IngestOptions, ChunkError> {
        Ok(IngestOptions {
            chunker: self.chunking.chunker()?,
            embed_batch: self.embedding.batch_size.max(1),
            log_batch: DEFAULT_LOG_BATCH,
        })
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            model: self.provider.model.clone().filter(|m| !m.is_empty()),
            temperature: self.provider.temperature,
            ollama_url: self.embedding.base_url.clone(),
        }
    }

    pub fn docs_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.docs_dir)
    }

    /// Configured index directory, or the default one in the app data directory.
    pub fn index_dir(&self) -> Option<PathBuf> {
        non_empty_path(&self.index_dir).or_else(app_data::default_index_dir)
    }

    pub fn sources_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.sources).or_else(|| self.docs_dir().map(|d| d.join("sources.toml")))
    }
}

fn non_empty_path(value: &Option<String>) -> Option<PathBuf> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Path of the config file in the app data directory.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Load config from `path`. Returns default config if missing or invalid.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    toml::from_str(&s).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        Config::default()
    })
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Set and persist the documents folder.
pub fn set_docs_dir(path: &Path) -> Result<(), ConfigError> {
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let mut config = load_config();
    config.docs_dir = Some(path.to_string_lossy().into_owned());
    save_config(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}
