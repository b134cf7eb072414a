//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. [`load_config`] parses and validates a file, while
//! [`Config::default`] is used by tests and by `--config` paths that do not
//! exist yet.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Local Zotero data directory and its SQLite replica.
#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/zotero.sqlite`.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Base directory for `attachments:` relative linked files.
    #[serde(default)]
    pub base_attachment_dir: Option<PathBuf>,
    /// Set to false to go straight to the remote API.
    #[serde(default = "default_true")]
    pub use_local: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            base_attachment_dir: None,
            use_local: true,
        }
    }
}

impl LibraryConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("zotero.sqlite"))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Zotero")
}

fn default_true() -> bool {
    true
}

/// Zotero Web API settings. The remote source is enabled when `library_id` is set.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub library_id: Option<String>,
    #[serde(default = "default_library_type")]
    pub library_type: String,
    /// Falls back to the `ZOTERO_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            library_id: None,
            library_type: default_library_type(),
            api_key: None,
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl RemoteConfig {
    pub fn is_enabled(&self) -> bool {
        self.library_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ZOTERO_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

fn default_library_type() -> String {
    "user".to_string()
}
fn default_api_base() -> String {
    "https://api.zotero.org".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}
fn default_max_concurrent_fetches() -> usize {
    10
}

/// Chunking and vector index settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// How far past the target size the chunker may look for a boundary.
    #[serde(default = "default_boundary_slack")]
    pub boundary_slack: usize,
    #[serde(default = "default_content_prefix_chars")]
    pub content_prefix_chars: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            collection_name: default_collection_name(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            boundary_slack: default_boundary_slack(),
            content_prefix_chars: default_content_prefix_chars(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_collection_name() -> String {
    "zotero_docs".to_string()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_boundary_slack() -> usize {
    100
}
fn default_content_prefix_chars() -> usize {
    10_000
}
fn default_snippet_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

/// Session snapshot and request cache settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./data/session.json")
}
fn default_cache_ttl_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Index
    if config.index.chunk_size == 0 {
        anyhow::bail!("index.chunk_size must be > 0");
    }
    if config.index.chunk_overlap >= config.index.chunk_size {
        anyhow::bail!(
            "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
            config.index.chunk_overlap,
            config.index.chunk_size
        );
    }
    if config.index.collection_name.trim().is_empty() {
        anyhow::bail!("index.collection_name must not be empty");
    }

    // Remote
    match config.remote.library_type.as_str() {
        "user" | "group" => {}
        other => anyhow::bail!(
            "Unknown remote.library_type: '{}'. Must be user or group.",
            other
        ),
    }
    if config.remote.max_concurrent_fetches == 0 {
        anyhow::bail!("remote.max_concurrent_fetches must be >= 1");
    }
    if config.remote.page_size == 0 || config.remote.page_size > 100 {
        anyhow::bail!("remote.page_size must be in [1, 100]");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}
