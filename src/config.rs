use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub stylometry: StylometryConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Most-recent prior mails included as tone examples.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: i64,
    /// Semantically similar mails fetched from the embedding index.
    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,
    /// Prior mails the stylometric profile is computed over.
    #[serde(default = "default_profile_window")]
    pub profile_window: i64,
    /// Words kept per grammatical category in the profile.
    #[serde(default = "default_profile_top")]
    pub profile_top: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            similar_limit: default_similar_limit(),
            profile_window: default_profile_window(),
            profile_top: default_profile_top(),
        }
    }
}

fn default_recent_limit() -> i64 {
    3
}
fn default_similar_limit() -> usize {
    5
}
fn default_profile_window() -> i64 {
    100
}
fn default_profile_top() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Framing prepended to search queries for asymmetric models
    /// (e.g. `"query: "` for the e5 family).
    #[serde(default)]
    pub query_prefix: Option<String>,
    /// Framing prepended to stored passages for asymmetric models
    /// (e.g. `"passage: "`).
    #[serde(default)]
    pub passage_prefix: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            query_prefix: None,
            passage_prefix: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StylometryConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StylometryConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StylometryConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            timeout_secs: default_generator_timeout(),
        }
    }
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_generator_timeout() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.recent_limit < 1 {
        anyhow::bail!("retrieval.recent_limit must be >= 1");
    }
    if config.retrieval.similar_limit < 1 {
        anyhow::bail!("retrieval.similar_limit must be >= 1");
    }
    if config.retrieval.profile_window < 1 {
        anyhow::bail!("retrieval.profile_window must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.provider != "local" {
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
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate stylometry
    match config.stylometry.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.stylometry.url.is_none() {
                anyhow::bail!("stylometry.url must be set when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown stylometry provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    // Validate generator
    match config.generator.provider.as_str() {
        "disabled" => {}
        "ollama" => {
            if config.generator.model.is_none() {
                anyhow::bail!("generator.model must be set when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(config)
}
