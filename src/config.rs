use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Where the index lives
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Remote hosting API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_base_url: String,
    #[serde(default = "default_github_raw")]
    pub raw_base_url: String,
    /// Environment variable holding a token; unset means anonymous access.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_github_api(),
            raw_base_url: default_github_raw(),
            token_env: default_github_token_env(),
            timeout_secs: default_github_timeout(),
        }
    }
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model used for code-like chunks and queries
    #[serde(default = "default_code_model")]
    pub code_model: String,
    /// Model used for prose-like chunks and queries
    #[serde(default = "default_prose_model")]
    pub prose_model: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            code_model: default_code_model(),
            prose_model: default_prose_model(),
            timeout_secs: default_embedding_timeout(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Chunker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Approximate subword tokens per whitespace-separated word
    #[serde(default = "default_token_factor")]
    pub token_factor: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            token_factor: default_token_factor(),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    #[serde(default = "default_code_boost")]
    pub code_boost: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            code_boost: default_code_boost(),
        }
    }
}

/// Inference service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Annotate prompt context with absolute line numbers
    #[serde(default)]
    pub line_numbers: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_llm_model(),
            line_numbers: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_authless")]
    pub authless: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            api_key_env: default_http_api_key_env(),
            allowed_origins: default_allowed_origins(),
            authless: default_authless(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reporag.db")
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_raw() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_github_timeout() -> u64 {
    30
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_code_model() -> String {
    "mxbai-embed-large".to_string()
}

fn default_prose_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_max_tokens() -> usize {
    500
}

fn default_token_factor() -> f64 {
    1.3
}

fn default_k() -> usize {
    6
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_lexical_weight() -> f32 {
    0.3
}

fn default_code_boost() -> f32 {
    1.2
}

fn default_llm_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_api_key_env() -> String {
    "REPORAG_API_KEY".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![]
}

fn default_authless() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in REPORAG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("REPORAG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Parse and validate a specific config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.search.default_k == 0 {
            anyhow::bail!("search.default_k must be greater than 0");
        }

        for (name, weight) in [
            ("search.vector_weight", self.search.vector_weight),
            ("search.lexical_weight", self.search.lexical_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }

        if self.search.code_boost < 1.0 {
            anyhow::bail!("search.code_boost must be at least 1.0");
        }

        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be greater than 0");
        }

        if self.chunking.token_factor <= 0.0 {
            anyhow::bail!("chunking.token_factor must be positive");
        }

        if self.embeddings.code_model.trim().is_empty()
            || self.embeddings.prose_model.trim().is_empty()
        {
            anyhow::bail!("embeddings.code_model and embeddings.prose_model must be set");
        }

        if self.llm.model.trim().is_empty() {
            anyhow::bail!("llm.model must be set");
        }

        if self.embeddings.timeout_secs == 0 || self.github.timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than 0 seconds");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.storage.db_path
    }

    /// Token for the hosting API, if the configured variable is set
    pub fn github_token(&self) -> Option<String> {
        std::env::var(&self.github.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embeddings.timeout_secs)
    }
}
