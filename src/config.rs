/// Configuration for MediBot.
///
/// Loaded from a JSON file whose every field is optional; missing fields take
/// the defaults below.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_vectorstore_path() -> String {
    "vectorstore/db".to_string()
}

fn default_search_top_k() -> usize {
    3
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_model_repo() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_model_dir() -> String {
    "models/all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_api_base() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_ask_temperature() -> f32 {
    0.5
}

fn default_chat_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_client_retries() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_parse_backoff_ms() -> u64 {
    2_000
}

fn default_rate_limit_backoff_ms() -> u64 {
    5_000
}

fn default_session_idle_secs() -> u64 {
    30 * 60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding the persisted vector index.
    #[serde(default = "default_vectorstore_path")]
    pub vectorstore_path: String,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Embedding model location.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    /// HuggingFace repository the files are fetched from.
    #[serde(default = "default_model_repo")]
    pub repo: String,

    #[serde(default = "default_model_dir")]
    pub dir: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

/// Chat-completion endpoint settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Temperature for the one-shot `ask` command.
    #[serde(default = "default_ask_temperature")]
    pub ask_temperature: f32,

    /// Temperature for chat sessions.
    #[serde(default = "default_chat_temperature")]
    pub chat_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport-level retries inside the client.
    #[serde(default = "default_client_retries")]
    pub max_retries: u32,
}

/// Pipeline-level retry budget.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_parse_backoff_ms")]
    pub parse_backoff_ms: u64,

    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
}

/// HTTP chat host settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Sessions untouched for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            vectorstore_path: default_vectorstore_path(),
            search_top_k: default_search_top_k(),
            model: ModelConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            repo: default_model_repo(),
            dir: default_model_dir(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_base: default_api_base(),
            ask_temperature: default_ask_temperature(),
            chat_temperature: default_chat_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_client_retries(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            parse_backoff_ms: default_parse_backoff_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl LlmConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. A file that is not valid JSON is
    /// reported and also yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        match serde_json::from_str(&data) {
            Ok(cfg) => {
                info!("Loaded configuration from {}", path.display());
                Ok(cfg)
            }
            Err(e) => {
                warn!("Invalid JSON in {}: {e}", path.display());
                warn!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(!self.llm.model.is_empty(), "llm.model must be set");
        anyhow::ensure!(self.llm.max_tokens > 0, "llm.max_tokens must be positive");
        anyhow::ensure!(self.llm.timeout_secs > 0, "llm.timeout_secs must be positive");
        for t in [self.llm.ask_temperature, self.llm.chat_temperature] {
            anyhow::ensure!(
                (0.0..=2.0).contains(&t),
                "temperature {t} outside 0.0..=2.0"
            );
        }
        anyhow::ensure!(
            self.retry.max_attempts > 0,
            "retry.max_attempts must be positive"
        );
        anyhow::ensure!(
            self.server.session_idle_secs > 0,
            "server.session_idle_secs must be positive"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.vectorstore_path, "vectorstore/db");
        assert_eq!(config.search_top_k, 3);
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.llm.max_tokens, 512);
        assert_eq!(config.llm.timeout(), Duration::from_secs(10));
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.parse_backoff_ms, 2_000);
        assert_eq!(config.retry.rate_limit_backoff_ms, 5_000);
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{"search_top_k": 5, "llm": {"chat_temperature": 0.4}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.search_top_k, 5);
        assert!((config.llm.chat_temperature - 0.4).abs() < f32::EPSILON);
        assert!((config.llm.ask_temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.model.name, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.search_top_k, 3);
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.vectorstore_path = "elsewhere".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.vectorstore_path, "elsewhere");
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.search_top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.chat_temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.session_idle_secs = 0;
        assert!(config.validate().is_err());
    }
}
