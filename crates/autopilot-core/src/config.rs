//! Persisted config (chunking limits, embedder, timeouts) in the app data directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::files::DEFAULT_MAX_FILE_BYTES;

const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable consulted when no OpenAI key is in the config file.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embedder: EmbedderConfig,
    pub timeouts: TimeoutConfig,
    /// Where the local vector index is written. Defaults to the app data directory.
    pub store_path: Option<String>,
}

/// Limits shared by the chunker, the splitter and the batcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens_per_chunk: usize,
    pub max_tokens_per_batch: usize,
    pub max_batch_items: usize,
    pub window_lines: usize,
    pub window_overlap: usize,
    pub max_file_bytes: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 2000,
            max_tokens_per_batch: 7000,
            max_batch_items: 20,
            window_lines: 15,
            window_overlap: 3,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl ChunkingConfig {
    /// Lines between the starts of two consecutive windows. Never zero.
    pub fn window_step(&self) -> usize {
        self.window_lines.saturating_sub(self.window_overlap).max(1)
    }

    /// Rejects limits that would make every chunk or batch impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens_per_chunk == 0 {
            return Err(ConfigError::Invalid("max_tokens_per_chunk must be positive"));
        }
        if self.max_tokens_per_batch < self.max_tokens_per_chunk {
            return Err(ConfigError::Invalid(
                "max_tokens_per_batch must be at least max_tokens_per_chunk",
            ));
        }
        if self.max_batch_items == 0 {
            return Err(ConfigError::Invalid("max_batch_items must be positive"));
        }
        if self.window_lines == 0 {
            return Err(ConfigError::Invalid("window_lines must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    Ollama,
    OpenAi,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    /// Model name; each provider has its own default.
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// OpenAI key. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
}

impl EmbedderConfig {
    /// The API key from the file or the environment, if any.
    pub fn resolved_api_key(&self) -> Option<String> {
        let non_blank = |k: &String| !k.trim().is_empty();
        self.api_key
            .clone()
            .filter(non_blank)
            .or_else(|| std::env::var(OPENAI_API_KEY_ENV).ok().filter(non_blank))
    }
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub clone_secs: u64,
    pub embed_secs: u64,
    pub store_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            clone_secs: 300,
            embed_secs: 60,
            store_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    let path = data_dir.join(CONFIG_FILENAME);
    let Ok(s) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    match toml::from_str(&s) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("ignoring invalid {}: {e}", path.display());
            Config::default()
        }
    }
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    let path = data_dir.join(CONFIG_FILENAME);
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

/// The configured store path, or the default one in the app data directory.
pub fn store_path(config: &Config) -> Option<PathBuf> {
    config
        .store_path
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(app_data::default_store_path)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("missing OpenAI API key (set embedder.api_key or {OPENAI_API_KEY_ENV})")]
    MissingApiKey,
    #[error("invalid embedder URL: {0}")]
    InvalidUrl(String),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
