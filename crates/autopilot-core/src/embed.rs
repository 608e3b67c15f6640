//! The embedding-client seam. The indexer only talks to [`Embedder`]; which
//! service sits behind it is decided by config.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigError, EmbedderConfig, EmbedderProvider};
use crate::ollama::{OllamaClient, OllamaError};
use crate::openai::OpenAiEmbedder;

/// Turns texts into vectors. One vector per input, in input order; a failure
/// fails the whole call.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Model name, used to pick a tokenizer.
    fn model(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Ollama: {0}")]
    Ollama(#[from] OllamaError),
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("expected {expected} embeddings, got {got}")]
    Count { expected: usize, got: usize },
}

/// Builds the configured embedder. Missing credentials fail here, not mid-run.
pub fn from_config(config: &EmbedderConfig) -> Result<Arc<dyn Embedder>, ConfigError> {
    match config.provider {
        EmbedderProvider::Ollama => {
            let url = config
                .base_url
                .as_deref()
                .unwrap_or(crate::ollama::DEFAULT_BASE_URL);
            let mut client =
                OllamaClient::from_url(url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
            if let Some(model) = &config.model {
                client = client.with_embed_model(model.clone());
            }
            Ok(Arc::new(client))
        }
        EmbedderProvider::OpenAi => {
            let key = config.resolved_api_key().ok_or(ConfigError::MissingApiKey)?;
            let mut client = OpenAiEmbedder::new(key, config.base_url.as_deref())?;
            if let Some(model) = &config.model {
                client = client.with_model(model.clone());
            }
            Ok(Arc::new(client))
        }
    }
}
