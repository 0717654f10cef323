//! Ollama client for embeddings and chat. Wraps ollama-rs with a simple API.
//!
//! The pipeline is synchronous, so [OllamaEmbedder] owns a small tokio runtime and blocks on
//! the async client. Do not call it from inside another tokio runtime.

use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage as OllamaMessage;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::embed::{normalize, EmbedError, Embedder};
use crate::providers::{ChatMessage, Role};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CHAT_MODEL: &str = "llama3.1";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around Ollama for embedding and chat.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OllamaError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(OllamaError::Request)?;
        Ok(res.embeddings)
    }

    /// Send a chat conversation and return the assistant's reply.
    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, OllamaError> {
        let messages = messages
            .iter()
            .map(|m| match m.role {
                Role::System => OllamaMessage::system(m.content.clone()),
                Role::User => OllamaMessage::user(m.content.clone()),
                Role::Assistant => OllamaMessage::assistant(m.content.clone()),
            })
            .collect();
        let res = self
            .inner
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await
            .map_err(OllamaError::Request)?;
        Ok(res.message.content)
    }
}

/// Runtime used to drive the async client from blocking code.
pub(crate) fn blocking_runtime() -> Result<Runtime, OllamaError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map_err(OllamaError::Runtime)
}

/// [Embedder] backed by an Ollama server.
pub struct OllamaEmbedder {
    client: OllamaClient,
    runtime: Runtime,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Result<Self, OllamaError> {
        Ok(Self {
            client,
            runtime: blocking_runtime()?,
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        self.client.embed_model()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut rows = self.runtime.block_on(self.client.embed_batch(texts))?;
        // Not every Ollama model returns unit vectors.
        rows.iter_mut().for_each(|r| normalize(r));
        Ok(rows)
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            OllamaClient::from_url("not a url"),
            Err(OllamaError::ParseUrl(_))
        ));
    }

    #[test]
    fn embed_model_is_configurable() {
        let client = OllamaClient::from_url(DEFAULT_BASE_URL)
            .unwrap()
            .with_embed_model("all-minilm");
        assert_eq!(client.embed_model(), "all-minilm");
    }

    #[test]
    fn embedder_reports_model_id() {
        let client = OllamaClient::from_url(DEFAULT_BASE_URL).unwrap();
        let embedder = OllamaEmbedder::new(client).unwrap();
        assert_eq!(embedder.model_id(), DEFAULT_EMBED_MODEL);
    }
}
