use tokio::runtime::Runtime;

use super::{ChatMessage, ChatProvider, ProviderError};
use crate::ollama::{blocking_runtime, OllamaClient};

/// Chat through a local Ollama server.
pub struct OllamaChatProvider {
    client: OllamaClient,
    model: String,
    runtime: Runtime,
}

impl OllamaChatProvider {
    pub fn new(url: &str, model: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: OllamaClient::from_url(url)?,
            model,
            runtime: blocking_runtime()?,
        })
    }
}

impl ChatProvider for OllamaChatProvider {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let answer = self
            .runtime
            .block_on(self.client.chat(&self.model, messages))?;
        if answer.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(answer)
    }
}
