//! Language-model providers that turn a grounded prompt into an answer.
//!
//! Providers are a closed set ([ProviderKind]) built through [ProviderRegistry]. Credentials
//! are read from the environment when a provider is built, never earlier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ollama::OllamaError;

mod ollama;
mod openai;

pub use self::ollama::OllamaChatProvider;
pub use self::openai::OpenAiCompatProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Trait implemented by concrete LLM providers.
pub trait ChatProvider: Send + Sync {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

/// Every provider the registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    ChatGpt,
    DeepSeek,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::ChatGpt, ProviderKind::DeepSeek, ProviderKind::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::ChatGpt => "chatgpt",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::ChatGpt => "gpt-4o-mini",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Ollama => crate::ollama::DEFAULT_CHAT_MODEL,
        }
    }

    /// Environment variable holding the API key, for hosted providers.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::ChatGpt => Some("OPENAI_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            ProviderKind::ChatGpt => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
            ProviderKind::Ollama => crate::ollama::DEFAULT_BASE_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or(ProviderError::UnknownProvider(s.to_string()))
    }
}

/// Settings shared by every provider the registry builds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    /// Overrides the provider's default model.
    pub model: Option<String>,
    pub temperature: f32,
    pub ollama_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            ollama_url: crate::ollama::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Builds providers by kind.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    settings: ProviderSettings,
}

impl ProviderRegistry {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn build(&self, kind: ProviderKind) -> Result<Box<dyn ChatProvider>, ProviderError> {
        let model = self
            .settings
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string());
        match kind {
            ProviderKind::ChatGpt | ProviderKind::DeepSeek => {
                let var = kind.api_key_var().unwrap_or_default();
                let api_key = std::env::var(var)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or(ProviderError::MissingApiKey(var))?;
                Ok(Box::new(OpenAiCompatProvider::new(
                    kind.base_url(),
                    api_key,
                    model,
                    self.settings.temperature,
                )?))
            }
            ProviderKind::Ollama => Ok(Box::new(OllamaChatProvider::new(
                &self.settings.ollama_url,
                model,
            )?)),
        }
    }

    /// Parse `name` and build it.
    pub fn build_named(&self, name: &str) -> Result<Box<dyn ChatProvider>, ProviderError> {
        self.build(name.parse()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown provider '{0}'; use chatgpt, deepseek or ollama")]
    UnknownProvider(String),
    #[error("{0} is not set")]
    MissingApiKey(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider returned no answer")]
    EmptyResponse,
    #[error(transparent)]
    Ollama(#[from] OllamaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names() {
        assert_eq!("chatgpt".parse::<ProviderKind>().unwrap(), ProviderKind::ChatGpt);
        assert_eq!(" DeepSeek ".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!(matches!(
            "gemini".parse::<ProviderKind>(),
            Err(ProviderError::UnknownProvider(name)) if name == "gemini"
        ));
    }

    #[test]
    fn names_round_trip_through_display() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn ollama_needs_no_api_key() {
        let registry = ProviderRegistry::default();
        assert!(registry.build(ProviderKind::Ollama).is_ok());
        assert!(ProviderKind::Ollama.api_key_var().is_none());
    }

    #[test]
    fn unknown_names_fail_before_building() {
        let registry = ProviderRegistry::default();
        assert!(matches!(
            registry.build_named("bard"),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_string(&ChatMessage::system("hola")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"hola"}"#);
    }
}
