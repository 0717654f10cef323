use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatProvider, ProviderError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat completions over the OpenAI wire format. Serves both OpenAI and DeepSeek, which
/// differ only in base URL, key and model.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: String,
        model: String,
        temperature: f32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            model,
            temperature,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ChatProvider for OpenAiCompatProvider {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        if let Ok(value) = HeaderValue::from_str(&auth) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
        };
        let resp = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&body)
            .send()?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status { status, body });
        }
        let parsed: ChatResponse = resp.json()?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let p = OpenAiCompatProvider::new("https://api.deepseek.com/", "k".into(), "deepseek-chat".into(), 0.0).unwrap();
        assert_eq!(p.endpoint(), "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn request_body_uses_openai_shape() {
        let messages = [ChatMessage::system("s"), ChatMessage::user("u")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.0,
            messages: &messages,
        };
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "u");
    }

    #[test]
    fn response_without_content_is_empty() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
