//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::conversation::{Message, ProviderResponse};
use super::provider::{ModelProvider, ProviderRequest, ToolDefinition};
use crate::errors::ProviderError;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
}

impl<'a> From<ProviderRequest<'a>> for MessagesRequest<'a> {
    fn from(request: ProviderRequest<'a>) -> Self {
        Self {
            model: request.model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: request.messages,
            tools: request.tools,
        }
    }
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        api_base: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Build a provider from `ANTHROPIC_API_KEY`.
    pub fn from_env(api_base: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey(API_KEY_ENV))?;
        Self::new(api_key, api_base, timeout)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn send(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let body = MessagesRequest::from(request);
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<ProviderResponse>().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::from(e)
            } else {
                ProviderError::Decode(e.to_string())
            }
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::conversation::ContentBlock;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::user_text("hello")];
        let tools = vec![ToolDefinition {
            name: "bash".into(),
            description: "run".into(),
            input_schema: json!({"type": "object"}),
        }];
        let request = ProviderRequest {
            model: "claude-sonnet-4-0",
            system: "be brief",
            messages: &messages,
            tools: &tools,
            max_tokens: 1024,
        };
        let body = serde_json::to_value(MessagesRequest::from(request)).unwrap();
        assert_eq!(body["model"], "claude-sonnet-4-0");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_request_body_omits_empty_tools_and_system() {
        let messages = vec![Message::user_text("hello")];
        let request = ProviderRequest {
            model: "m",
            system: "",
            messages: &messages,
            tools: &[],
            max_tokens: 1,
        };
        let body = serde_json::to_value(MessagesRequest::from(request)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_response_decodes_tool_use() {
        let json = r#"{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Reading the file."},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a.txt"}}
            ],
            "stop_reason": "tool_use"
        }"#;
        let response: ProviderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(
            response.content[1],
            ContentBlock::tool_use("toolu_1", "read_file", json!({"path": "a.txt"}))
        );
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        // Accepts connections but never writes a response
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let provider = AnthropicProvider::new(
            "key".into(),
            Some(format!("http://{}", addr)),
            Duration::from_millis(200),
        )
        .unwrap();
        let messages = vec![Message::user_text("hello")];
        let err = provider
            .send(ProviderRequest {
                model: "m",
                system: "",
                messages: &messages,
                tools: &[],
                max_tokens: 1,
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {}", err);
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let provider = AnthropicProvider::new(
            "key".into(),
            Some("http://localhost:8080/".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/messages");
    }
}
