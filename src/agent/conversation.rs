//! Conversation history exchanged with a model provider.
//!
//! Content blocks follow the Messages wire shape (`text`, `tool_use`,
//! `tool_result`) so a history can be sent to the provider as-is. Other
//! block types (thinking, redacted thinking) are carried as raw JSON and
//! echoed back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single segment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        /// Correlation id echoed back in the matching `ToolResult`
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block types this crate does not interpret (e.g. thinking), verbatim
    #[serde(untagged)]
    Unknown(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: &str, name: &str, input: Value) -> Self {
        Self::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// The user turn carrying results for a batch of tool calls.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.tool_use_id,
                    content: r.content,
                    is_error: r.is_error,
                })
                .collect(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Text result of one tool call, correlated by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One provider round-trip's answer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ProviderResponse {
    pub fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: None,
        }
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// All text segments joined, or `None` if there are none.
    pub fn final_text(&self) -> Option<String> {
        let segments: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("\n"))
        }
    }
}

/// Ordered message history for one stage run.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user_text(user_message)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a provider answer and the tool results it triggered.
    ///
    /// The assistant turn is kept whole: thinking blocks must precede the
    /// tool results on the next request.
    pub fn push_exchange(&mut self, response: &ProviderResponse, results: Vec<ToolResult>) {
        self.messages
            .push(Message::assistant(response.content.clone()));
        self.messages.push(Message::tool_results(results));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_wire_shape() {
        let block = ContentBlock::tool_use("toolu_1", "read_file", json!({"path": "a"}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["id"], "toolu_1");

        let result = Message::tool_results(vec![ToolResult {
            tool_use_id: "toolu_1".into(),
            content: "ok".into(),
            is_error: false,
        }]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "tool_result");
        assert!(value["content"][0].get("is_error").is_none());
    }

    #[test]
    fn test_unknown_blocks_deserialize() {
        let json = r#"{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"done"}],"stop_reason":"end_turn"}"#;
        let response: ProviderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.content[0],
            ContentBlock::Unknown(json!({"type": "thinking", "thinking": "hmm"}))
        );
        assert_eq!(response.final_text().as_deref(), Some("done"));
        assert!(response.tool_calls().is_empty());
    }

    #[test]
    fn test_final_text_none_without_text() {
        let response = ProviderResponse::new(vec![ContentBlock::text("   ")]);
        assert!(response.final_text().is_none());
    }

    #[test]
    fn test_push_exchange_echoes_thinking_blocks() {
        let json = r#"{"content":[
            {"type":"thinking","thinking":"need a shell","signature":"sig-1"},
            {"type":"tool_use","id":"t1","name":"bash","input":{}}
        ]}"#;
        let response: ProviderResponse = serde_json::from_str(json).unwrap();
        let mut conversation = Conversation::new("hi");
        conversation.push_exchange(&response, Vec::new());

        assert_eq!(conversation.len(), 3);
        let assistant = &conversation.messages()[1];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content.len(), 2);

        let value = serde_json::to_value(assistant).unwrap();
        assert_eq!(value["content"][0]["type"], "thinking");
        assert_eq!(value["content"][0]["signature"], "sig-1");
        assert_eq!(value["content"][1]["type"], "tool_use");
    }
}
