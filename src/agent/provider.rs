//! Vendor-agnostic model provider interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::conversation::{Message, ProviderResponse};
use crate::errors::ProviderError;

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input object
    pub input_schema: serde_json::Value,
}

/// Everything a provider needs for one round-trip.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub max_tokens: u32,
}

/// Sends a conversation to a language model.
///
/// Implementations report transport and API failures as `ProviderError`;
/// `AgentRunner` treats every such error as fatal to the stage run.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn send(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError>;

    fn name(&self) -> &str {
        "provider"
    }
}
