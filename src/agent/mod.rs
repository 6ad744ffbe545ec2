//! Generic agent machinery: conversations, providers, tools and the
//! bounded tool-use loop.

pub mod anthropic;
pub mod conversation;
pub mod provider;
pub mod runner;
pub mod stage;
pub mod tools;

pub use anthropic::AnthropicProvider;
pub use conversation::{
    ContentBlock, Conversation, Message, ProviderResponse, Role, ToolCall, ToolResult,
};
pub use provider::{ModelProvider, ProviderRequest, ToolDefinition};
pub use runner::{AgentRunner, DEFAULT_MAX_ITERATIONS};
pub use stage::{Stage, StageKind};
pub use tools::{BashTool, ReadFileTool, Tool, ToolRegistry, WriteFileTool};
