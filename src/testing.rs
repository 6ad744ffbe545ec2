//! Test doubles shared by unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::agent::{
    ContentBlock, Message, ModelProvider, ProviderRequest, ProviderResponse, Stage, StageKind,
    Tool,
};
use crate::errors::ProviderError;

/// Provider that replays a fixed script of responses and records every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same response.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Message history sent with the `index`th request.
    pub fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn send(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(response) => Ok(response.clone()),
            None => Err(ProviderError::Transport("script exhausted".into())),
        }
    }
}

/// A response consisting of a single tool call.
pub fn tool_call(id: &str, name: &str, input: Value) -> ProviderResponse {
    ProviderResponse::new(vec![ContentBlock::tool_use(id, name, input)])
}

/// A final text response carrying `value` as a fenced JSON block.
pub fn json_answer(value: Value) -> ProviderResponse {
    ProviderResponse::new(vec![ContentBlock::text(format!(
        "Here is the result.\n\n```json\n{}\n```",
        value
    ))])
}

/// Stage that returns the final text unchanged.
pub struct EchoStage;

impl EchoStage {
    pub const REJECT: &'static str = "REJECT";
}

impl Stage for EchoStage {
    type Input = String;
    type Output = String;

    fn kind(&self) -> StageKind {
        StageKind::Executor
    }

    fn model(&self) -> &str {
        "test-model"
    }

    fn system_preamble(&self, _input: &String) -> String {
        "You echo.".to_string()
    }

    fn user_message(&self, input: &String) -> String {
        input.clone()
    }

    fn parse_output(&self, text: &str) -> anyhow::Result<String> {
        if text == Self::REJECT {
            anyhow::bail!("output rejected");
        }
        Ok(text.to_string())
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _input: Value) -> anyhow::Result<String> {
        anyhow::bail!("disk on fire")
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _input: Value) -> anyhow::Result<String> {
        panic!("tool exploded")
    }
}
