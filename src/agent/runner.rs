//! Bounded tool-use conversation loop shared by every stage.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

use super::conversation::{Conversation, ToolCall, ToolResult};
use super::provider::{ModelProvider, ProviderRequest};
use super::stage::Stage;
use super::tools::ToolRegistry;
use crate::errors::AgentError;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Drives one stage conversation to a typed output.
///
/// Each iteration is one provider round-trip. A response without tool
/// calls ends the loop and its text goes to `Stage::parse_output`;
/// otherwise every requested tool runs and its text result is appended
/// to the history. Tool failures become `"Error: ..."` results and never
/// end the loop. Only provider errors, a missing final answer, an
/// unparseable answer and an exhausted iteration budget fail `run`.
#[derive(Clone)]
pub struct AgentRunner {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    max_tokens: u32,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn run<S: Stage>(&self, stage: &S, input: &S::Input) -> Result<S::Output, AgentError> {
        let span = info_span!("stage", stage = %stage.kind(), model = stage.model());
        self.run_inner(stage, input).instrument(span).await
    }

    async fn run_inner<S: Stage>(
        &self,
        stage: &S,
        input: &S::Input,
    ) -> Result<S::Output, AgentError> {
        let kind = stage.kind();
        let system = stage.system_preamble(input);
        let mut conversation = Conversation::new(stage.user_message(input));
        let catalog = self.tools.catalog();

        for iteration in 1..=self.max_iterations {
            debug!(iteration, messages = conversation.len(), "Sending request");
            let response = self
                .provider
                .send(ProviderRequest {
                    model: stage.model(),
                    system: &system,
                    messages: conversation.messages(),
                    tools: &catalog,
                    max_tokens: self.max_tokens,
                })
                .await?;

            let calls = response.tool_calls();
            if calls.is_empty() {
                let text = response
                    .final_text()
                    .ok_or(AgentError::NoFinalOutput { stage: kind })?;
                debug!(iteration, "Received final answer");
                return stage.parse_output(&text).map_err(|e| AgentError::Parse {
                    stage: kind,
                    message: format!("{:#}", e),
                });
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(self.execute_tool_call(call).await);
            }
            conversation.push_exchange(&response, results);
        }

        warn!(iterations = self.max_iterations, "Iteration budget exhausted");
        Err(AgentError::IterationBudgetExceeded {
            stage: kind,
            iterations: self.max_iterations,
        })
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return error_result(call, format!("Tool not found: {}", call.name));
        };

        debug!(tool = %call.name, id = %call.id, "Executing tool");
        match AssertUnwindSafe(tool.execute(call.input.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(content)) => ToolResult {
                tool_use_id: call.id.clone(),
                content,
                is_error: false,
            },
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                error_result(call, format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %call.name, panic = %message, "Tool panicked");
                error_result(call, format!("tool panicked: {}", message))
            }
        }
    }
}

fn error_result(call: &ToolCall, message: String) -> ToolResult {
    ToolResult {
        tool_use_id: call.id.clone(),
        content: format!("Error: {}", message),
        is_error: true,
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
