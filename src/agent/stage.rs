//! The capability interface every pipeline stage implements.

use serde::{Deserialize, Serialize};

/// The five conversational roles driven through `AgentRunner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Researcher,
    Planner,
    PlanChecker,
    Executor,
    Verifier,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Researcher => write!(f, "researcher"),
            StageKind::Planner => write!(f, "planner"),
            StageKind::PlanChecker => write!(f, "plan_checker"),
            StageKind::Executor => write!(f, "executor"),
            StageKind::Verifier => write!(f, "verifier"),
        }
    }
}

/// Prompt and parse contract for one stage.
///
/// Implementations are pure: building the prompt and parsing the final
/// answer must not perform I/O. `AgentRunner` owns the conversation,
/// the provider and the tools.
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn kind(&self) -> StageKind;

    /// Model identifier to send requests to.
    fn model(&self) -> &str;

    fn system_preamble(&self, input: &Self::Input) -> String;

    fn user_message(&self, input: &Self::Input) -> String;

    /// Parse the model's final text into the stage output.
    fn parse_output(&self, text: &str) -> anyhow::Result<Self::Output>;
}
