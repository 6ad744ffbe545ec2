//! Typed error hierarchy for the gsd orchestrator.
//!
//! Four enums cover the layers of a phase run:
//! - `ProviderError` - model provider transport and API failures
//! - `AgentError` - a single `AgentRunner::run` that could not produce output
//! - `ScheduleError` - plan dependency graphs that cannot be layered into waves
//! - `OrchestratorError` - anything that terminates a phase run as `Failed`
//!
//! `StateError` is the odd one out: it reports an illegal plan status
//! transition (for example resuming a plan that is not paused) and is
//! absorbed by the coordinator rather than failing the run.

use crate::agent::StageKind;
use crate::plan::PlanId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from a model provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider transport failed: {0}")]
    Transport(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Errors from a single stage conversation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{stage} exceeded its budget of {iterations} iterations without a final answer")]
    IterationBudgetExceeded { stage: StageKind, iterations: u32 },

    #[error("{stage} finished without any final text output")]
    NoFinalOutput { stage: StageKind },

    #[error("Failed to parse {stage} output: {message}")]
    Parse { stage: StageKind, message: String },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: StageKind, after: Duration },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AgentError {
    /// Transport-level failures abort the whole run; everything else can be
    /// scoped to the plan or stage that hit it. A request timeout only
    /// fails the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Provider(e) if !e.is_timeout())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::IterationBudgetExceeded { .. } => "ITERATION_BUDGET_EXCEEDED",
            Self::NoFinalOutput { .. } => "NO_FINAL_OUTPUT",
            Self::Parse { .. } => "OUTPUT_PARSE_FAILED",
            Self::Timeout { .. } => "STAGE_TIMEOUT",
            Self::Provider(ProviderError::Timeout(_)) => "PROVIDER_TIMEOUT",
            Self::Provider(_) => "PROVIDER_FAILURE",
        }
    }

    fn stage(&self) -> Option<StageKind> {
        match self {
            Self::IterationBudgetExceeded { stage, .. }
            | Self::NoFinalOutput { stage }
            | Self::Parse { stage, .. }
            | Self::Timeout { stage, .. } => Some(*stage),
            Self::Provider(_) => None,
        }
    }
}

/// Errors from building a plan dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Cycle detected in plan dependencies. Involved plans: {plans:?}")]
    Cycle { plans: Vec<PlanId> },

    #[error("Unknown dependency '{dependency}' in plan '{plan}': no plan with that id exists")]
    UnknownDependency { plan: PlanId, dependency: PlanId },

    #[error("Duplicate plan id: {0}")]
    DuplicatePlan(PlanId),
}

/// An illegal plan status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Unknown plan: {0}")]
    UnknownPlan(PlanId),

    #[error("Plan {plan} cannot move from {from} to {to}")]
    InvalidTransition {
        plan: PlanId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Plan {0} has no open checkpoint")]
    NoCheckpoint(PlanId),
}

/// Errors that end a phase run in the `Failed` state.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Artifact store failed for {artifact}: {source:#}")]
    Artifact {
        artifact: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid orchestrator transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Gap closure budget of {attempts} attempts exhausted with {} open gaps", .gaps.len())]
    GapClosureExhausted { attempts: u32, gaps: Vec<String> },

    #[error("Run cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Stable machine-readable code for the error record.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Agent(e) => e.code(),
            Self::Schedule(ScheduleError::Cycle { .. }) => "DEPENDENCY_CYCLE",
            Self::Schedule(ScheduleError::UnknownDependency { .. }) => "UNKNOWN_DEPENDENCY",
            Self::Schedule(ScheduleError::DuplicatePlan(_)) => "DUPLICATE_PLAN",
            Self::State(_) => "INVALID_PLAN_STATE",
            Self::Artifact { .. } => "ARTIFACT_STORE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::GapClosureExhausted { .. } => "GAP_CLOSURE_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Structured data attached to the error record.
    pub fn context(&self) -> serde_json::Value {
        match self {
            Self::Agent(e) => match e.stage() {
                Some(stage) => serde_json::json!({ "stage": stage }),
                None => serde_json::Value::Null,
            },
            Self::Schedule(ScheduleError::Cycle { plans }) => serde_json::json!({ "plans": plans }),
            Self::Schedule(ScheduleError::UnknownDependency { plan, dependency }) => {
                serde_json::json!({ "plan": plan, "dependency": dependency })
            }
            Self::Schedule(ScheduleError::DuplicatePlan(plan)) => serde_json::json!({ "plan": plan }),
            Self::Artifact { artifact, .. } => serde_json::json!({ "artifact": artifact }),
            Self::InvalidTransition { from, to } => serde_json::json!({ "from": from, "to": to }),
            Self::GapClosureExhausted { attempts, gaps } => {
                serde_json::json!({ "attempts": attempts, "gaps": gaps })
            }
            Self::State(_) | Self::Cancelled => serde_json::Value::Null,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            code: self.code().to_string(),
            message: self.to_string(),
            context: self.context(),
        }
    }
}

/// The terminal global error stored on the orchestrator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}
