//! Phase orchestration.
//!
//! `PhaseOrchestrator` drives the state machine, `WaveExecutor` runs the
//! scheduled plans, and `OrchestratorHandle` is how the outside world
//! resolves checkpoints and cancels a run.

pub mod events;
pub mod execution;
pub mod handle;
pub mod runner;
pub mod state;

pub use events::{EventSink, OrchestratorEvent};
pub use execution::{AgentPlanRunner, ExecutionOutcome, PlanRunner, WaveExecutor};
pub use handle::{OrchestratorCommand, OrchestratorControl, OrchestratorHandle};
pub use runner::PhaseOrchestrator;
pub use state::{
    ExecutionSnapshot, ExecutionState, OrchestratorState, OrchestratorStatus, PlanningState,
};
