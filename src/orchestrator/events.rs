//! Events emitted while a phase runs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::state::OrchestratorStatus;
use crate::dag::WaveMap;
use crate::errors::ErrorRecord;
use crate::plan::{Checkpoint, PlanId};
use crate::stages::PlanningMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The phase state machine moved.
    StatusChanged {
        from: OrchestratorStatus,
        to: OrchestratorStatus,
    },
    /// A planner/checker round finished.
    PlanningIteration {
        mode: PlanningMode,
        iteration: u32,
        max_iterations: u32,
        plans: usize,
        blockers: usize,
    },
    /// Accepted plans were layered into waves.
    WavesComputed { waves: WaveMap },
    WaveStarted { wave: usize, plans: Vec<PlanId> },
    PlanStarted {
        plan_id: PlanId,
        wave: usize,
        resumed: bool,
    },
    PlanCompleted { plan_id: PlanId, summary: String },
    PlanFailed { plan_id: PlanId, error: String },
    /// Never executed because a dependency failed.
    PlanSkipped {
        plan_id: PlanId,
        failed_dependency: PlanId,
    },
    PlanPaused { checkpoint: Checkpoint },
    /// Nothing can progress until one of these checkpoints is resolved.
    AwaitingHuman { checkpoints: Vec<Checkpoint> },
    WaveCompleted {
        wave: usize,
        completed: usize,
        failed: usize,
    },
    /// The run reached a terminal status.
    Finished {
        status: OrchestratorStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorRecord>,
    },
}

/// Optional event channel. Emitting never blocks and never fails the run.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
