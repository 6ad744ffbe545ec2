//! The single mutable aggregate for one phase run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::checkpoint::CheckpointManager;
use crate::config::WorkflowConfig;
use crate::dag::{WaveMap, WaveScheduler};
use crate::errors::{ErrorRecord, OrchestratorError};
use crate::phase::{Artifacts, PhaseInfo};
use crate::plan::{Checkpoint, ExecutionResult, Plan, PlanId, PlanIssue};
use crate::stages::PlanningMode;

/// Phase state machine position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorStatus {
    #[default]
    Idle,
    Researching,
    Planning { mode: PlanningMode },
    Executing,
    Verifying,
    Complete,
    Blocked { reason: String },
    Failed,
}

impl OrchestratorStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Researching => "researching",
            Self::Planning { .. } => "planning",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Blocked { .. } => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked { .. } | Self::Failed)
    }

    /// Legal edges of the phase state machine.
    ///
    /// Every non-terminal state may fail. `Executing → Complete` is taken
    /// only when verification is disabled.
    pub fn can_transition_to(&self, next: &OrchestratorStatus) -> bool {
        use OrchestratorStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed) {
            return true;
        }
        match (self, next) {
            (Idle, Researching) | (Idle, Planning { .. }) => true,
            (Researching, Planning { .. }) | (Researching, Blocked { .. }) => true,
            (Planning { .. }, Executing) | (Planning { .. }, Blocked { .. }) => true,
            (Executing, Verifying) | (Executing, Complete) | (Executing, Blocked { .. }) => true,
            (Verifying, Complete) | (Verifying, Blocked { .. }) => true,
            (Verifying, Planning { mode }) => *mode == PlanningMode::GapClosure,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning { mode } => write!(f, "planning ({})", mode),
            Self::Blocked { reason } => write!(f, "blocked: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Planner/checker progress.
#[derive(Debug, Clone)]
pub struct PlanningState {
    pub mode: PlanningMode,
    /// Iterations used by the most recent planning loop
    pub iteration: u32,
    /// Accepted plans, including gap-closure additions
    pub plans: Vec<Plan>,
    /// Issues from the last checker pass
    pub issues: Vec<PlanIssue>,
    pub gap_closure_attempts: u32,
    pub verification_gaps: Vec<String>,
}

impl Default for PlanningState {
    fn default() -> Self {
        Self {
            mode: PlanningMode::Standard,
            iteration: 0,
            plans: Vec::new(),
            issues: Vec::new(),
            gap_closure_attempts: 0,
            verification_gaps: Vec::new(),
        }
    }
}

/// Wave execution progress. Owned and mutated only by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub scheduler: Option<WaveScheduler>,
    pub current_wave: usize,
    pub checkpoints: CheckpointManager,
    pub results: BTreeMap<PlanId, ExecutionResult>,
    pub deviations: Vec<String>,
}

impl ExecutionState {
    pub fn total_waves(&self) -> usize {
        self.scheduler.as_ref().map_or(0, WaveScheduler::total_waves)
    }

    /// Consistent copy of the execution sub-state.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let Some(sched) = &self.scheduler else {
            return ExecutionSnapshot::default();
        };
        ExecutionSnapshot {
            total_plans: sched.plan_count(),
            total_waves: sched.total_waves(),
            current_wave: self.current_wave,
            waves: sched.waves().clone(),
            completed: sched.completed(),
            failed: sched.failed(),
            in_progress: sched.in_progress(),
            paused: sched.paused(),
            awaiting: self.checkpoints.awaiting().into_iter().cloned().collect(),
        }
    }

    /// Descriptions of every broken execution invariant.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let Some(sched) = &self.scheduler else {
            if !self.checkpoints.is_empty() {
                violations.push("checkpoints open without a schedule".to_string());
            }
            return violations;
        };

        let sets = [
            ("completed", sched.completed()),
            ("failed", sched.failed()),
            ("in_progress", sched.in_progress()),
            ("paused", sched.paused()),
        ];
        for (i, (name_a, a)) in sets.iter().enumerate() {
            for id in a {
                if !sched.contains(id) {
                    violations.push(format!("{} contains unknown plan {}", name_a, id));
                }
            }
            for (name_b, b) in &sets[i + 1..] {
                if let Some(id) = a.intersection(b).next() {
                    violations.push(format!("{} is both {} and {}", id, name_a, name_b));
                }
            }
        }
        if !self.checkpoints.consistent_with(sched) {
            violations.push("open checkpoints do not match paused plans".to_string());
        }
        if self.current_wave > sched.total_waves() {
            violations.push(format!(
                "current wave {} exceeds {} waves",
                self.current_wave,
                sched.total_waves()
            ));
        }
        violations
    }
}

/// What an observer sees of execution at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionSnapshot {
    pub total_plans: usize,
    pub total_waves: usize,
    pub current_wave: usize,
    pub waves: WaveMap,
    pub completed: BTreeSet<PlanId>,
    pub failed: BTreeSet<PlanId>,
    pub in_progress: BTreeSet<PlanId>,
    pub paused: BTreeSet<PlanId>,
    pub awaiting: Vec<Checkpoint>,
}

impl ExecutionSnapshot {
    pub fn is_settled(&self) -> bool {
        self.total_plans > 0 && self.completed.len() + self.failed.len() == self.total_plans
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub config: WorkflowConfig,
    pub phase: PhaseInfo,
    pub artifacts: Artifacts,
    pub status: OrchestratorStatus,
    pub planning: PlanningState,
    pub execution: ExecutionState,
    pub error: Option<ErrorRecord>,
}

impl OrchestratorState {
    pub fn new(config: WorkflowConfig, phase: PhaseInfo) -> Self {
        Self {
            config,
            phase,
            artifacts: Artifacts::default(),
            status: OrchestratorStatus::Idle,
            planning: PlanningState::default(),
            execution: ExecutionState::default(),
            error: None,
        }
    }

    /// Move the state machine, rejecting edges it does not have.
    pub fn transition(&mut self, next: OrchestratorStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition_to(&next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status.name(),
                to: next.name(),
            });
        }
        info!(phase = %self.phase.number, from = %self.status, to = %next, "Phase transition");
        self.status = next;
        Ok(())
    }

    /// Terminal failure with its error record.
    pub fn fail(&mut self, error: &OrchestratorError) {
        self.error = Some(error.to_record());
        self.status = OrchestratorStatus::Failed;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = self.execution.invariant_violations();
        if self.planning.iteration > self.config.max_planning_iterations {
            violations.push(format!(
                "planning iteration {} exceeds {}",
                self.planning.iteration, self.config.max_planning_iterations
            ));
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CheckpointKind;

    fn state() -> OrchestratorState {
        OrchestratorState::new(
            WorkflowConfig::default(),
            PhaseInfo::new("01", "Setup", "Scaffold the project"),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = state();
        s.transition(OrchestratorStatus::Researching).unwrap();
        s.transition(OrchestratorStatus::Planning {
            mode: PlanningMode::Standard,
        })
        .unwrap();
        s.transition(OrchestratorStatus::Executing).unwrap();
        s.transition(OrchestratorStatus::Verifying).unwrap();
        s.transition(OrchestratorStatus::Planning {
            mode: PlanningMode::GapClosure,
        })
        .unwrap();
        s.transition(OrchestratorStatus::Executing).unwrap();
        s.transition(OrchestratorStatus::Verifying).unwrap();
        s.transition(OrchestratorStatus::Complete).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut s = state();
        let err = s.transition(OrchestratorStatus::Verifying).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: "idle",
                to: "verifying"
            }
        ));

        s.transition(OrchestratorStatus::Researching).unwrap();
        s.transition(OrchestratorStatus::Planning {
            mode: PlanningMode::Standard,
        })
        .unwrap();
        s.transition(OrchestratorStatus::Executing).unwrap();
        s.transition(OrchestratorStatus::Verifying).unwrap();
        // Only gap closure loops back into planning
        assert!(
            s.transition(OrchestratorStatus::Planning {
                mode: PlanningMode::Revision
            })
            .is_err()
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = state();
        s.fail(&OrchestratorError::Cancelled);
        assert_eq!(s.status, OrchestratorStatus::Failed);
        assert_eq!(s.error.as_ref().unwrap().code, "CANCELLED");
        assert!(s.transition(OrchestratorStatus::Researching).is_err());
        assert!(s.transition(OrchestratorStatus::Failed).is_err());
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let json = serde_json::to_value(OrchestratorStatus::Blocked {
            reason: "need a key".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "blocked");
        assert_eq!(json["reason"], "need a key");
    }

    #[test]
    fn test_snapshot_and_invariants() {
        let mut s = state();
        assert!(s.check_invariants().is_empty());
        assert_eq!(s.execution.snapshot(), ExecutionSnapshot::default());

        let mut sched = WaveScheduler::new(vec![
            Plan::new("a", vec![]),
            Plan::new("b", vec![]),
            Plan::new("c", vec!["a".into()]),
        ])
        .unwrap();
        sched.mark_running("a").unwrap();
        sched.mark_running("b").unwrap();
        sched.mark_completed("b").unwrap();
        s.execution.scheduler = Some(sched);

        let mut sched = s.execution.scheduler.take().unwrap();
        s.execution
            .checkpoints
            .pause(
                &mut sched,
                Checkpoint {
                    plan_id: "a".into(),
                    task_number: 1,
                    kind: CheckpointKind::HumanVerify,
                    description: "Check the UI".into(),
                    awaiting: String::new(),
                    options: vec![],
                },
            )
            .unwrap();
        s.execution.scheduler = Some(sched);

        let snap = s.execution.snapshot();
        assert_eq!(snap.total_plans, 3);
        assert_eq!(snap.total_waves, 2);
        assert!(snap.paused.contains("a"));
        assert!(snap.completed.contains("b"));
        assert_eq!(snap.awaiting.len(), 1);
        assert!(!snap.is_settled());
        assert!(s.check_invariants().is_empty());

        s.execution.current_wave = 5;
        assert_eq!(s.check_invariants().len(), 1);
    }

    #[test]
    fn test_dangling_checkpoint_is_a_violation() {
        let mut s = state();
        let mut sched = WaveScheduler::new(vec![Plan::new("a", vec![])]).unwrap();
        sched.mark_running("a").unwrap();
        s.execution
            .checkpoints
            .pause(
                &mut sched,
                Checkpoint {
                    plan_id: "a".into(),
                    task_number: 1,
                    kind: CheckpointKind::HumanAction,
                    description: "Rotate the key".into(),
                    awaiting: String::new(),
                    options: vec![],
                },
            )
            .unwrap();
        // The scheduler that knew about the pause is discarded
        s.execution.scheduler = Some(WaveScheduler::new(vec![Plan::new("a", vec![])]).unwrap());
        assert!(
            s.check_invariants()
                .iter()
                .any(|v| v.contains("checkpoints"))
        );
    }
}
