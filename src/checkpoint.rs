//! Checkpoint tracking for plans paused on a human decision.
//!
//! A checkpoint exists for a plan exactly while the scheduler reports that
//! plan as paused. Both sides move together: `pause` and `resume` change the
//! scheduler status and the checkpoint map in one call, and leave both
//! untouched when the transition is illegal.

use crate::dag::WaveScheduler;
use crate::errors::StateError;
use crate::plan::{Checkpoint, PlanId, Resolution};
use std::collections::BTreeMap;
use tracing::info;

/// A resolved checkpoint, ready to re-run its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeTicket {
    pub plan_id: PlanId,
    pub checkpoint: Checkpoint,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointManager {
    active: BTreeMap<PlanId, Checkpoint>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a running plan to paused and record what it waits for.
    pub fn pause(
        &mut self,
        scheduler: &mut WaveScheduler,
        checkpoint: Checkpoint,
    ) -> Result<(), StateError> {
        scheduler.mark_paused(&checkpoint.plan_id)?;
        info!(
            plan = %checkpoint.plan_id,
            kind = %checkpoint.kind,
            task = checkpoint.task_number,
            "Plan paused at checkpoint"
        );
        self.active.insert(checkpoint.plan_id.clone(), checkpoint);
        Ok(())
    }

    /// Close the checkpoint of a paused plan and move it back to running.
    pub fn resume(
        &mut self,
        scheduler: &mut WaveScheduler,
        plan_id: &str,
        resolution: Resolution,
    ) -> Result<ResumeTicket, StateError> {
        if !self.active.contains_key(plan_id) {
            return Err(StateError::NoCheckpoint(plan_id.to_string()));
        }
        scheduler.mark_resumed(plan_id)?;
        let checkpoint = self
            .active
            .remove(plan_id)
            .ok_or_else(|| StateError::NoCheckpoint(plan_id.to_string()))?;
        info!(plan = %plan_id, "Checkpoint resolved");
        Ok(ResumeTicket {
            plan_id: plan_id.to_string(),
            checkpoint,
            resolution,
        })
    }

    /// Drop the checkpoint of a plan that is being failed or cancelled.
    pub fn discard(&mut self, plan_id: &str) -> Option<Checkpoint> {
        self.active.remove(plan_id)
    }

    /// Open checkpoints, in plan id order.
    pub fn awaiting(&self) -> Vec<&Checkpoint> {
        self.active.values().collect()
    }

    pub fn get(&self, plan_id: &str) -> Option<&Checkpoint> {
        self.active.get(plan_id)
    }

    pub fn is_paused(&self, plan_id: &str) -> bool {
        self.active.contains_key(plan_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Whether the open checkpoints match the scheduler's paused set.
    pub fn consistent_with(&self, scheduler: &WaveScheduler) -> bool {
        scheduler.paused().into_iter().eq(self.active.keys().cloned())
    }
}
