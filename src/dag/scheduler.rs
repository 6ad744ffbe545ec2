//! Wave scheduler: classifies plans into waves and tracks their status.
//!
//! The scheduler performs no execution. It answers "which plans may start
//! now", records status transitions, and propagates failures to dependents.

use crate::dag::builder::{DagBuilder, PlanGraph, PlanIndex};
use crate::errors::{ScheduleError, StateError};
use crate::plan::{Plan, PlanId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Wave number → plan ids in that wave, in plan order.
pub type WaveMap = BTreeMap<usize, Vec<PlanId>>;

/// Status of a plan in the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanStatus {
    /// Plan is waiting to run
    #[default]
    Pending,
    /// Plan's executor is running
    Running,
    /// Plan hit a checkpoint and is waiting for a human
    Paused,
    /// Plan completed successfully
    Completed,
    /// Plan's executor failed
    Failed { error: String },
    /// Plan never ran because a dependency failed
    Skipped { failed_dependency: PlanId },
}

impl PlanStatus {
    /// Check if the plan is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Skipped { .. }
        )
    }

    /// Check if the plan completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Failed or skipped: counts as failed for dependents.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// A plan with its current status.
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// The plan, with its wave assigned
    pub plan: Plan,
    pub status: PlanStatus,
}

/// Dependency-ordered wave schedule over a plan set.
#[derive(Debug, Clone)]
pub struct WaveScheduler {
    graph: PlanGraph,
    nodes: Vec<PlanNode>,
    waves: WaveMap,
}

impl WaveScheduler {
    /// Compute the wave map for `plans` without tracking any status.
    pub fn schedule(plans: &[Plan]) -> Result<WaveMap, ScheduleError> {
        Ok(Self::new(plans.to_vec())?.waves)
    }

    /// Build a scheduler with every plan pending.
    pub fn new(plans: Vec<Plan>) -> Result<Self, ScheduleError> {
        let graph = DagBuilder::new(plans).build()?;

        let mut waves = WaveMap::new();
        for (i, plan) in graph.plans().iter().enumerate() {
            waves.entry(graph.wave(i)).or_default().push(plan.id.clone());
        }

        let nodes = graph
            .clone()
            .into_plans()
            .into_iter()
            .map(|plan| PlanNode {
                plan,
                status: PlanStatus::Pending,
            })
            .collect();

        Ok(Self {
            graph,
            nodes,
            waves,
        })
    }

    /// Get the number of plans.
    pub fn plan_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn waves(&self) -> &WaveMap {
        &self.waves
    }

    pub fn total_waves(&self) -> usize {
        self.waves.len()
    }

    pub fn plans_in_wave(&self, wave: usize) -> &[PlanId] {
        self.waves.get(&wave).map_or(&[], |ids| ids.as_slice())
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.node(id).map(|node| &node.plan)
    }

    pub fn status(&self, id: &str) -> Option<&PlanStatus> {
        self.node(id).map(|node| &node.status)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.graph.get_index(id).is_some()
    }

    fn node(&self, id: &str) -> Option<&PlanNode> {
        self.graph.get_index(id).and_then(|i| self.nodes.get(i))
    }

    fn index(&self, id: &str) -> Result<PlanIndex, StateError> {
        self.graph
            .get_index(id)
            .ok_or_else(|| StateError::UnknownPlan(id.to_string()))
    }

    /// Check that a plan's dependencies all completed successfully.
    fn dependencies_completed(&self, index: PlanIndex) -> bool {
        self.graph
            .dependencies(index)
            .iter()
            .all(|&dep| self.nodes[dep].status.is_success())
    }

    /// Pending plans in `wave` whose dependencies have all completed.
    pub fn runnable_in_wave(&self, wave: usize) -> Vec<PlanId> {
        self.plans_in_wave(wave)
            .iter()
            .filter(|id| {
                self.graph.get_index(id).is_some_and(|i| {
                    self.nodes[i].status == PlanStatus::Pending && self.dependencies_completed(i)
                })
            })
            .cloned()
            .collect()
    }

    /// Every plan in `wave` has reached a terminal status.
    pub fn wave_settled(&self, wave: usize) -> bool {
        self.plans_in_wave(wave)
            .iter()
            .all(|id| self.status(id).is_some_and(PlanStatus::is_terminal))
    }

    /// First wave that still has a non-terminal plan.
    pub fn first_unsettled_wave(&self) -> Option<usize> {
        self.waves.keys().copied().find(|&w| !self.wave_settled(w))
    }

    fn transition(
        &mut self,
        id: &str,
        allowed: &[&'static str],
        to: PlanStatus,
    ) -> Result<(), StateError> {
        let index = self.index(id)?;
        let node = &mut self.nodes[index];
        let from = node.status.label();
        if !allowed.contains(&from) {
            return Err(StateError::InvalidTransition {
                plan: id.to_string(),
                from,
                to: to.label(),
            });
        }
        node.status = to;
        Ok(())
    }

    /// Pending → Running.
    pub fn mark_running(&mut self, id: &str) -> Result<(), StateError> {
        self.transition(id, &["pending"], PlanStatus::Running)
    }

    /// Running → Paused.
    pub fn mark_paused(&mut self, id: &str) -> Result<(), StateError> {
        self.transition(id, &["running"], PlanStatus::Paused)
    }

    /// Paused → Running.
    pub fn mark_resumed(&mut self, id: &str) -> Result<(), StateError> {
        self.transition(id, &["paused"], PlanStatus::Running)
    }

    /// Running → Completed.
    pub fn mark_completed(&mut self, id: &str) -> Result<(), StateError> {
        self.transition(id, &["running"], PlanStatus::Completed)
    }

    /// Mark a plan failed and skip everything that transitively depends on it.
    ///
    /// Returns the ids of the plans that were skipped.
    pub fn mark_failed(&mut self, id: &str, error: &str) -> Result<Vec<PlanId>, StateError> {
        self.transition(
            id,
            &["pending", "running", "paused"],
            PlanStatus::Failed {
                error: error.to_string(),
            },
        )?;
        let index = self.index(id)?;
        Ok(self.skip_dependents(index, id))
    }

    fn skip_dependents(&mut self, failed_idx: PlanIndex, failed_id: &str) -> Vec<PlanId> {
        let mut skipped = Vec::new();
        for dep_idx in self.graph.transitive_dependents(failed_idx) {
            let node = &mut self.nodes[dep_idx];
            if node.status == PlanStatus::Pending {
                node.status = PlanStatus::Skipped {
                    failed_dependency: failed_id.to_string(),
                };
                skipped.push(node.plan.id.clone());
            }
        }
        skipped
    }

    /// Skip every pending plan that has a failed or skipped dependency.
    ///
    /// Returns `(skipped, failed_dependency)` pairs, where the failed
    /// dependency is the plan whose failure caused the skip.
    pub fn skip_blocked(&mut self) -> Vec<(PlanId, PlanId)> {
        let mut skipped = Vec::new();
        let mut changed = true;
        while changed {
            changed = false;
            for index in 0..self.nodes.len() {
                if self.nodes[index].status != PlanStatus::Pending {
                    continue;
                }
                let cause = self.graph.dependencies(index).iter().find_map(|&dep| {
                    match &self.nodes[dep].status {
                        PlanStatus::Failed { .. } => Some(self.nodes[dep].plan.id.clone()),
                        PlanStatus::Skipped { failed_dependency } => {
                            Some(failed_dependency.clone())
                        }
                        _ => None,
                    }
                });
                if let Some(failed_dependency) = cause {
                    let id = self.nodes[index].plan.id.clone();
                    self.nodes[index].status = PlanStatus::Skipped {
                        failed_dependency: failed_dependency.clone(),
                    };
                    skipped.push((id, failed_dependency));
                    changed = true;
                }
            }
        }
        skipped
    }

    fn ids_where(&self, pred: impl Fn(&PlanStatus) -> bool) -> BTreeSet<PlanId> {
        self.nodes
            .iter()
            .filter(|n| pred(&n.status))
            .map(|n| n.plan.id.clone())
            .collect()
    }

    pub fn completed(&self) -> BTreeSet<PlanId> {
        self.ids_where(PlanStatus::is_success)
    }

    /// Failed and skipped plans.
    pub fn failed(&self) -> BTreeSet<PlanId> {
        self.ids_where(PlanStatus::is_failure)
    }

    pub fn in_progress(&self) -> BTreeSet<PlanId> {
        self.ids_where(|s| *s == PlanStatus::Running)
    }

    pub fn paused(&self) -> BTreeSet<PlanId> {
        self.ids_where(|s| *s == PlanStatus::Paused)
    }

    /// Check if all plans are terminal.
    pub fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// Check if all plans completed successfully.
    pub fn all_success(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_success())
    }

    /// Merge gap-closure plans into the schedule.
    ///
    /// New ids are added as pending. A plan whose id already exists replaces
    /// the old one and is reset to pending together with everything that
    /// transitively depends on it; all other plans keep their status. Waves
    /// are recomputed over the merged set. Pending plans that still depend
    /// on a failed plan are skipped right away.
    pub fn extend(&mut self, plans: Vec<Plan>) -> Result<ScheduleMerge, ScheduleError> {
        let mut statuses: HashMap<PlanId, PlanStatus> = self
            .nodes
            .iter()
            .map(|n| (n.plan.id.clone(), n.status.clone()))
            .collect();
        let mut merged: Vec<Plan> = self.nodes.iter().map(|n| n.plan.clone()).collect();
        let mut replaced = Vec::new();

        for plan in plans {
            match merged.iter().position(|p| p.id == plan.id) {
                Some(pos) => {
                    replaced.push(plan.id.clone());
                    merged[pos] = plan;
                }
                None => {
                    statuses.insert(plan.id.clone(), PlanStatus::Pending);
                    merged.push(plan);
                }
            }
        }

        let mut rebuilt = Self::new(merged)?;

        for id in &replaced {
            if let Some(index) = rebuilt.graph.get_index(id) {
                statuses.insert(id.clone(), PlanStatus::Pending);
                for dep_idx in rebuilt.graph.transitive_dependents(index) {
                    statuses.insert(rebuilt.nodes[dep_idx].plan.id.clone(), PlanStatus::Pending);
                }
            }
        }
        for node in &mut rebuilt.nodes {
            node.status = statuses.remove(&node.plan.id).unwrap_or_default();
        }
        // A kept plan may only stay terminal if its dependencies still are
        let mut changed = true;
        while changed {
            changed = false;
            for index in 0..rebuilt.nodes.len() {
                let status = &rebuilt.nodes[index].status;
                if status.is_terminal()
                    && !rebuilt.graph.dependencies(index).iter().all(|&d| {
                        rebuilt.nodes[d].status.is_terminal()
                    })
                {
                    rebuilt.nodes[index].status = PlanStatus::Pending;
                    changed = true;
                }
            }
        }

        let skipped = rebuilt.skip_blocked();
        let rerun = rebuilt
            .nodes
            .iter()
            .filter(|n| n.status == PlanStatus::Pending)
            .map(|n| n.plan.id.clone())
            .collect();
        *self = rebuilt;
        Ok(ScheduleMerge { rerun, skipped })
    }
}

/// What changed when gap-closure plans were merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleMerge {
    /// Plans that will (re)run
    pub rerun: Vec<PlanId>,
    /// `(plan, failed_dependency)` for plans skipped by the merge
    pub skipped: Vec<(PlanId, PlanId)>,
}
