//! Bounded planner/checker iteration.
//!
//! Each round asks the planner for a plan set and, when checking is on,
//! has the checker review it. The first set without blocking issues is
//! accepted. Rejected sets go back to the planner together with the
//! checker's issues, so every round after the first is a revision. When
//! the budget runs out the result is `Inconclusive`, which the caller
//! escalates to a human rather than treating as a crash.

use tracing::{info, warn};

use crate::agent::AgentRunner;
use crate::errors::AgentError;
use crate::orchestrator::{EventSink, OrchestratorEvent};
use crate::plan::{Plan, PlanIssue};
use crate::stages::{
    CheckerInput, PhaseContext, PlanChecker, Planner, PlannerInput, PlannerStatus, PlanningMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStatus {
    Complete,
    Inconclusive,
}

#[derive(Debug, Clone)]
pub struct PlanningOutcome {
    pub status: PlanningStatus,
    /// Accepted plans, or the last rejected candidate when inconclusive
    pub plans: Vec<Plan>,
    /// Issues from the last checker pass
    pub issues: Vec<PlanIssue>,
    pub iterations: u32,
    pub reason: Option<String>,
}

/// Work already on the table when planning starts.
#[derive(Debug, Clone, Default)]
pub struct PriorWork {
    /// Plans already executed in this phase
    pub plans: Vec<Plan>,
    /// Gaps reported by the verifier
    pub verification_gaps: Vec<String>,
}

pub struct PlanningLoop<'a> {
    runner: &'a AgentRunner,
    planner: &'a Planner,
    checker: Option<&'a PlanChecker>,
    max_iterations: u32,
    events: EventSink,
}

impl<'a> PlanningLoop<'a> {
    pub fn new(runner: &'a AgentRunner, planner: &'a Planner, max_iterations: u32) -> Self {
        Self {
            runner,
            planner,
            checker: None,
            max_iterations,
            events: EventSink::disabled(),
        }
    }

    /// Review every candidate with `checker`. Without one the first plan
    /// set is accepted as is.
    pub fn with_checker(mut self, checker: &'a PlanChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub async fn plan(
        &self,
        mode: PlanningMode,
        context: &PhaseContext,
        prior: &PriorWork,
    ) -> Result<PlanningOutcome, AgentError> {
        let mut candidate: Vec<Plan> = Vec::new();
        let mut issues: Vec<PlanIssue> = Vec::new();
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            let round_mode = if iterations == 1 {
                mode
            } else {
                PlanningMode::Revision
            };

            let input = PlannerInput {
                mode: round_mode,
                context: context.clone(),
                verification_gaps: prior.verification_gaps.clone(),
                existing_plans: if round_mode == PlanningMode::Revision {
                    candidate.clone()
                } else {
                    prior.plans.clone()
                },
                checker_issues: issues.clone(),
            };
            let output = self.runner.run(self.planner, &input).await?;

            if output.status == PlannerStatus::Inconclusive {
                let reason = output
                    .reason
                    .unwrap_or_else(|| "planner could not produce plans".to_string());
                warn!(iteration = iterations, %reason, "Planner is inconclusive");
                return Ok(PlanningOutcome {
                    status: PlanningStatus::Inconclusive,
                    plans: candidate,
                    issues,
                    iterations,
                    reason: Some(reason),
                });
            }
            candidate = output.plans;

            issues = match self.checker {
                Some(checker) => {
                    let review = CheckerInput {
                        context: context.clone(),
                        plans: candidate.clone(),
                    };
                    self.runner.run(checker, &review).await?.issues
                }
                None => Vec::new(),
            };
            let blockers = issues.iter().filter(|i| i.is_blocking()).count();

            self.events.emit(OrchestratorEvent::PlanningIteration {
                mode: round_mode,
                iteration: iterations,
                max_iterations: self.max_iterations,
                plans: candidate.len(),
                blockers,
            });

            if blockers == 0 {
                info!(iteration = iterations, plans = candidate.len(), "Plans accepted");
                return Ok(PlanningOutcome {
                    status: PlanningStatus::Complete,
                    plans: candidate,
                    issues,
                    iterations,
                    reason: None,
                });
            }
            info!(iteration = iterations, blockers, "Plans rejected by checker");
        }

        let blocking: Vec<String> = issues
            .iter()
            .filter(|i| i.is_blocking())
            .map(|i| format!("{}: {}", i.plan_id, i.description))
            .collect();
        Ok(PlanningOutcome {
            status: PlanningStatus::Inconclusive,
            plans: candidate,
            issues,
            iterations,
            reason: Some(format!(
                "plans still have blocking issues after {} iterations: {}",
                iterations,
                blocking.join("; ")
            )),
        })
    }
}
