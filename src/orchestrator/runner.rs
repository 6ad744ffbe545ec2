//! Phase state machine: research, planning, wave execution, verification.

use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

use super::events::{EventSink, OrchestratorEvent};
use super::execution::{AgentPlanRunner, ExecutionOutcome, PlanRunner, WaveExecutor};
use super::handle::OrchestratorControl;
use super::state::{OrchestratorState, OrchestratorStatus};
use crate::agent::AgentRunner;
use crate::config::WorkflowConfig;
use crate::dag::WaveScheduler;
use crate::errors::OrchestratorError;
use crate::phase::{ArtifactKind, ArtifactStore, Artifacts, PhaseInfo};
use crate::plan::{ExecutionResult, ExecutionStatus};
use crate::planning::{PlanningLoop, PlanningStatus, PriorWork};
use crate::stages::{
    PhaseContext, PlanChecker, Planner, PlanningMode, Researcher, StageSet, VerificationStatus,
    Verifier, VerifierInput,
};

/// Carries one phase from research to a terminal status.
pub struct PhaseOrchestrator {
    config: WorkflowConfig,
    runner: AgentRunner,
    researcher: Researcher,
    planner: Planner,
    checker: PlanChecker,
    verifier: Verifier,
    plan_runner: Arc<dyn PlanRunner>,
    store: Arc<dyn ArtifactStore>,
    events: EventSink,
}

impl PhaseOrchestrator {
    pub fn new(
        config: WorkflowConfig,
        runner: AgentRunner,
        stages: StageSet,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let StageSet {
            researcher,
            planner,
            checker,
            executor,
            verifier,
        } = stages;
        let plan_runner = AgentPlanRunner::new(runner.clone(), executor)
            .with_timeout(config.plan_timeout());
        Self {
            config,
            runner,
            researcher,
            planner,
            checker,
            verifier,
            plan_runner: Arc::new(plan_runner),
            store,
            events: EventSink::disabled(),
        }
    }

    /// Replace how individual plans are executed.
    pub fn with_plan_runner(mut self, plan_runner: Arc<dyn PlanRunner>) -> Self {
        self.plan_runner = plan_runner;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run `phase` to a terminal status and return the final state.
    ///
    /// Never returns an error: fatal failures end in `Failed` with the
    /// error record on the state.
    pub async fn run(&self, phase: PhaseInfo, mut control: OrchestratorControl) -> OrchestratorState {
        let span = info_span!("phase", number = %phase.number, name = %phase.name);
        let mut state = OrchestratorState::new(self.config.clone(), phase);

        let result = self.drive(&mut state, &mut control).instrument(span).await;
        if let Err(err) = result {
            warn!(code = err.code(), error = %err, "Phase failed");
            let from = state.status.clone();
            state.fail(&err);
            self.events.emit(OrchestratorEvent::StatusChanged {
                from,
                to: OrchestratorStatus::Failed,
            });
        }
        control.publish(state.execution.snapshot());
        self.events.emit(OrchestratorEvent::Finished {
            status: state.status.clone(),
            error: state.error.clone(),
        });
        state
    }

    async fn drive(
        &self,
        state: &mut OrchestratorState,
        control: &mut OrchestratorControl,
    ) -> Result<(), OrchestratorError> {
        state.artifacts = Artifacts::load(self.store.as_ref(), &state.phase).map_err(|source| {
            OrchestratorError::Artifact {
                artifact: "phase artifacts".to_string(),
                source,
            }
        })?;

        if self.config.research_enabled {
            self.transition(state, OrchestratorStatus::Researching)?;
            let context = context(state);
            let research = control
                .guard(self.runner.run(&self.researcher, &context))
                .await??;
            if research.blocked {
                let reason = research
                    .blocker_reason
                    .unwrap_or_else(|| "research is blocked".to_string());
                return self.transition(state, OrchestratorStatus::Blocked { reason });
            }
            self.write(state, ArtifactKind::Research, &research.research_content)?;
            state.artifacts.research = Some(research.research_content);
        }

        let mut mode = PlanningMode::Standard;
        loop {
            self.transition(state, OrchestratorStatus::Planning { mode })?;
            state.planning.mode = mode;
            if !self.plan(state, control, mode).await? {
                return Ok(());
            }

            self.transition(state, OrchestratorStatus::Executing)?;
            let executor = WaveExecutor::new(
                state.phase.clone(),
                Arc::clone(&self.plan_runner),
                self.config.concurrency(),
            )
            .with_project_state(state.artifacts.state.clone())
            .with_events(self.events.clone());
            let outcome = executor.execute(&mut state.execution, control).await?;
            self.write_summaries(state)?;
            if let ExecutionOutcome::Blocked { reason } = outcome {
                return self.transition(state, OrchestratorStatus::Blocked { reason });
            }

            if !self.config.verification_enabled {
                return self.transition(state, OrchestratorStatus::Complete);
            }

            self.transition(state, OrchestratorStatus::Verifying)?;
            let input = self.verifier_input(state);
            let verification = control
                .guard(self.runner.run(&self.verifier, &input))
                .await??;
            self.write(
                state,
                ArtifactKind::Verification,
                &verification.verification_content,
            )?;
            state.artifacts.verification = Some(verification.verification_content);

            match verification.status {
                VerificationStatus::Passed => {
                    return self.transition(state, OrchestratorStatus::Complete);
                }
                VerificationStatus::HumanNeeded => {
                    let reason = if verification.human_verification_steps.is_empty() {
                        "human verification needed".to_string()
                    } else {
                        format!(
                            "human verification needed: {}",
                            verification.human_verification_steps.join("; ")
                        )
                    };
                    return self.transition(state, OrchestratorStatus::Blocked { reason });
                }
                VerificationStatus::GapsFound => {
                    if state.planning.gap_closure_attempts >= self.config.max_gap_closure_attempts
                    {
                        return Err(OrchestratorError::GapClosureExhausted {
                            attempts: state.planning.gap_closure_attempts,
                            gaps: verification.gaps,
                        });
                    }
                    state.planning.gap_closure_attempts += 1;
                    info!(
                        attempt = state.planning.gap_closure_attempts,
                        gaps = verification.gaps.len(),
                        "Verification found gaps, replanning"
                    );
                    state.planning.verification_gaps = verification.gaps;
                    mode = PlanningMode::GapClosure;
                }
            }
        }
    }

    /// Run the planning loop and fold accepted plans into the schedule.
    ///
    /// Returns false when the run ended blocked.
    async fn plan(
        &self,
        state: &mut OrchestratorState,
        control: &mut OrchestratorControl,
        mode: PlanningMode,
    ) -> Result<bool, OrchestratorError> {
        let mut planning = PlanningLoop::new(
            &self.runner,
            &self.planner,
            self.config.max_planning_iterations,
        )
        .with_events(self.events.clone());
        if self.config.plan_checker_enabled {
            planning = planning.with_checker(&self.checker);
        }

        let context = context(state);
        let prior = PriorWork {
            plans: state.planning.plans.clone(),
            verification_gaps: state.planning.verification_gaps.clone(),
        };
        let outcome = control
            .guard(planning.plan(mode, &context, &prior))
            .await??;
        state.planning.iteration = outcome.iterations;
        state.planning.issues = outcome.issues;

        if outcome.status == PlanningStatus::Inconclusive {
            let reason = outcome
                .reason
                .unwrap_or_else(|| "planning was inconclusive".to_string());
            self.transition(state, OrchestratorStatus::Blocked { reason })?;
            return Ok(false);
        }

        for plan in &outcome.plans {
            self.write(state, ArtifactKind::Plan(plan.id.clone()), &plan.content)?;
        }
        let execution = &mut state.execution;
        match execution.scheduler.as_mut() {
            Some(scheduler) => {
                let merge = scheduler.extend(outcome.plans)?;
                for id in &merge.rerun {
                    execution.results.remove(id);
                }
                for (id, failed_dependency) in merge.skipped {
                    info!(plan = %id, failed_dependency = %failed_dependency, "Plan skipped");
                    execution.results.insert(
                        id.clone(),
                        ExecutionResult::skipped(&id, &failed_dependency),
                    );
                    self.events.emit(OrchestratorEvent::PlanSkipped {
                        plan_id: id,
                        failed_dependency,
                    });
                }
                info!(plans = merge.rerun.len(), "Gap closure plans scheduled");
            }
            None => execution.scheduler = Some(WaveScheduler::new(outcome.plans)?),
        }

        if let Some(scheduler) = &execution.scheduler {
            execution.current_wave = scheduler.first_unsettled_wave().unwrap_or(0);
            state.planning.plans = scheduler.nodes().iter().map(|n| n.plan.clone()).collect();
            self.events.emit(OrchestratorEvent::WavesComputed {
                waves: scheduler.waves().clone(),
            });
        }
        Ok(true)
    }

    fn verifier_input(&self, state: &OrchestratorState) -> VerifierInput {
        let must_haves = state
            .planning
            .plans
            .iter()
            .flat_map(|p| p.must_haves.iter().cloned())
            .collect();
        let summaries = state
            .execution
            .results
            .values()
            .filter(|r| r.status == ExecutionStatus::Complete)
            .map(|r| (r.plan_id.clone(), r.summary.clone()))
            .collect();
        let failed_plans = state
            .execution
            .scheduler
            .as_ref()
            .map(|s| s.failed().into_iter().collect())
            .unwrap_or_default();
        VerifierInput {
            context: context(state),
            must_haves,
            summaries,
            failed_plans,
        }
    }

    fn write_summaries(&self, state: &OrchestratorState) -> Result<(), OrchestratorError> {
        for result in state.execution.results.values() {
            if result.status == ExecutionStatus::Complete && !result.summary.is_empty() {
                self.write(state, ArtifactKind::Summary(result.plan_id.clone()), &result.summary)?;
            }
        }
        Ok(())
    }

    fn write(
        &self,
        state: &OrchestratorState,
        kind: ArtifactKind,
        content: &str,
    ) -> Result<(), OrchestratorError> {
        self.store
            .write(&state.phase, &kind, content)
            .map_err(|source| OrchestratorError::Artifact {
                artifact: kind.to_string(),
                source,
            })
    }

    fn transition(
        &self,
        state: &mut OrchestratorState,
        next: OrchestratorStatus,
    ) -> Result<(), OrchestratorError> {
        let from = state.status.clone();
        state.transition(next)?;
        self.events.emit(OrchestratorEvent::StatusChanged {
            from,
            to: state.status.clone(),
        });
        Ok(())
    }
}

fn context(state: &OrchestratorState) -> PhaseContext {
    PhaseContext::new(state.phase.clone(), state.artifacts.clone())
}
