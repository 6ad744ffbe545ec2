//! Wave execution coordinator.
//!
//! One task per plan runs the executor stage. Tasks never touch the
//! execution state: each reports its outcome over a channel, and the
//! coordinator applies outcomes and commands one at a time. That keeps
//! the completed/failed/in-progress/paused partition consistent, and every
//! snapshot published after an update sees it whole.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use super::events::{EventSink, OrchestratorEvent};
use super::handle::{OrchestratorCommand, OrchestratorControl};
use super::state::ExecutionState;
use crate::agent::AgentRunner;
use crate::agent::runner::panic_message;
use crate::checkpoint::ResumeTicket;
use crate::dag::WaveScheduler;
use crate::errors::{AgentError, OrchestratorError};
use crate::phase::PhaseInfo;
use crate::plan::{ExecutionResult, ExecutionStatus, PlanId};
use crate::stages::{Executor, ExecutorInput, ResumeContext};

/// Runs a single plan to an outcome.
///
/// Real implementation: `AgentPlanRunner`. Tests substitute scripted runners.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn run_plan(&self, input: ExecutorInput) -> Result<ExecutionResult, AgentError>;
}

/// Runs plans through the executor stage.
pub struct AgentPlanRunner {
    runner: AgentRunner,
    executor: Executor,
    timeout: Option<Duration>,
}

impl AgentPlanRunner {
    pub fn new(runner: AgentRunner, executor: Executor) -> Self {
        Self {
            runner,
            executor,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PlanRunner for AgentPlanRunner {
    async fn run_plan(&self, input: ExecutorInput) -> Result<ExecutionResult, AgentError> {
        let run = self.runner.run(&self.executor, &input);
        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, run)
                .await
                .map_err(|_| AgentError::Timeout {
                    stage: crate::agent::StageKind::Executor,
                    after,
                })??,
            None => run.await?,
        };
        Ok(output.into_result(&input.plan.id))
    }
}

/// How wave execution ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every plan reached a terminal status.
    Settled,
    /// Checkpoints are open and nobody can resolve them.
    Blocked { reason: String },
}

struct PlanMessage {
    plan_id: PlanId,
    outcome: Result<ExecutionResult, AgentError>,
}

/// A plan waiting for a free execution slot.
enum Launch {
    Fresh(PlanId),
    Resume(ResumeTicket),
}

pub struct WaveExecutor {
    phase: PhaseInfo,
    project_state: Option<String>,
    runner: Arc<dyn PlanRunner>,
    concurrency: usize,
    events: EventSink,
}

impl WaveExecutor {
    pub fn new(phase: PhaseInfo, runner: Arc<dyn PlanRunner>, concurrency: usize) -> Self {
        Self {
            phase,
            project_state: None,
            runner,
            concurrency: concurrency.max(1),
            events: EventSink::disabled(),
        }
    }

    pub fn with_project_state(mut self, state: Option<String>) -> Self {
        self.project_state = state;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run every pending plan of `state.scheduler` wave by wave.
    ///
    /// Only the lowest unsettled wave launches plans, at most
    /// `concurrency` at a time. A paused plan holds its wave open while
    /// its siblings finish. Provider transport failures and cancellation
    /// abort all outstanding tasks and return an error; every other plan
    /// failure, provider timeouts included, is recorded and skips the
    /// plan's dependents.
    pub async fn execute(
        &self,
        state: &mut ExecutionState,
        control: &mut OrchestratorControl,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let mut run = Coordinator {
            executor: self,
            tasks: JoinSet::new(),
            queue: VecDeque::new(),
            running: 0,
            started_waves: BTreeSet::new(),
            announced_wait: false,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<PlanMessage>();
        let result = run.drive(state, control, &tx, &mut rx).await;
        if result.is_err() {
            run.tasks.abort_all();
        }
        result
    }
}

struct Coordinator<'a> {
    executor: &'a WaveExecutor,
    tasks: JoinSet<()>,
    queue: VecDeque<Launch>,
    running: usize,
    started_waves: BTreeSet<usize>,
    announced_wait: bool,
}

impl Coordinator<'_> {
    async fn drive(
        &mut self,
        state: &mut ExecutionState,
        control: &mut OrchestratorControl,
        tx: &mpsc::UnboundedSender<PlanMessage>,
        rx: &mut mpsc::UnboundedReceiver<PlanMessage>,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        loop {
            for (id, failed_dependency) in scheduler_mut(state)?.skip_blocked() {
                self.record_skip(state, id, &failed_dependency);
            }
            let sched = scheduler(state)?;
            self.finish_settled_waves(sched);

            let Some(wave) = sched.first_unsettled_wave() else {
                info!(plans = sched.plan_count(), "All waves settled");
                state.current_wave = state.total_waves();
                control.publish(state.snapshot());
                return Ok(ExecutionOutcome::Settled);
            };
            let plans = sched.plans_in_wave(wave).to_vec();
            let runnable = sched.runnable_in_wave(wave);
            state.current_wave = wave;

            if self.started_waves.insert(wave) {
                info!(wave, plans = plans.len(), "Wave starting");
                self.executor
                    .events
                    .emit(OrchestratorEvent::WaveStarted { wave, plans });
            }

            for id in runnable {
                if !self.queue.iter().any(|l| matches!(l, Launch::Fresh(q) if *q == id)) {
                    self.queue.push_back(Launch::Fresh(id));
                }
            }
            self.launch(state, tx)?;
            control.publish(state.snapshot());

            if self.running == 0 {
                if state.checkpoints.is_empty() {
                    // Pending plans here are neither runnable nor skipped
                    let sched = scheduler(state)?;
                    let stuck: Vec<String> = sched
                        .plans_in_wave(wave)
                        .iter()
                        .filter(|id| !sched.status(id).is_some_and(|s| s.is_terminal()))
                        .cloned()
                        .collect();
                    return Ok(ExecutionOutcome::Blocked {
                        reason: format!("no runnable plans in wave {}: {}", wave, stuck.join(", ")),
                    });
                }
                if !control.is_open() {
                    return Ok(ExecutionOutcome::Blocked {
                        reason: awaiting_reason(state),
                    });
                }
                if !self.announced_wait {
                    self.announced_wait = true;
                    let checkpoints = state.checkpoints.awaiting().into_iter().cloned().collect();
                    self.executor
                        .events
                        .emit(OrchestratorEvent::AwaitingHuman { checkpoints });
                }
            }

            tokio::select! {
                Some(message) = rx.recv() => {
                    self.reap();
                    self.apply(state, message)?;
                }
                command = control.recv(), if control.is_open() => match command {
                    Some(OrchestratorCommand::Resume { plan_id, resolution }) => {
                        let sched = state.scheduler.as_mut().ok_or(NOT_SCHEDULED)?;
                        match state.checkpoints.resume(sched, &plan_id, resolution) {
                            Ok(ticket) => {
                                self.announced_wait = false;
                                self.queue.push_front(Launch::Resume(ticket));
                            }
                            Err(e) => warn!(plan = %plan_id, error = %e, "Ignoring resume"),
                        }
                    }
                    Some(OrchestratorCommand::Cancel) => {
                        info!("Execution cancelled");
                        return Err(OrchestratorError::Cancelled);
                    }
                    None => debug!("Command channel closed"),
                },
            }
            control.publish(state.snapshot());
        }
    }

    /// Start queued plans while slots are free.
    fn launch(
        &mut self,
        state: &mut ExecutionState,
        tx: &mpsc::UnboundedSender<PlanMessage>,
    ) -> Result<(), OrchestratorError> {
        while self.running < self.executor.concurrency {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            let sched = scheduler_mut(state)?;
            let (input, resumed) = match next {
                Launch::Fresh(id) => {
                    sched.mark_running(&id)?;
                    let Some(plan) = sched.plan(&id).cloned() else {
                        continue;
                    };
                    (self.input_for(plan), false)
                }
                // Already moved back to running by the checkpoint manager
                Launch::Resume(ticket) => {
                    let Some(plan) = sched.plan(&ticket.plan_id).cloned() else {
                        continue;
                    };
                    let input = self.input_for(plan).resuming(ResumeContext {
                        checkpoint: ticket.checkpoint,
                        resolution: ticket.resolution,
                    });
                    (input, true)
                }
            };

            let plan_id = input.plan.id.clone();
            let wave = input.plan.wave.unwrap_or(state.current_wave);
            info!(plan = %plan_id, wave, resumed, "Plan starting");
            self.executor.events.emit(OrchestratorEvent::PlanStarted {
                plan_id: plan_id.clone(),
                wave,
                resumed,
            });
            self.spawn(input, tx.clone());
            self.running += 1;
        }
        Ok(())
    }

    fn input_for(&self, plan: crate::plan::Plan) -> ExecutorInput {
        ExecutorInput::new(
            self.executor.phase.clone(),
            plan,
            self.executor.project_state.clone(),
        )
    }

    fn spawn(&mut self, input: ExecutorInput, tx: mpsc::UnboundedSender<PlanMessage>) {
        let runner = Arc::clone(&self.executor.runner);
        let plan_id = input.plan.id.clone();
        let span = info_span!("plan", plan = %plan_id);
        self.tasks.spawn(
            async move {
                let outcome = match AssertUnwindSafe(runner.run_plan(input))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => Ok(ExecutionResult::failed(
                        &plan_id,
                        format!("executor panicked: {}", panic_message(panic.as_ref())),
                    )),
                };
                let _ = tx.send(PlanMessage { plan_id, outcome });
            }
            .instrument(span),
        );
    }

    /// Drop finished task handles.
    fn reap(&mut self) {
        while self.tasks.try_join_next().is_some() {}
    }

    fn apply(
        &mut self,
        state: &mut ExecutionState,
        message: PlanMessage,
    ) -> Result<(), OrchestratorError> {
        self.running = self.running.saturating_sub(1);
        let PlanMessage { plan_id, outcome } = message;

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_transport() => {
                warn!(plan = %plan_id, error = %e, "Provider failure aborts the run");
                return Err(e.into());
            }
            Err(e) => ExecutionResult::failed(&plan_id, e.to_string()),
        };

        match result.status {
            ExecutionStatus::Complete => {
                scheduler_mut(state)?.mark_completed(&plan_id)?;
                info!(plan = %plan_id, commits = result.commits.len(), "Plan completed");
                state.deviations.extend(
                    result
                        .deviations
                        .iter()
                        .map(|d| format!("{}: {}", plan_id, d)),
                );
                self.executor.events.emit(OrchestratorEvent::PlanCompleted {
                    plan_id: plan_id.clone(),
                    summary: result.summary.clone(),
                });
                state.results.insert(plan_id, result);
            }
            ExecutionStatus::Paused => match result.checkpoint.clone() {
                Some(checkpoint) => {
                    let sched = state.scheduler.as_mut().ok_or(NOT_SCHEDULED)?;
                    state.checkpoints.pause(sched, checkpoint.clone())?;
                    self.executor
                        .events
                        .emit(OrchestratorEvent::PlanPaused { checkpoint });
                    state.results.insert(plan_id, result);
                }
                None => {
                    let failed =
                        ExecutionResult::failed(&plan_id, "executor paused without a checkpoint");
                    self.fail(state, failed)?;
                }
            },
            ExecutionStatus::Failed => self.fail(state, result)?,
        }
        Ok(())
    }

    fn fail(
        &mut self,
        state: &mut ExecutionState,
        result: ExecutionResult,
    ) -> Result<(), OrchestratorError> {
        let plan_id = result.plan_id.clone();
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| "executor reported failure".to_string());
        warn!(plan = %plan_id, %error, "Plan failed");

        let skipped = scheduler_mut(state)?.mark_failed(&plan_id, &error)?;
        state.checkpoints.discard(&plan_id);
        self.executor.events.emit(OrchestratorEvent::PlanFailed {
            plan_id: plan_id.clone(),
            error,
        });
        state.results.insert(plan_id.clone(), result);

        for id in skipped {
            self.record_skip(state, id, &plan_id);
        }
        Ok(())
    }

    fn record_skip(&mut self, state: &mut ExecutionState, id: PlanId, failed_dependency: &str) {
        info!(plan = %id, failed_dependency, "Plan skipped");
        self.queue
            .retain(|l| !matches!(l, Launch::Fresh(q) if *q == id));
        self.executor.events.emit(OrchestratorEvent::PlanSkipped {
            plan_id: id.clone(),
            failed_dependency: failed_dependency.to_string(),
        });
        state
            .results
            .insert(id.clone(), ExecutionResult::skipped(&id, failed_dependency));
    }

    fn finish_settled_waves(&mut self, sched: &WaveScheduler) {
        let settled: Vec<usize> = self
            .started_waves
            .iter()
            .copied()
            .filter(|&w| sched.wave_settled(w))
            .collect();
        for wave in settled {
            self.started_waves.remove(&wave);
            let ids = sched.plans_in_wave(wave);
            let completed = ids
                .iter()
                .filter(|id| sched.status(id).is_some_and(|s| s.is_success()))
                .count();
            info!(wave, completed, failed = ids.len() - completed, "Wave completed");
            self.executor.events.emit(OrchestratorEvent::WaveCompleted {
                wave,
                completed,
                failed: ids.len() - completed,
            });
        }
    }
}

/// Execution was started before any plans were scheduled.
const NOT_SCHEDULED: OrchestratorError = OrchestratorError::InvalidTransition {
    from: "idle",
    to: "executing",
};

fn scheduler(state: &ExecutionState) -> Result<&WaveScheduler, OrchestratorError> {
    state.scheduler.as_ref().ok_or(NOT_SCHEDULED)
}

fn scheduler_mut(state: &mut ExecutionState) -> Result<&mut WaveScheduler, OrchestratorError> {
    state.scheduler.as_mut().ok_or(NOT_SCHEDULED)
}

fn awaiting_reason(state: &ExecutionState) -> String {
    let waiting: Vec<String> = state
        .checkpoints
        .awaiting()
        .iter()
        .map(|c| format!("{} ({}: {})", c.plan_id, c.kind, c.description))
        .collect();
    format!("awaiting human input on {}", waiting.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::orchestrator::OrchestratorHandle;
    use crate::plan::{Checkpoint, CheckpointKind, Plan, Resolution};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the scripted runner does for a plan.
    #[derive(Clone)]
    enum Script {
        Complete,
        Fail,
        /// Pause the first time, complete once resumed
        Checkpoint,
        AgentError,
        Transport,
        ProviderTimeout,
        Panic,
        /// Wait this long, then complete
        Slow(Duration),
    }

    #[derive(Default)]
    struct ScriptedRunner {
        scripts: HashMap<PlanId, Script>,
        invoked: Mutex<Vec<(PlanId, bool)>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedRunner {
        fn with(mut self, id: &str, script: Script) -> Self {
            self.scripts.insert(id.to_string(), script);
            self
        }

        fn invoked(&self) -> Vec<(PlanId, bool)> {
            self.invoked.lock().unwrap().clone()
        }

        fn ran(&self, id: &str) -> bool {
            self.invoked().iter().any(|(p, _)| p == id)
        }
    }

    #[async_trait]
    impl PlanRunner for ScriptedRunner {
        async fn run_plan(&self, input: ExecutorInput) -> Result<ExecutionResult, AgentError> {
            let id = input.plan.id.clone();
            self.invoked
                .lock()
                .unwrap()
                .push((id.clone(), input.resume.is_some()));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let script = self.scripts.get(&id).cloned().unwrap_or(Script::Complete);
            let result = match script {
                Script::Complete => Ok(ExecutionResult::complete(&id, format!("{} done", id))),
                Script::Fail => Ok(ExecutionResult::failed(&id, "tests failed")),
                Script::Checkpoint => match input.resume {
                    Some(resume) => Ok(ExecutionResult::complete(
                        &id,
                        format!("resumed with {}", resume.resolution.note),
                    )),
                    None => Ok(ExecutionResult::paused(&id, checkpoint(&id))),
                },
                Script::AgentError => Err(AgentError::NoFinalOutput {
                    stage: crate::agent::StageKind::Executor,
                }),
                Script::Transport => Err(ProviderError::Transport("connection reset".into()).into()),
                Script::ProviderTimeout => {
                    Err(ProviderError::Timeout("operation timed out".into()).into())
                }
                Script::Panic => panic!("executor exploded"),
                Script::Slow(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ExecutionResult::complete(&id, "slow"))
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn checkpoint(id: &str) -> Checkpoint {
        Checkpoint {
            plan_id: id.to_string(),
            task_number: 2,
            kind: CheckpointKind::HumanVerify,
            description: "Check the login page".to_string(),
            awaiting: "approval".to_string(),
            options: vec![],
        }
    }

    fn plan(id: &str, deps: &[&str]) -> Plan {
        Plan::new(id, deps.iter().map(|d| d.to_string()).collect())
    }

    fn state(plans: Vec<Plan>) -> ExecutionState {
        ExecutionState {
            scheduler: Some(WaveScheduler::new(plans).unwrap()),
            ..Default::default()
        }
    }

    fn executor(runner: &Arc<ScriptedRunner>, concurrency: usize) -> WaveExecutor {
        WaveExecutor::new(
            crate::phase::PhaseInfo::new("01", "Setup", "goal"),
            runner.clone(),
            concurrency,
        )
    }

    fn abc() -> Vec<Plan> {
        vec![plan("A", &[]), plan("B", &[]), plan("C", &["A", "B"])]
    }

    #[tokio::test]
    async fn test_all_plans_complete_in_wave_order() {
        let runner = Arc::new(ScriptedRunner::default());
        let (events, mut rx) = EventSink::channel();
        let mut state = state(abc());

        let outcome = executor(&runner, 4)
            .with_events(events)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Settled);
        let sched = state.scheduler.as_ref().unwrap();
        assert!(sched.all_success());
        assert_eq!(state.results.len(), 3);
        assert_eq!(state.current_wave, 2);
        assert!(state.invariant_violations().is_empty());

        let invoked = runner.invoked();
        assert_eq!(invoked.last().unwrap().0, "C");

        let waves: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                OrchestratorEvent::WaveCompleted { wave, .. } => Some(wave),
                _ => None,
            })
            .collect();
        assert_eq!(waves, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_siblings() {
        let runner = Arc::new(ScriptedRunner::default().with("A", Script::Fail));
        let mut state = state(abc());

        let outcome = executor(&runner, 4)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Settled);
        assert!(!runner.ran("C"));
        let sched = state.scheduler.as_ref().unwrap();
        assert!(sched.completed().contains("B"));
        assert!(sched.failed().contains("A"));
        assert!(sched.failed().contains("C"));
        assert_eq!(
            state.results["C"].error.as_deref(),
            Some("skipped: dependency A failed")
        );
    }

    #[tokio::test]
    async fn test_agent_error_is_a_plan_failure() {
        let runner = Arc::new(ScriptedRunner::default().with("B", Script::AgentError));
        let mut state = state(abc());

        let outcome = executor(&runner, 4)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Settled);
        let sched = state.scheduler.as_ref().unwrap();
        assert!(sched.completed().contains("A"));
        assert!(sched.failed().contains("C"));
        assert!(state.results["B"].error.as_deref().unwrap().contains("final text"));
    }

    #[tokio::test]
    async fn test_panicking_executor_is_a_plan_failure() {
        let runner = Arc::new(ScriptedRunner::default().with("A", Script::Panic));
        let mut state = state(vec![plan("A", &[]), plan("B", &[])]);

        executor(&runner, 2)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert!(state.results["A"].error.as_deref().unwrap().contains("exploded"));
        assert!(state.results["B"].is_success());
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .with("A", Script::Transport)
                .with("B", Script::Slow(Duration::from_secs(30))),
        );
        let mut state = state(abc());

        let err = executor(&runner, 4)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PROVIDER_FAILURE");
        assert!(!runner.ran("C"));
    }

    #[tokio::test]
    async fn test_provider_timeout_fails_only_that_plan() {
        let runner = Arc::new(ScriptedRunner::default().with("A", Script::ProviderTimeout));
        let mut state = state(abc());

        // Sequential, so B starts only after A's timeout is applied
        let outcome = executor(&runner, 1)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Settled);
        assert!(runner.ran("B"));
        assert!(!runner.ran("C"));
        let sched = state.scheduler.as_ref().unwrap();
        assert!(sched.completed().contains("B"));
        assert!(sched.failed().contains("A"));
        assert!(state.results["A"].error.as_deref().unwrap().contains("timed out"));
        assert!(state.invariant_violations().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_mode_runs_one_plan_at_a_time() {
        let runner = Arc::new(ScriptedRunner::default());
        let mut state = state(vec![
            plan("A", &[]),
            plan("B", &[]),
            plan("C", &[]),
            plan("D", &[]),
        ]);

        executor(&runner, 1)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
        let order: Vec<PlanId> = runner.invoked().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let runner = Arc::new(ScriptedRunner::default());
        let plans = (0..6).map(|i| plan(&format!("P{}", i), &[])).collect();
        let mut state = state(plans);

        executor(&runner, 2)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert!(state.scheduler.as_ref().unwrap().all_success());
    }

    #[tokio::test]
    async fn test_checkpoint_pauses_and_resumes() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .with("A", Script::Checkpoint)
                .with("B", Script::Complete),
        );
        let (events, mut rx) = EventSink::channel();
        let (handle, mut control) = OrchestratorHandle::new();
        let mut state = state(abc());
        let wave_executor = executor(&runner, 4).with_events(events);

        let resolver = async {
            loop {
                match rx.recv().await {
                    Some(OrchestratorEvent::AwaitingHuman { checkpoints }) => {
                        assert_eq!(checkpoints.len(), 1);
                        assert_eq!(checkpoints[0].plan_id, "A");

                        // Sibling finished, wave held open, dependent not started
                        let snapshot = handle.snapshot();
                        assert!(snapshot.paused.contains("A"));
                        assert!(snapshot.completed.contains("B"));
                        assert_eq!(snapshot.current_wave, 0);
                        assert!(!snapshot.in_progress.contains("C"));

                        handle.resume("A", Resolution::note("looks good")).unwrap();
                        break;
                    }
                    Some(_) => continue,
                    None => panic!("events closed before checkpoint"),
                }
            }
        };
        let (outcome, ()) = tokio::join!(wave_executor.execute(&mut state, &mut control), resolver);

        assert_eq!(outcome.unwrap(), ExecutionOutcome::Settled);
        assert!(state.scheduler.as_ref().unwrap().all_success());
        assert!(state.checkpoints.is_empty());
        assert_eq!(state.results["A"].summary, "resumed with looks good");
        let a_runs: Vec<bool> = runner
            .invoked()
            .into_iter()
            .filter(|(id, _)| id == "A")
            .map(|(_, resumed)| resumed)
            .collect();
        assert_eq!(a_runs, vec![false, true]);
        assert!(runner.ran("C"));
    }

    #[tokio::test]
    async fn test_checkpoint_without_resolver_blocks() {
        let runner = Arc::new(ScriptedRunner::default().with("B", Script::Checkpoint));
        let mut state = state(abc());

        let outcome = executor(&runner, 4)
            .execute(&mut state, &mut OrchestratorControl::detached())
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Blocked { reason } => {
                assert!(reason.contains("B (human-verify: Check the login page)"))
            }
            other => panic!("expected blocked, got {:?}", other),
        }
        assert!(state.checkpoints.is_paused("B"));
        assert!(state.scheduler.as_ref().unwrap().completed().contains("A"));
        assert!(!runner.ran("C"));
        assert!(state.invariant_violations().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_aborts_outstanding_plans() {
        let runner = Arc::new(
            ScriptedRunner::default().with("A", Script::Slow(Duration::from_secs(30))),
        );
        let (handle, mut control) = OrchestratorHandle::new();
        let mut state = state(vec![plan("A", &[])]);
        handle.cancel().unwrap();

        let err = executor(&runner, 1)
            .execute(&mut state, &mut control)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_resume_for_unknown_plan_is_ignored() {
        let runner = Arc::new(ScriptedRunner::default());
        let (handle, mut control) = OrchestratorHandle::new();
        let mut state = state(vec![plan("A", &[])]);
        handle.resume("Z", Resolution::note("?")).unwrap();

        let outcome = executor(&runner, 1)
            .execute(&mut state, &mut control)
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Settled);
        drop(handle);
    }
}
