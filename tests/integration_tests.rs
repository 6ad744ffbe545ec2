//! Integration tests for gsd
//!
//! End-to-end phase runs through the public API with a scripted model
//! provider, plus CLI smoke tests.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use gsd::agent::{
    AgentRunner, ContentBlock, ModelProvider, ProviderRequest, ProviderResponse, ToolRegistry,
};
use gsd::config::{StageModels, WorkflowConfig};
use gsd::errors::ProviderError;
use gsd::orchestrator::{
    EventSink, OrchestratorControl, OrchestratorEvent, OrchestratorHandle, OrchestratorState,
    OrchestratorStatus, PhaseOrchestrator,
};
use gsd::phase::{ArtifactKind, ArtifactStore, FsArtifactStore, MemoryArtifactStore, PhaseInfo};
use gsd::plan::Resolution;
use gsd::stages::StageSet;

/// Helper to create a gsd Command
fn gsd() -> Command {
    cargo_bin_cmd!("gsd")
}

// =============================================================================
// Scripted provider
// =============================================================================

const RESEARCHER: &str = "test-researcher";
const PLANNER: &str = "test-planner";
const CHECKER: &str = "test-checker";
const EXECUTOR: &str = "test-executor";
const VERIFIER: &str = "test-verifier";

fn models() -> StageModels {
    StageModels {
        researcher: RESEARCHER.into(),
        planner: PLANNER.into(),
        plan_checker: CHECKER.into(),
        executor: EXECUTOR.into(),
        verifier: VERIFIER.into(),
    }
}

/// One executor invocation as seen by the provider.
#[derive(Debug, Clone)]
struct ExecutorCall {
    plan_id: String,
    /// 1-based count of calls for this plan so far
    attempt: u32,
    prompt: String,
}

impl ExecutorCall {
    fn resumed(&self) -> bool {
        self.prompt.contains("Resuming after checkpoint")
    }
}

type ExecutorScript = dyn Fn(&ExecutorCall) -> Value + Send + Sync;

/// Routes each request by model id: non-executor stages replay queued
/// answers, executor calls are answered by a closure keyed on the plan.
struct RouterProvider {
    queues: Mutex<HashMap<String, VecDeque<Value>>>,
    executor: Box<ExecutorScript>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RouterProvider {
    fn new(executor: impl Fn(&ExecutorCall) -> Value + Send + Sync + 'static) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            executor: Box::new(executor),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(self, model: &str, answers: Vec<Value>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .insert(model.to_string(), answers.into());
        self
    }

    fn prompts_for(&self, model: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    /// Plan ids in the order their executor calls were made.
    fn executed(&self) -> Vec<String> {
        self.prompts_for(EXECUTOR)
            .iter()
            .filter_map(|prompt| plan_id_of(prompt))
            .collect()
    }
}

fn plan_id_of(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("## Plan "))
        .map(|id| id.trim().to_string())
}

fn first_user_text(request: &ProviderRequest<'_>) -> String {
    request
        .messages
        .first()
        .and_then(|message| {
            message.content.iter().find_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
        })
        .unwrap_or_default()
}

fn answer(value: Value) -> ProviderResponse {
    ProviderResponse::new(vec![ContentBlock::text(format!(
        "Done.\n\n```json\n{}\n```",
        value
    ))])
}

#[async_trait]
impl ModelProvider for RouterProvider {
    async fn send(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let prompt = first_user_text(&request);
        self.calls
            .lock()
            .unwrap()
            .push((request.model.to_string(), prompt.clone()));

        if request.model == EXECUTOR {
            let plan_id = plan_id_of(&prompt)
                .ok_or_else(|| ProviderError::Transport("executor prompt without plan".into()))?;
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(plan_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let call = ExecutorCall {
                plan_id,
                attempt,
                prompt,
            };
            return Ok(answer((self.executor)(&call)));
        }

        self.queues
            .lock()
            .unwrap()
            .get_mut(request.model)
            .and_then(VecDeque::pop_front)
            .map(answer)
            .ok_or_else(|| ProviderError::Transport(format!("no answer left for {}", request.model)))
    }
}

/// Always asks for another tool call.
#[derive(Default)]
struct LoopingProvider {
    calls: Mutex<u32>,
}

#[async_trait]
impl ModelProvider for LoopingProvider {
    async fn send(&self, _request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        Ok(ProviderResponse::new(vec![ContentBlock::tool_use(
            &format!("call-{}", call),
            "lookup",
            json!({}),
        )]))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn phase() -> PhaseInfo {
    PhaseInfo::new("01", "Setup", "Scaffold the service")
}

fn plans(ids: &[(&str, &[&str])]) -> Value {
    let plans: Vec<_> = ids
        .iter()
        .map(|(id, deps)| json!({ "id": id, "content": format!("Build {}", id), "depends_on": deps }))
        .collect();
    json!({ "status": "complete", "plans": plans })
}

fn checker_passed() -> Value {
    json!({ "status": "passed", "issues": [] })
}

fn research() -> Value {
    json!({ "research_content": "# Research\nUse axum" })
}

fn verified() -> Value {
    json!({ "status": "passed", "verification_content": "# Verification\nAll good" })
}

fn complete(call: &ExecutorCall) -> Value {
    json!({ "status": "complete", "summary": format!("Built {}", call.plan_id) })
}

fn orchestrator(
    config: WorkflowConfig,
    provider: Arc<RouterProvider>,
    store: Arc<dyn ArtifactStore>,
) -> PhaseOrchestrator {
    let runner = AgentRunner::new(provider, Arc::new(ToolRegistry::new()));
    PhaseOrchestrator::new(config, runner, StageSet::from_models(&models()), store)
}

fn status_names(events: &[OrchestratorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            OrchestratorEvent::StatusChanged { to, .. } => Some(to.name().to_string()),
            _ => None,
        })
        .collect()
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Phase runs
// =============================================================================

mod phase_runs {
    use super::*;

    /// Waves {0: [A, B], 1: [C]} with every artifact written to disk.
    #[tokio::test]
    async fn test_full_phase_on_filesystem() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".planning")).unwrap();
        fs::write(
            dir.path().join(".planning/ROADMAP.md"),
            "# Roadmap\nPhase 01: Setup",
        )
        .unwrap();

        let provider = Arc::new(
            RouterProvider::new(complete)
                .script(RESEARCHER, vec![research()])
                .script(
                    PLANNER,
                    vec![plans(&[("01-01", &[]), ("01-02", &[]), ("01-03", &["01-01", "01-02"])])],
                )
                .script(CHECKER, vec![checker_passed()])
                .script(VERIFIER, vec![verified()]),
        );
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let (events, mut rx) = EventSink::channel();
        let orchestrator =
            orchestrator(WorkflowConfig::default(), provider.clone(), store).with_events(events);

        let state = orchestrator
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert_eq!(state.status, OrchestratorStatus::Complete);
        assert!(state.check_invariants().is_empty());
        let scheduler = state.execution.scheduler.as_ref().unwrap();
        assert_eq!(scheduler.waves()[&0], vec!["01-01", "01-02"]);
        assert_eq!(scheduler.waves()[&1], vec!["01-03"]);
        assert_eq!(provider.executed().last().map(String::as_str), Some("01-03"));

        assert!(provider.prompts_for(RESEARCHER)[0].contains("# Roadmap"));

        let phase_dir = dir.path().join(".planning/phases/01-setup");
        assert!(phase_dir.join("01-RESEARCH.md").exists());
        assert!(phase_dir.join("01-VERIFICATION.md").exists());
        for id in ["01-01", "01-02", "01-03"] {
            assert!(phase_dir.join(format!("{}-PLAN.md", id)).exists());
            let summary = fs::read_to_string(phase_dir.join(format!("{}-SUMMARY.md", id))).unwrap();
            assert_eq!(summary, format!("Built {}", id));
        }

        let events = drain(&mut rx);
        assert_eq!(
            status_names(&events),
            vec!["researching", "planning", "executing", "verifying", "complete"]
        );
        assert!(matches!(
            events.last(),
            Some(OrchestratorEvent::Finished {
                status: OrchestratorStatus::Complete,
                error: None
            })
        ));
    }

    /// A failed plan skips its dependents; the independent sibling completes.
    #[tokio::test]
    async fn test_failed_plan_skips_dependents() {
        let provider = Arc::new(
            RouterProvider::new(|call| {
                if call.plan_id == "A" {
                    json!({ "status": "failed", "summary": "", "error": "tests broke" })
                } else {
                    complete(call)
                }
            })
            .script(PLANNER, vec![plans(&[("A", &[]), ("B", &[]), ("C", &["A"])])]),
        );
        let config = WorkflowConfig {
            research_enabled: false,
            plan_checker_enabled: false,
            verification_enabled: false,
            ..Default::default()
        };
        let store = Arc::new(MemoryArtifactStore::new());
        let state = orchestrator(config, provider.clone(), store)
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert_eq!(state.status, OrchestratorStatus::Complete);
        let executed = provider.executed();
        assert!(executed.contains(&"A".to_string()));
        assert!(executed.contains(&"B".to_string()));
        assert!(!executed.contains(&"C".to_string()));

        let scheduler = state.execution.scheduler.as_ref().unwrap();
        assert!(scheduler.completed().contains("B"));
        assert!(scheduler.failed().contains("A"));
        assert!(scheduler.failed().contains("C"));
        assert!(state.check_invariants().is_empty());
    }

    /// Verification gaps send the run back to planning; a replanned plan
    /// with an existing id re-runs together with its dependents.
    #[tokio::test]
    async fn test_gap_closure_reruns_failed_plan() {
        let provider = Arc::new(
            RouterProvider::new(|call| {
                if call.plan_id == "A" && call.attempt == 1 {
                    json!({ "status": "failed", "error": "missing migration" })
                } else {
                    complete(call)
                }
            })
            .script(
                PLANNER,
                vec![
                    plans(&[("A", &[]), ("B", &[]), ("C", &["A"])]),
                    plans(&[("A", &[])]),
                ],
            )
            .script(
                VERIFIER,
                vec![
                    json!({
                        "status": "gaps_found",
                        "verification_content": "# Gaps",
                        "gaps": ["A did not run its migration"]
                    }),
                    verified(),
                ],
            ),
        );
        let config = WorkflowConfig {
            research_enabled: false,
            plan_checker_enabled: false,
            ..Default::default()
        };
        let store = Arc::new(MemoryArtifactStore::new());
        let state = orchestrator(config, provider.clone(), store.clone())
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert_eq!(state.status, OrchestratorStatus::Complete);
        assert_eq!(state.planning.gap_closure_attempts, 1);
        let executed = provider.executed();
        assert_eq!(executed.iter().filter(|id| *id == "A").count(), 2);
        assert_eq!(executed.iter().filter(|id| *id == "B").count(), 1);
        assert_eq!(executed.iter().filter(|id| *id == "C").count(), 1);

        let gap_prompt = &provider.prompts_for(PLANNER)[1];
        assert!(gap_prompt.contains("A did not run its migration"));
        assert_eq!(
            store.get(&phase(), &ArtifactKind::Verification).as_deref(),
            Some("# Verification\nAll good")
        );
    }

    /// Gap closure that leaves a failed plan in place skips everything still
    /// depending on it instead of leaving those plans pending.
    #[tokio::test]
    async fn test_gap_closure_skips_plans_behind_a_kept_failure() {
        let provider = Arc::new(
            RouterProvider::new(|call| match (call.plan_id.as_str(), call.attempt) {
                ("A", _) | ("B", 1) => json!({ "status": "failed", "error": "tests broke" }),
                _ => complete(call),
            })
            .script(
                PLANNER,
                vec![
                    plans(&[("A", &[]), ("B", &[]), ("C", &["A", "B"])]),
                    plans(&[("B", &[]), ("D", &["A"])]),
                ],
            )
            .script(
                VERIFIER,
                vec![
                    json!({
                        "status": "gaps_found",
                        "verification_content": "# Gaps",
                        "gaps": ["B is broken"]
                    }),
                    verified(),
                ],
            ),
        );
        let config = WorkflowConfig {
            research_enabled: false,
            plan_checker_enabled: false,
            ..Default::default()
        };
        let (events, mut rx) = EventSink::channel();
        let state = orchestrator(config, provider.clone(), Arc::new(MemoryArtifactStore::new()))
            .with_events(events)
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert_eq!(state.status, OrchestratorStatus::Complete);
        let executed = provider.executed();
        assert_eq!(executed.iter().filter(|id| *id == "B").count(), 2);
        assert!(!executed.contains(&"C".to_string()));
        assert!(!executed.contains(&"D".to_string()));

        let scheduler = state.execution.scheduler.as_ref().unwrap();
        assert!(scheduler.all_terminal());
        assert!(scheduler.completed().contains("B"));
        for id in ["C", "D"] {
            assert!(scheduler.failed().contains(id));
            assert_eq!(
                state.execution.results[id].error.as_deref(),
                Some("skipped: dependency A failed")
            );
        }

        let events = drain(&mut rx);
        assert!(events.iter().any(|event| matches!(
            event,
            OrchestratorEvent::PlanSkipped { plan_id, failed_dependency }
                if plan_id == "D" && failed_dependency == "A"
        )));
    }

    /// A runner loop that never stops asking for tools ends the run after
    /// exactly the configured number of round-trips.
    #[tokio::test]
    async fn test_iteration_budget_fails_the_run() {
        let provider = Arc::new(LoopingProvider::default());
        let runner = AgentRunner::new(provider.clone(), Arc::new(ToolRegistry::new()))
            .with_max_iterations(2);
        let orchestrator = PhaseOrchestrator::new(
            WorkflowConfig::default(),
            runner,
            StageSet::from_models(&models()),
            Arc::new(MemoryArtifactStore::new()),
        );

        let state = orchestrator
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert_eq!(state.status, OrchestratorStatus::Failed);
        let error = state.error.unwrap();
        assert_eq!(error.code, "ITERATION_BUDGET_EXCEEDED");
        assert_eq!(error.context["stage"], "researcher");
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_checker_blockers_exhaust_planning() {
        let blocker = json!({
            "status": "issues_found",
            "issues": [{
                "plan_id": "A",
                "dimension": "completeness",
                "severity": "blocker",
                "description": "No verification step"
            }]
        });
        let provider = Arc::new(
            RouterProvider::new(complete)
                .script(PLANNER, vec![plans(&[("A", &[])]); 2])
                .script(CHECKER, vec![blocker.clone(), blocker]),
        );
        let config = WorkflowConfig {
            research_enabled: false,
            max_planning_iterations: 2,
            ..Default::default()
        };
        let state = orchestrator(config, provider.clone(), Arc::new(MemoryArtifactStore::new()))
            .run(phase(), OrchestratorControl::detached())
            .await;

        assert!(matches!(state.status, OrchestratorStatus::Blocked { .. }));
        assert_eq!(state.planning.iteration, 2);
        assert_eq!(provider.prompts_for(PLANNER).len(), 2);
        assert!(provider.executed().is_empty());
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

mod checkpoints {
    use super::*;

    fn checkpointing(call: &ExecutorCall) -> Value {
        if call.plan_id == "A" && !call.resumed() {
            json!({
                "status": "paused",
                "summary": "Schema drafted",
                "checkpoint": {
                    "type": "decision",
                    "task_number": 2,
                    "description": "Pick a database",
                    "awaiting": "database choice",
                    "options": [
                        { "id": "pg", "name": "Postgres" },
                        { "id": "sqlite", "name": "SQLite" }
                    ]
                }
            })
        } else {
            complete(call)
        }
    }

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            research_enabled: false,
            plan_checker_enabled: false,
            verification_enabled: false,
            ..Default::default()
        }
    }

    /// The paused plan holds its wave while its sibling finishes; the
    /// resolution resumes it and the dependent wave follows.
    #[tokio::test]
    async fn test_checkpoint_pauses_and_resumes() {
        let provider = Arc::new(
            RouterProvider::new(checkpointing)
                .script(PLANNER, vec![plans(&[("A", &[]), ("B", &[]), ("C", &["A"])])]),
        );
        let (events, mut rx) = EventSink::channel();
        let orchestrator = orchestrator(
            config(),
            provider.clone(),
            Arc::new(MemoryArtifactStore::new()),
        )
        .with_events(events);
        let (handle, control) = OrchestratorHandle::new();

        let responder = async {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push(event.clone());
                match event {
                    OrchestratorEvent::AwaitingHuman { checkpoints } => {
                        assert_eq!(checkpoints.len(), 1);
                        assert_eq!(checkpoints[0].plan_id, "A");
                        let paused = handle.snapshot().paused;
                        assert!(paused.contains("A"));
                        handle
                            .resume("A", Resolution::choice("pg"))
                            .unwrap();
                    }
                    OrchestratorEvent::Finished { .. } => break,
                    _ => {}
                }
            }
            seen
        };

        let (state, seen) = tokio::join!(orchestrator.run(phase(), control), responder);

        assert_eq!(state.status, OrchestratorStatus::Complete);
        assert!(state.execution.checkpoints.is_empty());
        assert!(state.check_invariants().is_empty());

        let position = |pred: fn(&OrchestratorEvent) -> bool| seen.iter().position(pred).unwrap();
        let b_done = position(|e| {
            matches!(e, OrchestratorEvent::PlanCompleted { plan_id, .. } if plan_id == "B")
        });
        let awaiting = position(|e| matches!(e, OrchestratorEvent::AwaitingHuman { .. }));
        let resumed = position(|e| {
            matches!(e, OrchestratorEvent::PlanStarted { plan_id, resumed: true, .. } if plan_id == "A")
        });
        let wave_one = position(|e| matches!(e, OrchestratorEvent::WaveStarted { wave: 1, .. }));
        assert!(b_done < awaiting);
        assert!(awaiting < resumed);
        assert!(resumed < wave_one);

        let resume_prompt = provider
            .prompts_for(EXECUTOR)
            .into_iter()
            .find(|p| p.contains("Resuming after checkpoint"))
            .unwrap();
        assert!(resume_prompt.contains("Selected option: pg"));
        assert_eq!(provider.executed().last().map(String::as_str), Some("C"));
    }

    /// Nobody can answer: the run ends blocked naming the checkpoint.
    #[tokio::test]
    async fn test_unanswerable_checkpoint_blocks() {
        let provider = Arc::new(
            RouterProvider::new(checkpointing)
                .script(PLANNER, vec![plans(&[("A", &[]), ("B", &[]), ("C", &["A"])])]),
        );
        let state: OrchestratorState = orchestrator(
            config(),
            provider.clone(),
            Arc::new(MemoryArtifactStore::new()),
        )
        .run(phase(), OrchestratorControl::detached())
        .await;

        match &state.status {
            OrchestratorStatus::Blocked { reason } => {
                assert!(reason.contains("A"));
                assert!(reason.contains("Pick a database"));
            }
            other => panic!("expected blocked, got {:?}", other),
        }
        assert!(state.execution.checkpoints.is_paused("A"));
        assert!(!provider.executed().contains(&"C".to_string()));
    }
}

// =============================================================================
// CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_gsd_help() {
        gsd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_gsd_version() {
        gsd().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_phase_arguments() {
        gsd()
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--phase"));
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        gsd()
            .current_dir(dir.path())
            .args(["config", "show"])
            .env_remove("GSD_MODEL_PROFILE")
            .env_remove("GSD_MAX_ITERATIONS")
            .env_remove("GSD_PARALLELIZATION")
            .assert()
            .success()
            .stdout(predicate::str::contains("No gsd.toml found"))
            .stdout(predicate::str::contains("model_profile = \"balanced\""));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        gsd()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created gsd.toml"));
        assert!(dir.path().join(".planning/gsd.toml").exists());

        gsd()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".planning")).unwrap();
        fs::write(
            dir.path().join(".planning/gsd.toml"),
            "[agent]\nmax_iterations = 0\n",
        )
        .unwrap();

        gsd()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_iterations is 0"));
    }

    #[test]
    fn test_run_without_api_key_fails() {
        let dir = TempDir::new().unwrap();
        gsd()
            .current_dir(dir.path())
            .args(["run", "--phase", "01", "--name", "Setup", "--goal", "Scaffold"])
            .env_remove("ANTHROPIC_API_KEY")
            .assert()
            .failure()
            .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
    }
}
