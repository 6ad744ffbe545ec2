//! Phase orchestration - `gsd run`.

use anyhow::{Context, Result, bail};
use console::{Term, style};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use gsd::agent::{AgentRunner, AnthropicProvider, ToolRegistry};
use gsd::config::{CliOverrides, Config};
use gsd::dag::{ExecutionSummary, ExecutionTimer};
use gsd::orchestrator::{
    EventSink, OrchestratorEvent, OrchestratorHandle, OrchestratorStatus, PhaseOrchestrator,
};
use gsd::phase::{FsArtifactStore, PhaseInfo};
use gsd::plan::{Checkpoint, Resolution};
use gsd::stages::StageSet;
use gsd::ui::icons::{CHECK, CLOCK, CROSS, HUMAN};
use gsd::ui::{PhaseUI, UiMode};

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    phase: PhaseInfo,
    overrides: &CliOverrides,
) -> Result<()> {
    let config = Config::load(project_dir, overrides)?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let agent = &config.toml.agent;
    let provider = AnthropicProvider::from_env(
        agent.api_base.clone(),
        Duration::from_secs(agent.request_timeout_secs),
    )
    .context("Failed to configure model provider")?;
    let tools = ToolRegistry::with_builtin(config.project_dir.clone());
    let runner = AgentRunner::new(Arc::new(provider), Arc::new(tools))
        .with_max_iterations(agent.max_iterations)
        .with_max_tokens(agent.max_tokens);
    let stages = StageSet::from_models(&config.stage_models());
    let store = Arc::new(FsArtifactStore::new(config.project_dir.clone()));

    let (events, mut rx) = EventSink::channel();
    let orchestrator =
        PhaseOrchestrator::new(config.workflow().clone(), runner, stages, store).with_events(events);

    let interactive = !cli.json && Term::stdout().features().is_attended();
    let mode = if cli.json {
        UiMode::Json
    } else if interactive {
        UiMode::Full
    } else {
        UiMode::Minimal
    };
    let mut ui = PhaseUI::new(mode, cli.verbose);

    if mode != UiMode::Json {
        println!(
            "{} {}",
            style(phase.to_string()).bold(),
            style(format!("({})", config.workflow().model_profile)).dim()
        );
        println!("  {}", style(&phase.goal).dim());
    }

    // Without a terminal nobody can answer checkpoints; dropping the handle
    // lets the run end blocked instead of waiting forever.
    let (handle, control) = OrchestratorHandle::new();
    let handle = interactive.then_some(handle);

    let timer = ExecutionTimer::start();
    let task = tokio::spawn(async move { orchestrator.run(phase, control).await });

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c(), if handle.is_some() => {
                if let Some(handle) = &handle {
                    handle.cancel().ok();
                }
                continue;
            }
        };
        let Some(event) = event else { break };
        ui.handle_event(&event);

        if let (OrchestratorEvent::AwaitingHuman { checkpoints }, Some(handle)) = (&event, &handle)
        {
            for checkpoint in checkpoints {
                let resolution =
                    tokio::task::block_in_place(|| ui.suspend(|| prompt_resolution(checkpoint)))?;
                handle.resume(&checkpoint.plan_id, resolution)?;
            }
        }
    }
    ui.finish();

    let state = task.await.context("Orchestrator task failed")?;

    if let Some(scheduler) = &state.execution.scheduler {
        let summary = ExecutionSummary::from_scheduler(scheduler, timer.elapsed());
        if mode == UiMode::Json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            print_summary(&summary);
        }
    }

    match &state.status {
        OrchestratorStatus::Complete => Ok(()),
        OrchestratorStatus::Blocked { reason } => bail!("Phase blocked: {}", reason),
        status => match &state.error {
            Some(error) => bail!("Phase {}: [{}] {}", status, error.code, error.message),
            None => bail!("Phase ended in status {}", status),
        },
    }
}

fn print_summary(summary: &ExecutionSummary) {
    println!();
    println!(
        "{}Plans: {}/{} completed in {} wave(s) ({:.1}s)",
        CLOCK,
        style(summary.completed).green().bold(),
        summary.total_plans,
        summary.total_waves,
        summary.duration.as_secs_f64()
    );
    if summary.failed > 0 || summary.skipped > 0 {
        println!(
            "{}{} failed, {} skipped",
            CROSS,
            style(summary.failed).red(),
            style(summary.skipped).dim()
        );
    } else if summary.all_success() {
        println!("{}All plans succeeded", CHECK);
    }
}

/// Ask the user to answer one checkpoint.
fn prompt_resolution(checkpoint: &Checkpoint) -> Result<Resolution> {
    use dialoguer::{Input, Select, theme::ColorfulTheme};

    println!();
    println!(
        "{}{} needs {} (task {})",
        HUMAN,
        style(&checkpoint.plan_id).yellow().bold(),
        checkpoint.kind,
        checkpoint.task_number
    );
    println!("{}", checkpoint.description);
    if !checkpoint.awaiting.is_empty() {
        println!("{} {}", style("Awaiting:").dim(), checkpoint.awaiting);
    }

    let theme = ColorfulTheme::default();
    if checkpoint.options.is_empty() {
        let note: String = Input::with_theme(&theme)
            .with_prompt("Response")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read checkpoint response")?;
        return Ok(Resolution::note(note));
    }

    let labels: Vec<String> = checkpoint
        .options
        .iter()
        .map(|option| {
            if option.description.is_empty() {
                option.name.clone()
            } else {
                format!("{} - {}", option.name, option.description)
            }
        })
        .collect();
    let selection = Select::with_theme(&theme)
        .with_prompt("Choose an option")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to read checkpoint choice")?;
    let note: String = Input::with_theme(&theme)
        .with_prompt("Note (optional)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read checkpoint note")?;

    Ok(Resolution {
        choice: Some(checkpoint.options[selection].id.clone()),
        note,
    })
}
