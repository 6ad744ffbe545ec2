//! Phase progress UI.
//!
//! Renders `OrchestratorEvent`s in one of three modes:
//! - `full`: spinners for running plans, colored status lines
//! - `minimal`: one plain line per event
//! - `json`: one JSON object per line on stdout

use crate::orchestrator::{OrchestratorEvent, OrchestratorStatus};
use crate::plan::{Checkpoint, PlanId};
use crate::ui::icons::{
    BLOCKER, CHECK, CROSS, HUMAN, PAUSED, PLANNING, RESEARCH, RUNNING, SKIP, SPARKLE, VERIFY, WAVE,
};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

/// Output mode for the phase UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Spinners and colors
    #[default]
    Full,
    /// Plain status lines
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.cyan} {prefix:.bold} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Terminal renderer for a phase run.
///
/// Driven from a single task that drains the event channel, so no locking.
pub struct PhaseUI {
    mode: UiMode,
    multi: MultiProgress,
    plan_bars: HashMap<PlanId, ProgressBar>,
    verbose: bool,
    term: Term,
}

impl PhaseUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        Self {
            mode,
            multi: MultiProgress::new(),
            plan_bars: HashMap::new(),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn handle_event(&mut self, event: &OrchestratorEvent) {
        match self.mode {
            UiMode::Json => self.emit_json(event),
            UiMode::Minimal => {
                if let Some(line) = describe(event) {
                    let _ = writeln!(&self.term, "{}", line);
                }
            }
            UiMode::Full => self.render_full(event),
        }
    }

    /// Run `f` with spinners hidden, e.g. while prompting the user.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    /// Clear any spinners still on screen.
    pub fn finish(&mut self) {
        for (_, bar) in self.plan_bars.drain() {
            bar.finish_and_clear();
        }
    }

    fn emit_json(&self, event: &OrchestratorEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = writeln!(&self.term, "{}", json);
            }
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
    }

    fn println(&self, line: String) {
        self.multi.println(line).ok();
    }

    fn render_full(&mut self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::StatusChanged { to, .. } => self.on_status(to),
            OrchestratorEvent::PlanningIteration {
                mode,
                iteration,
                max_iterations,
                plans,
                blockers,
            } => {
                let outcome = if *blockers == 0 {
                    style("accepted".to_string()).green()
                } else {
                    style(format!("{} blocker(s)", blockers)).yellow()
                };
                self.println(format!(
                    "  {}{} iteration {}/{}: {} plan(s), {}",
                    PLANNING, mode, iteration, max_iterations, plans, outcome
                ));
            }
            OrchestratorEvent::WavesComputed { waves } => {
                if self.verbose {
                    for (wave, plans) in waves {
                        self.println(format!(
                            "    {} {}",
                            style(format!("wave {}:", wave + 1)).dim(),
                            plans.join(", ")
                        ));
                    }
                }
            }
            OrchestratorEvent::WaveStarted { wave, plans } => {
                self.println(format!(
                    "{}{} ({} plan{})",
                    WAVE,
                    style(format!("Wave {}", wave + 1)).cyan().bold(),
                    plans.len(),
                    if plans.len() == 1 { "" } else { "s" }
                ));
            }
            OrchestratorEvent::PlanStarted {
                plan_id, resumed, ..
            } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(spinner_style());
                bar.set_prefix(plan_id.clone());
                bar.set_message(if *resumed { "resuming..." } else { "executing..." });
                bar.enable_steady_tick(Duration::from_millis(120));
                if let Some(old) = self.plan_bars.insert(plan_id.clone(), bar) {
                    old.finish_and_clear();
                }
            }
            OrchestratorEvent::PlanCompleted { plan_id, summary } => {
                self.clear_bar(plan_id);
                let detail = first_line(summary);
                self.println(format!(
                    "  {}{} {}",
                    CHECK,
                    style(plan_id).green().bold(),
                    style(detail).dim()
                ));
            }
            OrchestratorEvent::PlanFailed { plan_id, error } => {
                self.clear_bar(plan_id);
                self.println(format!(
                    "  {}{} {}",
                    CROSS,
                    style(plan_id).red().bold(),
                    first_line(error)
                ));
            }
            OrchestratorEvent::PlanSkipped {
                plan_id,
                failed_dependency,
            } => {
                self.println(format!(
                    "  {}{} {}",
                    SKIP,
                    style(plan_id).dim(),
                    style(format!("skipped ({} failed)", failed_dependency)).dim()
                ));
            }
            OrchestratorEvent::PlanPaused { checkpoint } => {
                self.clear_bar(&checkpoint.plan_id);
                self.println(format!(
                    "  {}{} {}",
                    PAUSED,
                    style(&checkpoint.plan_id).yellow().bold(),
                    checkpoint_line(checkpoint)
                ));
            }
            OrchestratorEvent::AwaitingHuman { checkpoints } => {
                self.println(format!(
                    "{}{} checkpoint{} awaiting input",
                    HUMAN,
                    checkpoints.len(),
                    if checkpoints.len() == 1 { "" } else { "s" }
                ));
            }
            OrchestratorEvent::WaveCompleted {
                wave,
                completed,
                failed,
            } => {
                let emoji = if *failed == 0 { CHECK } else { CROSS };
                self.println(format!(
                    "{}Wave {} done: {} succeeded, {}",
                    emoji,
                    wave + 1,
                    style(completed).green(),
                    if *failed > 0 {
                        style(format!("{} failed", failed)).red().to_string()
                    } else {
                        style("0 failed").dim().to_string()
                    }
                ));
            }
            OrchestratorEvent::Finished { status, error } => {
                self.finish();
                self.println(format!("{}", style("═".repeat(60)).cyan()));
                match status {
                    OrchestratorStatus::Complete => self.println(format!(
                        "{}Phase {} {}",
                        SPARKLE,
                        style("COMPLETE").green().bold(),
                        SPARKLE
                    )),
                    OrchestratorStatus::Blocked { reason } => self.println(format!(
                        "{}Phase {}: {}",
                        BLOCKER,
                        style("BLOCKED").yellow().bold(),
                        reason
                    )),
                    other => {
                        let detail = error
                            .as_ref()
                            .map(|e| format!("{}: {}", e.code, e.message))
                            .unwrap_or_default();
                        self.println(format!(
                            "{}Phase {} {}",
                            CROSS,
                            style(other.name().to_uppercase()).red().bold(),
                            detail
                        ));
                    }
                }
                self.println(format!("{}", style("═".repeat(60)).cyan()));
            }
        }
    }

    fn on_status(&self, to: &OrchestratorStatus) {
        let line = match to {
            OrchestratorStatus::Researching => format!("{}Researching...", RESEARCH),
            OrchestratorStatus::Planning { mode } => format!("{}Planning ({})...", PLANNING, mode),
            OrchestratorStatus::Executing => format!("{}Executing plans...", RUNNING),
            OrchestratorStatus::Verifying => format!("{}Verifying phase goal...", VERIFY),
            _ => return,
        };
        self.println(style(line).bold().to_string());
    }

    fn clear_bar(&mut self, plan_id: &str) {
        if let Some(bar) = self.plan_bars.remove(plan_id) {
            bar.finish_and_clear();
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn checkpoint_line(checkpoint: &Checkpoint) -> String {
    format!("{}: {}", checkpoint.kind, first_line(&checkpoint.description))
}

/// Plain one-line rendering of an event, or `None` for events with
/// nothing worth printing.
pub fn describe(event: &OrchestratorEvent) -> Option<String> {
    Some(match event {
        OrchestratorEvent::StatusChanged { from, to } => format!("[status] {} -> {}", from, to),
        OrchestratorEvent::PlanningIteration {
            mode,
            iteration,
            max_iterations,
            plans,
            blockers,
        } => format!(
            "[planning] {} {}/{}: {} plans, {} blockers",
            mode, iteration, max_iterations, plans, blockers
        ),
        OrchestratorEvent::WavesComputed { waves } => {
            format!("[waves] {} wave(s)", waves.len())
        }
        OrchestratorEvent::WaveStarted { wave, plans } => {
            format!("[wave {}] started: {}", wave + 1, plans.join(", "))
        }
        OrchestratorEvent::PlanStarted {
            plan_id, resumed, ..
        } => {
            if *resumed {
                format!("[{}] resumed", plan_id)
            } else {
                format!("[{}] started", plan_id)
            }
        }
        OrchestratorEvent::PlanCompleted { plan_id, .. } => format!("[{}] complete", plan_id),
        OrchestratorEvent::PlanFailed { plan_id, error } => {
            format!("[{}] failed: {}", plan_id, first_line(error))
        }
        OrchestratorEvent::PlanSkipped {
            plan_id,
            failed_dependency,
        } => format!("[{}] skipped: {} failed", plan_id, failed_dependency),
        OrchestratorEvent::PlanPaused { checkpoint } => {
            format!("[{}] paused: {}", checkpoint.plan_id, checkpoint_line(checkpoint))
        }
        OrchestratorEvent::AwaitingHuman { checkpoints } => {
            let ids: Vec<&str> = checkpoints.iter().map(|c| c.plan_id.as_str()).collect();
            format!("[human] awaiting: {}", ids.join(", "))
        }
        OrchestratorEvent::WaveCompleted {
            wave,
            completed,
            failed,
        } => format!(
            "[wave {}] done: {} complete, {} failed",
            wave + 1,
            completed,
            failed
        ),
        OrchestratorEvent::Finished { status, error } => match error {
            Some(e) => format!("[done] {} ({}: {})", status, e.code, e.message),
            None => format!("[done] {}", status),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorRecord;
    use crate::plan::CheckpointKind;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("MINIMAL"), UiMode::Minimal);
        assert_eq!(UiMode::parse("anything"), UiMode::Full);
    }

    #[test]
    fn test_describe_uses_one_based_waves() {
        let line = describe(&OrchestratorEvent::WaveStarted {
            wave: 0,
            plans: vec!["01-01".into(), "01-02".into()],
        })
        .unwrap();
        assert_eq!(line, "[wave 1] started: 01-01, 01-02");
    }

    #[test]
    fn test_describe_pause_names_checkpoint() {
        let checkpoint = Checkpoint {
            plan_id: "01-03".into(),
            task_number: 2,
            kind: CheckpointKind::Decision,
            description: "Pick a database\nmore detail".into(),
            awaiting: "choice".into(),
            options: vec![],
        };
        let line = describe(&OrchestratorEvent::PlanPaused { checkpoint }).unwrap();
        assert_eq!(line, "[01-03] paused: decision: Pick a database");
    }

    #[test]
    fn test_describe_finished_includes_error_code() {
        let line = describe(&OrchestratorEvent::Finished {
            status: OrchestratorStatus::Failed,
            error: Some(ErrorRecord {
                code: "CANCELLED".into(),
                message: "Run cancelled".into(),
                context: serde_json::Value::Null,
            }),
        })
        .unwrap();
        assert!(line.contains("failed"));
        assert!(line.contains("CANCELLED"));
    }
}
