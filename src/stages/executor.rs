//! Executor stage: carries out a single plan.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::parse::parse_json;
use crate::agent::{Stage, StageKind};
use crate::phase::PhaseInfo;
use crate::plan::{Checkpoint, Commit, ExecutionResult, ExecutionStatus, Plan, Resolution};

/// A previously hit checkpoint and the human answer to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeContext {
    pub checkpoint: Checkpoint,
    pub resolution: Resolution,
}

#[derive(Debug, Clone)]
pub struct ExecutorInput {
    pub phase: PhaseInfo,
    pub plan: Plan,
    pub project_state: Option<String>,
    /// Present when re-running a plan after its checkpoint was resolved
    pub resume: Option<ResumeContext>,
}

impl ExecutorInput {
    pub fn new(phase: PhaseInfo, plan: Plan, project_state: Option<String>) -> Self {
        Self {
            phase,
            plan,
            project_state,
            resume: None,
        }
    }

    pub fn resuming(mut self, resume: ResumeContext) -> Self {
        self.resume = Some(resume);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub deviations: Vec<String>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutorOutput {
    /// Attach the output to the plan it came from.
    pub fn into_result(self, plan_id: &str) -> ExecutionResult {
        let checkpoint = self.checkpoint.map(|mut checkpoint| {
            checkpoint.plan_id = plan_id.to_string();
            checkpoint
        });
        let error = match self.status {
            ExecutionStatus::Failed => self
                .error
                .or_else(|| Some("executor reported failure".to_string())),
            _ => self.error,
        };
        ExecutionResult {
            plan_id: plan_id.to_string(),
            status: self.status,
            summary: self.summary,
            commits: self.commits,
            deviations: self.deviations,
            checkpoint,
            error,
        }
    }
}

pub struct Executor {
    model: String,
}

impl Executor {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Stage for Executor {
    type Input = ExecutorInput;
    type Output = ExecutorOutput;

    fn kind(&self) -> StageKind {
        StageKind::Executor
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_preamble(&self, _input: &ExecutorInput) -> String {
        "You are a plan executor. Carry out the plan's tasks in order using the tools, \
         verify each task, and commit after each one. If you must depart from the plan, \
         record the deviation. When a task is a checkpoint that needs a human, stop and \
         return it instead of guessing.\n\n\
         Answer with a single JSON object in a ```json block:\n\
         {\"status\": \"complete\" | \"paused\" | \"failed\", \"summary\": \"<markdown summary>\", \
         \"commits\": [{\"hash\": \"abc1234\", \"message\": \"...\"}], \"deviations\": [], \
         \"checkpoint\": {\"type\": \"human-verify\" | \"decision\" | \"human-action\", \
         \"task_number\": 3, \"description\": \"...\", \"awaiting\": \"...\", \
         \"options\": [{\"id\": \"a\", \"name\": \"...\", \"description\": \"...\"}]}, \
         \"error\": null}\n\
         Include \"checkpoint\" only when pausing."
            .to_string()
    }

    fn user_message(&self, input: &ExecutorInput) -> String {
        let mut message = format!(
            "# {}\n\n## Plan {}\n\n{}\n",
            input.phase,
            input.plan.id,
            input.plan.content.trim()
        );
        if !input.plan.autonomous {
            message.push_str(
                "\nThis plan is not autonomous: stop at each checkpoint task and return it.\n",
            );
        }
        if let Some(ref state) = input.project_state {
            message.push_str(&format!("\n<STATE>\n{}\n</STATE>\n", state.trim()));
        }
        if let Some(ref resume) = input.resume {
            let checkpoint = &resume.checkpoint;
            message.push_str(&format!(
                "\n## Resuming after checkpoint\n\nTask {} ({}) was waiting for: {}\n",
                checkpoint.task_number, checkpoint.kind, checkpoint.awaiting
            ));
            if let Some(ref choice) = resume.resolution.choice {
                message.push_str(&format!("Selected option: {}\n", choice));
            }
            if !resume.resolution.note.is_empty() {
                message.push_str(&format!("Human response: {}\n", resume.resolution.note));
            }
            message.push_str("Continue from that task; do not redo completed tasks.\n");
        }
        message
    }

    fn parse_output(&self, text: &str) -> Result<ExecutorOutput> {
        let mut output: ExecutorOutput = parse_json(text)?;
        if output.checkpoint.is_some() {
            output.status = ExecutionStatus::Paused;
        } else if output.status == ExecutionStatus::Paused {
            bail!("Executor reported paused without a checkpoint");
        }
        Ok(output)
    }
}
