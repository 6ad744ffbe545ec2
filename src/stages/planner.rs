//! Planner stage: decomposes the phase goal into dependency-ordered plans.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::PhaseContext;
use super::parse::parse_json;
use crate::agent::{Stage, StageKind};
use crate::plan::{Plan, PlanId, PlanIssue};

/// Why the planner is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningMode {
    /// Fresh plan generation
    Standard,
    /// New plans addressing verification gaps
    GapClosure,
    /// Rewrite of prior plans in response to checker issues
    Revision,
}

impl std::fmt::Display for PlanningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanningMode::Standard => write!(f, "standard"),
            PlanningMode::GapClosure => write!(f, "gap_closure"),
            PlanningMode::Revision => write!(f, "revision"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub mode: PlanningMode,
    pub context: PhaseContext,
    /// Gaps reported by the verifier (gap closure)
    pub verification_gaps: Vec<String>,
    /// Plans from the previous attempt (revision) or already executed (gap closure)
    pub existing_plans: Vec<Plan>,
    /// Checker findings to address (revision)
    pub checker_issues: Vec<PlanIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStatus {
    Complete,
    /// The planner could not produce plans without human guidance
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerOutput {
    pub status: PlannerStatus,
    pub plans: Vec<Plan>,
    pub reason: Option<String>,
}

/// Plan as returned by the model. Explicit fields win over frontmatter.
#[derive(Debug, Deserialize)]
struct RawPlan {
    id: PlanId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    depends_on: Option<Vec<PlanId>>,
    #[serde(default)]
    autonomous: Option<bool>,
    #[serde(default)]
    files_modified: Option<Vec<String>>,
    #[serde(default)]
    must_haves: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawPlannerOutput {
    status: PlannerStatus,
    #[serde(default)]
    plans: Vec<RawPlan>,
    #[serde(default)]
    reason: Option<String>,
}

impl RawPlan {
    fn into_plan(self) -> Result<Plan> {
        let mut plan = Plan::from_markdown(&self.id, &self.content)?;
        if let Some(depends_on) = self.depends_on {
            plan.depends_on = depends_on;
        }
        if let Some(autonomous) = self.autonomous {
            plan.autonomous = autonomous;
        }
        if let Some(files) = self.files_modified {
            plan.files_modified = files;
        }
        if let Some(truths) = self.must_haves {
            plan.must_haves = truths;
        }
        Ok(plan)
    }
}

pub struct Planner {
    model: String,
}

impl Planner {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Stage for Planner {
    type Input = PlannerInput;
    type Output = PlannerOutput;

    fn kind(&self) -> StageKind {
        StageKind::Planner
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_preamble(&self, input: &PlannerInput) -> String {
        let mode_rules = match input.mode {
            PlanningMode::Standard => "Create the plans for this phase from scratch.",
            PlanningMode::GapClosure => {
                "Verification found gaps in the executed work. Create plans that close \
                 exactly those gaps. Reuse an existing plan id only to replace that plan; \
                 otherwise use new ids."
            }
            PlanningMode::Revision => {
                "The plan checker rejected the previous plans. Revise them so every \
                 blocker is resolved, keeping plan ids stable where possible."
            }
        };
        format!(
            "You are a phase planner. Decompose the phase goal into small executable plans \
             (2-3 tasks each). Plans that do not depend on each other run in parallel, so \
             declare every real dependency in depends_on and nothing more. Dependencies \
             must not form a cycle. Mark a plan autonomous=false if it contains a \
             checkpoint for a human.\n\n{}\n\n\
             Answer with a single JSON object in a ```json block:\n\
             {{\"status\": \"complete\", \"plans\": [{{\"id\": \"<phase>-<nn>\", \
             \"depends_on\": [], \"autonomous\": true, \"files_modified\": [], \
             \"must_haves\": [\"observable truth\"], \"content\": \"<plan markdown>\"}}]}}\n\
             If you cannot plan without guidance, answer {{\"status\": \"inconclusive\", \
             \"reason\": \"...\"}}.",
            mode_rules
        )
    }

    fn user_message(&self, input: &PlannerInput) -> String {
        let mut message = format!("Mode: {}\n\n{}", input.mode, input.context.describe());

        if !input.verification_gaps.is_empty() {
            message.push_str("\n## Verification gaps\n");
            for gap in &input.verification_gaps {
                message.push_str(&format!("- {}\n", gap));
            }
        }
        if !input.existing_plans.is_empty() {
            message.push_str("\n## Existing plans\n");
            for plan in &input.existing_plans {
                message.push_str(&format!(
                    "\n### {} (depends on: {})\n{}\n",
                    plan.id,
                    if plan.depends_on.is_empty() {
                        "none".to_string()
                    } else {
                        plan.depends_on.join(", ")
                    },
                    plan.content.trim()
                ));
            }
        }
        if !input.checker_issues.is_empty() {
            message.push_str("\n## Checker issues\n");
            for issue in &input.checker_issues {
                message.push_str(&format!(
                    "- [{:?}] {} ({:?}): {}",
                    issue.severity, issue.plan_id, issue.dimension, issue.description
                ));
                if let Some(ref hint) = issue.fix_hint {
                    message.push_str(&format!(" Fix: {}", hint));
                }
                message.push('\n');
            }
        }
        message
    }

    fn parse_output(&self, text: &str) -> Result<PlannerOutput> {
        let raw: RawPlannerOutput = parse_json(text)?;
        let plans = raw
            .plans
            .into_iter()
            .map(RawPlan::into_plan)
            .collect::<Result<Vec<_>>>()?;

        if raw.status == PlannerStatus::Complete && plans.is_empty() {
            bail!("Planner reported complete without any plans");
        }
        Ok(PlannerOutput {
            status: raw.status,
            plans,
            reason: raw.reason,
        })
    }
}
