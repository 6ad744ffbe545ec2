//! Plan checker stage: reviews a candidate plan set before execution.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::PhaseContext;
use super::parse::parse_json;
use crate::agent::{Stage, StageKind};
use crate::plan::{Plan, PlanIssue};

#[derive(Debug, Clone)]
pub struct CheckerInput {
    pub context: PhaseContext,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    IssuesFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerOutput {
    pub status: CheckStatus,
    #[serde(default)]
    pub issues: Vec<PlanIssue>,
}

impl CheckerOutput {
    /// Whether any finding prevents the plan set from being accepted.
    ///
    /// Acceptance depends on the issues alone: a `passed` status with a
    /// blocker is still rejected.
    pub fn has_blockers(&self) -> bool {
        self.issues.iter().any(PlanIssue::is_blocking)
    }
}

pub struct PlanChecker {
    model: String,
}

impl PlanChecker {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Stage for PlanChecker {
    type Input = CheckerInput;
    type Output = CheckerOutput;

    fn kind(&self) -> StageKind {
        StageKind::PlanChecker
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_preamble(&self, _input: &CheckerInput) -> String {
        "You are a plan checker. Verify that the plans will achieve the phase goal before \
         any code is written. Check completeness (every requirement is covered by a task), \
         compliance (the plans honour the user's decisions in CONTEXT) and dependencies \
         (depends_on is correct, minimal and acyclic). Report problems that would make the \
         phase fail as \"blocker\"; everything else is \"warning\" or \"info\".\n\n\
         Answer with a single JSON object in a ```json block:\n\
         {\"status\": \"passed\" | \"issues_found\", \"issues\": [{\"plan_id\": \"01-01\", \
         \"severity\": \"blocker\", \"dimension\": \"completeness\", \"description\": \"...\", \
         \"task\": 2, \"fix_hint\": \"...\"}]}"
            .to_string()
    }

    fn user_message(&self, input: &CheckerInput) -> String {
        let mut message = input.context.describe();
        message.push_str("\n## Plans to check\n");
        for plan in &input.plans {
            message.push_str(&format!(
                "\n### {}\ndepends_on: [{}]\nautonomous: {}\n\n{}\n",
                plan.id,
                plan.depends_on.join(", "),
                plan.autonomous,
                plan.content.trim()
            ));
        }
        message
    }

    fn parse_output(&self, text: &str) -> Result<CheckerOutput> {
        parse_json(text)
    }
}
