//! Verifier stage: checks whether the executed phase achieved its goal.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::PhaseContext;
use super::parse::parse_json;
use crate::agent::{Stage, StageKind};
use crate::plan::PlanId;

#[derive(Debug, Clone)]
pub struct VerifierInput {
    pub context: PhaseContext,
    /// Observable truths collected from every accepted plan
    pub must_haves: Vec<String>,
    /// Executor summaries of completed plans
    pub summaries: Vec<(PlanId, String)>,
    /// Plans that failed or were skipped
    pub failed_plans: Vec<PlanId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    HumanNeeded,
    GapsFound,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Passed => write!(f, "passed"),
            VerificationStatus::HumanNeeded => write!(f, "human_needed"),
            VerificationStatus::GapsFound => write!(f, "gaps_found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierOutput {
    pub status: VerificationStatus,
    /// Document written to `<phase>-VERIFICATION.md`
    #[serde(default)]
    pub verification_content: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub human_verification_steps: Vec<String>,
}

pub struct Verifier {
    model: String,
}

impl Verifier {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Stage for Verifier {
    type Input = VerifierInput;
    type Output = VerifierOutput;

    fn kind(&self) -> StageKind {
        StageKind::Verifier
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_preamble(&self, _input: &VerifierInput) -> String {
        "You are a phase verifier. Work backwards from the phase goal: check in the \
         codebase that every must-have truth actually holds, not just that tasks were \
         reported done. Use the tools to read code and run tests.\n\n\
         Answer with a single JSON object in a ```json block:\n\
         {\"status\": \"passed\" | \"human_needed\" | \"gaps_found\", \
         \"verification_content\": \"<markdown report>\", \"gaps\": [\"...\"], \
         \"human_verification_steps\": [\"...\"]}\n\
         Use human_needed only for things that cannot be checked programmatically."
            .to_string()
    }

    fn user_message(&self, input: &VerifierInput) -> String {
        let mut message = input.context.describe();
        message.push_str("\n## Must-haves\n");
        if input.must_haves.is_empty() {
            message.push_str("- The phase goal is achieved\n");
        }
        for truth in &input.must_haves {
            message.push_str(&format!("- {}\n", truth));
        }
        if !input.summaries.is_empty() {
            message.push_str("\n## Plan summaries\n");
            for (plan_id, summary) in &input.summaries {
                message.push_str(&format!("\n### {}\n{}\n", plan_id, summary.trim()));
            }
        }
        if !input.failed_plans.is_empty() {
            message.push_str(&format!(
                "\n## Plans that did not complete\n{}\n",
                input.failed_plans.join(", ")
            ));
        }
        message
    }

    fn parse_output(&self, text: &str) -> Result<VerifierOutput> {
        let mut output: VerifierOutput = parse_json(text)?;
        if output.status == VerificationStatus::GapsFound && output.gaps.is_empty() {
            output
                .gaps
                .push("verifier reported gaps without listing them".to_string());
        }
        Ok(output)
    }
}
