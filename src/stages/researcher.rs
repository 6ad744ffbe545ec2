//! Researcher stage: gathers what the planner needs to know.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::parse::parse_json;
use super::PhaseContext;
use crate::agent::{Stage, StageKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutput {
    /// Document written to `<phase>-RESEARCH.md`
    pub research_content: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_reason: Option<String>,
}

pub struct Researcher {
    model: String,
}

impl Researcher {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Stage for Researcher {
    type Input = PhaseContext;
    type Output = ResearchOutput;

    fn kind(&self) -> StageKind {
        StageKind::Researcher
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_preamble(&self, _input: &PhaseContext) -> String {
        "You are a phase researcher. Investigate the codebase and the project documents \
         to find out how the phase goal should be implemented: the stack in use, existing \
         patterns to follow, pitfalls, and open questions. Use the tools to read files and \
         run read-only commands. Do not modify the project.\n\n\
         When done, answer with a single JSON object in a ```json block:\n\
         {\"research_content\": \"<markdown research document>\", \"blocked\": false, \
         \"blocker_reason\": null}\n\
         Set \"blocked\" to true only if the phase cannot be planned without a human \
         decision, and explain why in \"blocker_reason\"."
            .to_string()
    }

    fn user_message(&self, input: &PhaseContext) -> String {
        input.describe()
    }

    fn parse_output(&self, text: &str) -> Result<ResearchOutput> {
        let output: ResearchOutput = parse_json(text)?;
        if output.blocked && output.blocker_reason.is_none() {
            return Ok(ResearchOutput {
                blocker_reason: Some("researcher reported blocked without a reason".into()),
                ..output
            });
        }
        Ok(output)
    }
}
