//! Stage contracts for the five pipeline roles.
//!
//! Each stage is a small `Stage` implementation: a model id, two prompt
//! builders and a parser. Stages never touch the filesystem themselves;
//! the orchestrator passes artifact text in and writes results back.

pub mod checker;
pub mod executor;
pub mod parse;
pub mod planner;
pub mod researcher;
pub mod verifier;

pub use checker::{CheckStatus, CheckerInput, CheckerOutput, PlanChecker};
pub use executor::{Executor, ExecutorInput, ExecutorOutput, ResumeContext};
pub use planner::{Planner, PlannerInput, PlannerOutput, PlannerStatus, PlanningMode};
pub use researcher::{ResearchOutput, Researcher};
pub use verifier::{VerificationStatus, Verifier, VerifierInput, VerifierOutput};

use crate::config::StageModels;
use crate::phase::{Artifacts, PhaseInfo};

/// The phase plus the project documents cached for it.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub phase: PhaseInfo,
    pub artifacts: Artifacts,
}

impl PhaseContext {
    pub fn new(phase: PhaseInfo, artifacts: Artifacts) -> Self {
        Self { phase, artifacts }
    }

    /// Phase header followed by every available project document.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "# {}\n\nGoal: {}\nDirectory: {}\n",
            self.phase,
            self.phase.goal,
            self.phase.directory.display()
        );
        let documents = self.artifacts.project_context();
        if !documents.is_empty() {
            out.push('\n');
            out.push_str(&documents);
            out.push('\n');
        }
        if let Some(ref research) = self.artifacts.research {
            out.push_str(&format!("\n<RESEARCH>\n{}\n</RESEARCH>\n", research.trim()));
        }
        out
    }
}

/// One instance of every stage, bound to its model.
pub struct StageSet {
    pub researcher: Researcher,
    pub planner: Planner,
    pub checker: PlanChecker,
    pub executor: Executor,
    pub verifier: Verifier,
}

impl StageSet {
    pub fn from_models(models: &StageModels) -> Self {
        Self {
            researcher: Researcher::new(&models.researcher),
            planner: Planner::new(&models.planner),
            checker: PlanChecker::new(&models.plan_checker),
            executor: Executor::new(&models.executor),
            verifier: Verifier::new(&models.verifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Stage;
    use crate::config::ModelProfile;

    #[test]
    fn test_stage_set_uses_profile_models() {
        let models = ModelProfile::Quality.models();
        let stages = StageSet::from_models(&models);
        assert_eq!(stages.planner.model(), models.planner);
        assert_eq!(stages.executor.model(), models.executor);
    }

    #[test]
    fn test_describe_includes_documents() {
        let phase = PhaseInfo::new("02", "Auth", "Users log in");
        let artifacts = Artifacts {
            requirements: Some("REQ-1".into()),
            research: Some("Use argon2".into()),
            ..Default::default()
        };
        let text = PhaseContext::new(phase, artifacts).describe();
        assert!(text.starts_with("# Phase 02: Auth"));
        assert!(text.contains("Goal: Users log in"));
        assert!(text.contains("<REQUIREMENTS>\nREQ-1\n</REQUIREMENTS>"));
        assert!(text.contains("<RESEARCH>\nUse argon2\n</RESEARCH>"));
    }
}
