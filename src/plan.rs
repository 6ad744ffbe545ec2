//! Plan-level domain types.
//!
//! This module provides:
//! - `Plan` - an executable unit of work with declared dependencies
//! - `PlanIssue` - a finding from the plan checker
//! - `Checkpoint` / `Resolution` - a pause point awaiting a human and its answer
//! - `ExecutionResult` - the per-plan outcome recorded by the coordinator
//! - YAML frontmatter parsing for plan markdown

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Plan identifier, e.g. "03-01".
pub type PlanId = String;

fn default_autonomous() -> bool {
    true
}

/// An executable plan produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id
    pub id: PlanId,
    /// Plans that must reach a terminal status before this one starts
    #[serde(default)]
    pub depends_on: Vec<PlanId>,
    /// Wave assigned by the scheduler; never taken from the author
    #[serde(default, skip_deserializing)]
    pub wave: Option<usize>,
    /// Plan body (markdown)
    #[serde(default)]
    pub content: String,
    /// Whether the plan can run without a human in the loop. Scheduling
    /// ignores it; a non-autonomous plan's executor is told to stop at
    /// checkpoint tasks.
    #[serde(default = "default_autonomous")]
    pub autonomous: bool,
    /// Files the plan expects to touch
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Observable truths the verifier checks after execution
    #[serde(default)]
    pub must_haves: Vec<String>,
}

impl Plan {
    /// Create an autonomous plan with no content.
    pub fn new(id: &str, depends_on: Vec<PlanId>) -> Self {
        Self {
            id: id.to_string(),
            depends_on,
            wave: None,
            content: String::new(),
            autonomous: true,
            files_modified: Vec::new(),
            must_haves: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Mark the plan as requiring human attendance.
    pub fn attended(mut self) -> Self {
        self.autonomous = false;
        self
    }

    /// Build a plan from markdown, taking metadata from its frontmatter.
    pub fn from_markdown(id: &str, markdown: &str) -> Result<Self> {
        let frontmatter = PlanFrontmatter::parse(markdown)
            .with_context(|| format!("Invalid frontmatter in plan {}", id))?
            .unwrap_or_default();
        Ok(Self {
            id: id.to_string(),
            depends_on: frontmatter.depends_on,
            wave: None,
            content: markdown.to_string(),
            autonomous: frontmatter.autonomous.unwrap_or(true),
            files_modified: frontmatter.files_modified,
            must_haves: frontmatter.must_haves.truths,
        })
    }

    /// File name used when the plan is written to the phase directory.
    pub fn file_name(&self) -> String {
        format!("{}-PLAN.md", self.id)
    }
}

/// Metadata block at the top of a plan document.
///
/// ```text
/// ---
/// depends_on: ["03-01"]
/// autonomous: false
/// files_modified: [src/auth.rs]
/// must_haves:
///   truths:
///     - "User can log in"
/// ---
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlanFrontmatter {
    #[serde(default)]
    pub depends_on: Vec<PlanId>,
    #[serde(default)]
    pub autonomous: Option<bool>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Author-declared wave; parsed for compatibility and otherwise ignored
    #[serde(default)]
    pub wave: Option<i64>,
    #[serde(default)]
    pub must_haves: MustHaves,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MustHaves {
    #[serde(default)]
    pub truths: Vec<String>,
}

impl PlanFrontmatter {
    /// Parse the frontmatter of `markdown`, or `None` if it has none.
    pub fn parse(markdown: &str) -> Result<Option<Self>> {
        let Some(block) = frontmatter_block(markdown) else {
            return Ok(None);
        };
        let parsed = serde_yaml::from_str(block).context("Failed to parse plan frontmatter")?;
        Ok(Some(parsed))
    }
}

fn frontmatter_block(markdown: &str) -> Option<&str> {
    let rest = markdown
        .strip_prefix("---\n")
        .or_else(|| markdown.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

/// Severity of a checker finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Prevents the plan set from being accepted
    Blocker,
    /// Advisory only
    Warning,
    /// Advisory only
    Info,
}

/// The dimension a checker finding concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueDimension {
    Completeness,
    Compliance,
    Dependencies,
    #[serde(other)]
    Other,
}

/// A finding produced by the plan checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub plan_id: PlanId,
    pub severity: IssueSeverity,
    pub dimension: IssueDimension,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl PlanIssue {
    pub fn blocker(plan_id: &str, dimension: IssueDimension, description: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            severity: IssueSeverity::Blocker,
            dimension,
            description: description.to_string(),
            task: None,
            fix_hint: None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == IssueSeverity::Blocker
    }
}

/// What a paused plan is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointKind {
    /// A human must look at what was built
    HumanVerify,
    /// A human must choose between options
    Decision,
    /// A human must perform a manual step
    HumanAction,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HumanVerify => write!(f, "human-verify"),
            Self::Decision => write!(f, "decision"),
            Self::HumanAction => write!(f, "human-action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A pause point inside a plan's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Filled in from the executing plan when the model omits it
    #[serde(default)]
    pub plan_id: PlanId,
    #[serde(default)]
    pub task_number: u32,
    #[serde(rename = "type", alias = "kind")]
    pub kind: CheckpointKind,
    pub description: String,
    /// What exactly the human is expected to provide
    #[serde(default)]
    pub awaiting: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CheckpointOption>,
}

/// The human answer that resumes a paused plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Selected option id for decision checkpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    /// Free-form response
    #[serde(default)]
    pub note: String,
}

impl Resolution {
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            choice: None,
            note: note.into(),
        }
    }

    pub fn choice(choice: impl Into<String>) -> Self {
        Self {
            choice: Some(choice.into()),
            note: String::new(),
        }
    }
}

/// Outcome of one plan execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Complete,
    Paused,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: String,
}

/// Per-plan result recorded by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: PlanId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub deviations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn complete(plan_id: &str, summary: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: ExecutionStatus::Complete,
            summary: summary.into(),
            commits: Vec::new(),
            deviations: Vec::new(),
            checkpoint: None,
            error: None,
        }
    }

    pub fn failed(plan_id: &str, error: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: ExecutionStatus::Failed,
            summary: String::new(),
            commits: Vec::new(),
            deviations: Vec::new(),
            checkpoint: None,
            error: Some(error.into()),
        }
    }

    /// Result recorded for a plan that never ran because a dependency failed.
    pub fn skipped(plan_id: &str, failed_dependency: &str) -> Self {
        Self::failed(
            plan_id,
            format!("skipped: dependency {} failed", failed_dependency),
        )
    }

    pub fn paused(plan_id: &str, checkpoint: Checkpoint) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: ExecutionStatus::Paused,
            summary: String::new(),
            commits: Vec::new(),
            deviations: Vec::new(),
            checkpoint: Some(checkpoint),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_deserialize_ignores_author_wave() {
        let json = r#"{"id": "01-02", "depends_on": ["01-01"], "wave": 7}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.wave, None);
        assert!(plan.autonomous);
        assert_eq!(plan.depends_on, vec!["01-01"]);
    }

    #[test]
    fn test_plan_from_markdown_reads_frontmatter() {
        let markdown = "---\nwave: 3\ndepends_on: [\"01-01\", \"01-02\"]\nautonomous: false\nfiles_modified: [src/lib.rs]\nmust_haves:\n  truths:\n    - \"User can log in\"\n---\n\n<objective>Auth</objective>\n";
        let plan = Plan::from_markdown("01-03", markdown).unwrap();
        assert_eq!(plan.depends_on, vec!["01-01", "01-02"]);
        assert!(!plan.autonomous);
        assert_eq!(plan.files_modified, vec!["src/lib.rs"]);
        assert_eq!(plan.must_haves, vec!["User can log in"]);
        assert_eq!(plan.wave, None);
        assert_eq!(plan.content, markdown);
    }

    #[test]
    fn test_plan_from_markdown_without_frontmatter() {
        let plan = Plan::from_markdown("01-01", "# Just a body").unwrap();
        assert!(plan.depends_on.is_empty());
        assert!(plan.autonomous);
    }

    #[test]
    fn test_plan_from_markdown_rejects_bad_yaml() {
        let result = Plan::from_markdown("01-01", "---\ndepends_on: [unclosed\n---\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("01-01"));
    }

    #[test]
    fn test_issue_blocking() {
        let issue = PlanIssue::blocker("01-01", IssueDimension::Dependencies, "missing dep");
        assert!(issue.is_blocking());

        let json = r#"{"plan_id":"01-01","severity":"warning","dimension":"scope","description":"big"}"#;
        let warning: PlanIssue = serde_json::from_str(json).unwrap();
        assert!(!warning.is_blocking());
        assert_eq!(warning.dimension, IssueDimension::Other);
    }

    #[test]
    fn test_checkpoint_kind_wire_names() {
        let json = r#"{"type":"human-verify","description":"Check the login page"}"#;
        let checkpoint: Checkpoint = serde_json::from_str(json).unwrap();
        assert_eq!(checkpoint.kind, CheckpointKind::HumanVerify);
        assert!(checkpoint.plan_id.is_empty());
        assert_eq!(checkpoint.kind.to_string(), "human-verify");
    }

    #[test]
    fn test_skipped_result_names_dependency() {
        let result = ExecutionResult::skipped("01-03", "01-01");
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().contains("01-01"));
    }
}
