//! Configuration for gsd.
//!
//! Settings are read from `.planning/gsd.toml` and layered as
//! file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [workflow]
//! model_profile = "balanced"
//! parallelization = true
//! max_parallel = 4
//! research_enabled = true
//! plan_checker_enabled = true
//! verification_enabled = true
//! max_planning_iterations = 3
//! max_gap_closure_attempts = 2
//! plan_timeout_secs = 1800
//!
//! [agent]
//! max_iterations = 10
//! max_tokens = 8192
//! api_base = "https://api.anthropic.com"
//!
//! [models]
//! executor = "claude-sonnet-4-0"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::StageKind;

/// Name of the planning directory under the project root.
pub const PLANNING_DIR: &str = ".planning";

/// Name of the config file inside the planning directory.
pub const CONFIG_FILE: &str = "gsd.toml";

/// Trade-off between cost and quality when picking models for each stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    /// Cheapest models everywhere
    Speed,
    /// Strong planner, fast executors (default)
    #[default]
    Balanced,
    /// Strongest model for every stage
    Quality,
}

const FAST_MODEL: &str = "claude-3-5-haiku-latest";
const STANDARD_MODEL: &str = "claude-sonnet-4-0";
const STRONG_MODEL: &str = "claude-opus-4-0";

impl ModelProfile {
    /// Default model for each stage under this profile.
    pub fn models(self) -> StageModels {
        let (research, plan, check, execute, verify) = match self {
            ModelProfile::Speed => (
                FAST_MODEL,
                STANDARD_MODEL,
                FAST_MODEL,
                FAST_MODEL,
                FAST_MODEL,
            ),
            ModelProfile::Balanced => (
                STANDARD_MODEL,
                STRONG_MODEL,
                STANDARD_MODEL,
                STANDARD_MODEL,
                STANDARD_MODEL,
            ),
            ModelProfile::Quality => (
                STRONG_MODEL,
                STRONG_MODEL,
                STRONG_MODEL,
                STRONG_MODEL,
                STRONG_MODEL,
            ),
        };
        StageModels {
            researcher: research.to_string(),
            planner: plan.to_string(),
            plan_checker: check.to_string(),
            executor: execute.to_string(),
            verifier: verify.to_string(),
        }
    }
}

impl std::fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProfile::Speed => write!(f, "speed"),
            ModelProfile::Balanced => write!(f, "balanced"),
            ModelProfile::Quality => write!(f, "quality"),
        }
    }
}

impl std::str::FromStr for ModelProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speed" => Ok(ModelProfile::Speed),
            "balanced" => Ok(ModelProfile::Balanced),
            "quality" => Ok(ModelProfile::Quality),
            _ => anyhow::bail!(
                "Invalid model profile '{}'. Valid values: speed, balanced, quality",
                s
            ),
        }
    }
}

/// Resolved model id per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageModels {
    pub researcher: String,
    pub planner: String,
    pub plan_checker: String,
    pub executor: String,
    pub verifier: String,
}

impl StageModels {
    pub fn for_stage(&self, stage: StageKind) -> &str {
        match stage {
            StageKind::Researcher => &self.researcher,
            StageKind::Planner => &self.planner,
            StageKind::PlanChecker => &self.plan_checker,
            StageKind::Executor => &self.executor,
            StageKind::Verifier => &self.verifier,
        }
    }
}

/// Pipeline toggles and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub model_profile: ModelProfile,
    /// Run plans within a wave concurrently
    #[serde(default = "default_true")]
    pub parallelization: bool,
    /// Upper bound on concurrently running plans when parallelization is on
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_true")]
    pub research_enabled: bool,
    #[serde(default = "default_true")]
    pub plan_checker_enabled: bool,
    #[serde(default = "default_true")]
    pub verification_enabled: bool,
    #[serde(default = "default_max_planning_iterations")]
    pub max_planning_iterations: u32,
    /// How many times verification gaps may send the run back to planning
    #[serde(default = "default_max_gap_closure_attempts")]
    pub max_gap_closure_attempts: u32,
    /// Per-plan executor timeout; unset means no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_planning_iterations() -> u32 {
    3
}

fn default_max_gap_closure_attempts() -> u32 {
    2
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            model_profile: ModelProfile::default(),
            parallelization: true,
            max_parallel: default_max_parallel(),
            research_enabled: true,
            plan_checker_enabled: true,
            verification_enabled: true,
            max_planning_iterations: default_max_planning_iterations(),
            max_gap_closure_attempts: default_max_gap_closure_attempts(),
            plan_timeout_secs: None,
        }
    }
}

impl WorkflowConfig {
    /// Number of plans that may run at once.
    pub fn concurrency(&self) -> usize {
        if self.parallelization {
            self.max_parallel.max(1)
        } else {
            1
        }
    }

    pub fn plan_timeout(&self) -> Option<Duration> {
        self.plan_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for the tool-use conversation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Override the provider base URL (proxies, local gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Timeout for a single provider HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            api_base: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Per-stage model overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub researcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_checker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
}

/// Contents of `.planning/gsd.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GsdToml {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub models: ModelOverrides,
}

impl GsdToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse gsd.toml")
    }

    /// Load configuration from the planning directory.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(planning_dir: &Path) -> Result<Self> {
        let config_path = planning_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize gsd.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Takes a lookup function rather than reading the process environment
    /// directly so callers and tests can supply their own source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(profile) = lookup("GSD_MODEL_PROFILE") {
            self.workflow.model_profile = profile
                .parse()
                .context("Invalid GSD_MODEL_PROFILE")?;
        }
        if let Some(iterations) = lookup("GSD_MAX_ITERATIONS") {
            self.agent.max_iterations = iterations
                .trim()
                .parse()
                .with_context(|| format!("Invalid GSD_MAX_ITERATIONS '{}'", iterations))?;
        }
        if let Some(parallel) = lookup("GSD_PARALLELIZATION") {
            self.workflow.parallelization = parallel != "false" && parallel != "0";
        }
        Ok(())
    }

    /// Model id for every stage: profile defaults, then `[models]` overrides.
    pub fn stage_models(&self) -> StageModels {
        let mut models = self.workflow.model_profile.models();
        let overrides = &self.models;
        let slots = [
            (&overrides.researcher, &mut models.researcher),
            (&overrides.planner, &mut models.planner),
            (&overrides.plan_checker, &mut models.plan_checker),
            (&overrides.executor, &mut models.executor),
            (&overrides.verifier, &mut models.verifier),
        ];
        for (override_model, slot) in slots {
            if let Some(model) = override_model {
                *slot = model.clone();
            }
        }
        models
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.agent.max_iterations == 0 {
            warnings.push("agent.max_iterations is 0: every stage will fail immediately".to_string());
        }
        if self.workflow.max_planning_iterations == 0 {
            warnings.push(
                "workflow.max_planning_iterations is 0: planning will always be inconclusive"
                    .to_string(),
            );
        }
        if self.workflow.parallelization && self.workflow.max_parallel == 0 {
            warnings.push("workflow.max_parallel is 0: treating it as 1".to_string());
        }
        if self.workflow.plan_timeout_secs == Some(0) {
            warnings.push("workflow.plan_timeout_secs is 0: every plan will time out".to_string());
        }
        if !self.workflow.plan_checker_enabled && !self.workflow.verification_enabled {
            warnings.push(
                "Both plan checking and verification are disabled: nothing reviews executor output"
                    .to_string(),
            );
        }
        if let Some(ref base) = self.agent.api_base
            && !(base.starts_with("http://") || base.starts_with("https://"))
        {
            warnings.push(format!("agent.api_base '{}' is not an http(s) URL", base));
        }

        warnings
    }
}

/// Overrides taken from command line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model_profile: Option<ModelProfile>,
    pub max_iterations: Option<u32>,
    pub max_parallel: Option<usize>,
    /// Force sequential execution within each wave
    pub sequential: bool,
    pub skip_research: bool,
}

/// Effective configuration for one project.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub planning_dir: PathBuf,
    pub toml: GsdToml,
}

impl Config {
    /// Load `gsd.toml` for `project_dir` and layer environment and CLI
    /// overrides on top.
    pub fn load(project_dir: PathBuf, cli: &CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let planning_dir = project_dir.join(PLANNING_DIR);
        let mut toml = GsdToml::load_or_default(&planning_dir)?;
        toml.apply_env_from(|key| std::env::var(key).ok())?;

        let mut config = Self {
            project_dir,
            planning_dir,
            toml,
        };
        config.apply_cli(cli);
        Ok(config)
    }

    /// Configuration with defaults only, for embedding and tests.
    pub fn with_defaults(project_dir: PathBuf) -> Self {
        let planning_dir = project_dir.join(PLANNING_DIR);
        Self {
            project_dir,
            planning_dir,
            toml: GsdToml::default(),
        }
    }

    fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(profile) = cli.model_profile {
            self.toml.workflow.model_profile = profile;
        }
        if let Some(iterations) = cli.max_iterations {
            self.toml.agent.max_iterations = iterations;
        }
        if let Some(parallel) = cli.max_parallel {
            self.toml.workflow.max_parallel = parallel;
        }
        if cli.sequential {
            self.toml.workflow.parallelization = false;
        }
        if cli.skip_research {
            self.toml.workflow.research_enabled = false;
        }
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.toml.workflow
    }

    pub fn stage_models(&self) -> StageModels {
        self.toml.stage_models()
    }

    /// Get path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.planning_dir.join(CONFIG_FILE)
    }

    /// Get path to the log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.planning_dir.join("logs")
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
