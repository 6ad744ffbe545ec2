//! Phase identity and the artifact store boundary.
//!
//! This module provides:
//! - `PhaseInfo` - the immutable identity of the phase being run
//! - `ArtifactKind` - the whole-document artifacts a run reads and writes
//! - `ArtifactStore` - where those documents live (`FsArtifactStore`, `MemoryArtifactStore`)
//! - `Artifacts` - the cached text loaded at the start of a run
//!
//! The orchestrator never parses artifact contents; it only moves them
//! between the store and stage inputs.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use crate::config::PLANNING_DIR;
use crate::plan::PlanId;

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Turn a human name into a directory-safe slug.
pub fn slugify(name: &str) -> String {
    NON_SLUG
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// The phase being orchestrated. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    /// Phase number (e.g., "03")
    pub number: String,
    /// Human-readable name
    pub name: String,
    /// Directory holding the phase's artifacts, relative to the project root
    pub directory: PathBuf,
    /// What the phase must achieve
    pub goal: String,
}

impl PhaseInfo {
    /// Create a phase stored in the conventional `.planning/phases/<n>-<slug>` directory.
    pub fn new(number: &str, name: &str, goal: &str) -> Self {
        let directory = Path::new(PLANNING_DIR)
            .join("phases")
            .join(format!("{}-{}", number, slugify(name)));
        Self {
            number: number.to_string(),
            name: name.to_string(),
            directory,
            goal: goal.to_string(),
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

impl std::fmt::Display for PhaseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Phase {}: {}", self.number, self.name)
    }
}

/// A whole-document artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Roadmap,
    Requirements,
    State,
    Context,
    Research,
    Verification,
    Plan(PlanId),
    Summary(PlanId),
}

impl ArtifactKind {
    /// Location of the artifact relative to the project root.
    pub fn path(&self, phase: &PhaseInfo) -> PathBuf {
        let planning = Path::new(PLANNING_DIR);
        let dir = &phase.directory;
        match self {
            Self::Roadmap => planning.join("ROADMAP.md"),
            Self::Requirements => planning.join("REQUIREMENTS.md"),
            Self::State => planning.join("STATE.md"),
            Self::Context => dir.join(format!("{}-CONTEXT.md", phase.number)),
            Self::Research => dir.join(format!("{}-RESEARCH.md", phase.number)),
            Self::Verification => dir.join(format!("{}-VERIFICATION.md", phase.number)),
            Self::Plan(id) => dir.join(format!("{}-PLAN.md", id)),
            Self::Summary(id) => dir.join(format!("{}-SUMMARY.md", id)),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Roadmap => write!(f, "roadmap"),
            Self::Requirements => write!(f, "requirements"),
            Self::State => write!(f, "state"),
            Self::Context => write!(f, "context"),
            Self::Research => write!(f, "research"),
            Self::Verification => write!(f, "verification"),
            Self::Plan(id) => write!(f, "plan {}", id),
            Self::Summary(id) => write!(f, "summary {}", id),
        }
    }
}

/// Whole-document storage for phase artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Read an artifact, `None` if it does not exist.
    fn read(&self, phase: &PhaseInfo, kind: &ArtifactKind) -> Result<Option<String>>;

    /// Replace an artifact's contents.
    fn write(&self, phase: &PhaseInfo, kind: &ArtifactKind, content: &str) -> Result<()>;
}

/// Artifacts stored as markdown files under the project directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, phase: &PhaseInfo, kind: &ArtifactKind) -> PathBuf {
        self.root.join(kind.path(phase))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn read(&self, phase: &PhaseInfo, kind: &ArtifactKind) -> Result<Option<String>> {
        let path = self.resolve(phase, kind);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(content))
    }

    fn write(&self, phase: &PhaseInfo, kind: &ArtifactKind, content: &str) -> Result<()> {
        let path = self.resolve(phase, kind);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// In-memory store, keyed by artifact path.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    documents: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact before a run.
    pub fn insert(&self, phase: &PhaseInfo, kind: ArtifactKind, content: &str) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(kind.path(phase), content.to_string());
        }
    }

    pub fn get(&self, phase: &PhaseInfo, kind: &ArtifactKind) -> Option<String> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(&kind.path(phase)).cloned())
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn read(&self, phase: &PhaseInfo, kind: &ArtifactKind) -> Result<Option<String>> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact store lock poisoned"))?;
        Ok(documents.get(&kind.path(phase)).cloned())
    }

    fn write(&self, phase: &PhaseInfo, kind: &ArtifactKind, content: &str) -> Result<()> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact store lock poisoned"))?;
        documents.insert(kind.path(phase), content.to_string());
        Ok(())
    }
}

/// Artifact text cached on the orchestrator state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Artifacts {
    pub roadmap: Option<String>,
    pub requirements: Option<String>,
    pub state: Option<String>,
    pub context: Option<String>,
    pub research: Option<String>,
    pub verification: Option<String>,
}

impl Artifacts {
    /// Read every phase-level artifact from `store`.
    pub fn load(store: &dyn ArtifactStore, phase: &PhaseInfo) -> Result<Self> {
        let read = |kind: ArtifactKind| {
            store
                .read(phase, &kind)
                .with_context(|| format!("Failed to load {}", kind))
        };
        Ok(Self {
            roadmap: read(ArtifactKind::Roadmap)?,
            requirements: read(ArtifactKind::Requirements)?,
            state: read(ArtifactKind::State)?,
            context: read(ArtifactKind::Context)?,
            research: read(ArtifactKind::Research)?,
            verification: read(ArtifactKind::Verification)?,
        })
    }

    /// Project documents joined for inclusion in a stage prompt.
    pub fn project_context(&self) -> String {
        let sections = [
            ("ROADMAP", &self.roadmap),
            ("REQUIREMENTS", &self.requirements),
            ("STATE", &self.state),
            ("CONTEXT", &self.context),
        ];
        sections
            .iter()
            .filter_map(|(title, body)| {
                body.as_ref()
                    .map(|body| format!("<{}>\n{}\n</{}>", title, body.trim(), title))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
