//! Tools the model can invoke, and the registry `AgentRunner` looks them up in.
//!
//! The built-in set mirrors what an executor needs to do real work:
//! `read_file`, `write_file` and `bash`, all rooted at the project directory.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::provider::ToolDefinition;

/// A side-effecting capability exposed to the model.
///
/// Returning `Err` is fine: the runner turns it into `"Error: <message>"`
/// text for the model rather than failing the stage.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, input: Value) -> Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Name → tool lookup with a stable catalog order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `read_file`, `write_file` and `bash` rooted at `root`.
    pub fn with_builtin(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut registry = Self::new();
        registry.register(ReadFileTool::new(root.clone()));
        registry.register(WriteFileTool::new(root.clone()));
        registry.register(BashTool::new(root));
        registry
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions sent to the provider, sorted by name.
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Resolve a model-supplied path inside `root`, refusing to escape it.
fn resolve_in_root(root: &Path, path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let relative = if candidate.is_absolute() {
        candidate
            .strip_prefix(root)
            .with_context(|| format!("Path {} is outside the project directory", path))?
    } else {
        candidate
    };
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        bail!("Path {} is outside the project directory", path);
    }
    Ok(root.join(relative))
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's contents. Paths are relative to the project directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File to read" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let args: PathArgs =
            serde_json::from_value(input).context("read_file expects {\"path\": string}")?;
        let path = resolve_in_root(&self.root, &args.path)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", args.path))
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories. Paths are relative to the project directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to write" },
                "content": { "type": "string", "description": "Full file contents" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let args: WriteArgs = serde_json::from_value(input)
            .context("write_file expects {\"path\": string, \"content\": string}")?;
        let path = resolve_in_root(&self.root, &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", args.path))?;
        }
        tokio::fs::write(&path, &args.content)
            .await
            .with_context(|| format!("Failed to write {}", args.path))?;
        Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
    }
}

pub struct BashTool {
    root: PathBuf,
    timeout: Duration,
}

impl BashTool {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory and return stdout and stderr."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string", "description": "Command to run" } },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let args: BashArgs =
            serde_json::from_value(input).context("bash expects {\"command\": string}")?;
        tracing::debug!(command = %args.command, "Running bash tool");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("Command timed out after {:?}", self.timeout))?
            .context("Failed to spawn sh")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.into_owned();
        if !stderr.is_empty() {
            text.push_str("\nSTDERR:\n");
            text.push_str(&stderr);
        }

        if !output.status.success() {
            bail!("Command exited with {}: {}", output.status, text);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_registry_catalog_sorted() {
        let registry = ToolRegistry::with_builtin("/tmp");
        assert_eq!(registry.names(), vec!["bash", "read_file", "write_file"]);
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[1].name, "read_file");
        assert_eq!(catalog[1].input_schema["required"][0], "path");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_resolve_in_root_rejects_escape() {
        let root = Path::new("/project");
        assert!(resolve_in_root(root, "../etc/passwd").is_err());
        assert!(resolve_in_root(root, "/etc/passwd").is_err());
        assert_eq!(
            resolve_in_root(root, "/project/src/lib.rs").unwrap(),
            PathBuf::from("/project/src/lib.rs")
        );
        assert_eq!(
            resolve_in_root(root, "src/lib.rs").unwrap(),
            PathBuf::from("/project/src/lib.rs")
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let write = WriteFileTool::new(dir.path().to_path_buf());
        let read = ReadFileTool::new(dir.path().to_path_buf());

        let out = write
            .execute(json!({"path": "nested/a.txt", "content": "hello"}))
            .await
            .unwrap();
        assert!(out.contains("5 bytes"));

        let content = read.execute(json!({"path": "nested/a.txt"})).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let dir = tempdir().unwrap();
        let read = ReadFileTool::new(dir.path().to_path_buf());
        let err = read.execute(json!({"path": "nope.txt"})).await.unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[tokio::test]
    async fn test_bad_arguments_error() {
        let read = ReadFileTool::new(PathBuf::from("/tmp"));
        assert!(read.execute(json!({"file": 1})).await.is_err());
    }

    #[tokio::test]
    async fn test_bash_captures_stderr() {
        let dir = tempdir().unwrap();
        let bash = BashTool::new(dir.path().to_path_buf());
        let out = bash
            .execute(json!({"command": "echo out; echo err 1>&2"}))
            .await
            .unwrap();
        assert_eq!(out, "out\n\nSTDERR:\nerr\n");
    }

    #[tokio::test]
    async fn test_bash_nonzero_exit_is_error() {
        let dir = tempdir().unwrap();
        let bash = BashTool::new(dir.path().to_path_buf());
        let err = bash.execute(json!({"command": "exit 3"})).await.unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let dir = tempdir().unwrap();
        let bash =
            BashTool::new(dir.path().to_path_buf()).with_timeout(Duration::from_millis(50));
        let err = bash.execute(json!({"command": "sleep 5"})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
