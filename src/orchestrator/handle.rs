//! External control of a running phase: resume checkpoints, cancel, observe.

use anyhow::{Result, anyhow};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use super::state::ExecutionSnapshot;
use crate::errors::OrchestratorError;
use crate::plan::{PlanId, Resolution};

/// A request from outside the run.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorCommand {
    /// Answer the open checkpoint of a paused plan.
    Resume {
        plan_id: PlanId,
        resolution: Resolution,
    },
    /// Abort the run, cancelling every outstanding plan.
    Cancel,
}

/// Caller side. Cheap to clone; dropping every handle tells the run that
/// no more resolutions will arrive.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    snapshots: watch::Receiver<ExecutionSnapshot>,
}

impl OrchestratorHandle {
    /// Create a connected handle and control pair.
    pub fn new() -> (Self, OrchestratorControl) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(ExecutionSnapshot::default());
        (
            Self {
                commands: commands_tx,
                snapshots: snapshots_rx,
            },
            OrchestratorControl {
                commands: commands_rx,
                snapshots: snapshots_tx,
                open: true,
            },
        )
    }

    pub fn resume(&self, plan_id: &str, resolution: Resolution) -> Result<()> {
        self.send(OrchestratorCommand::Resume {
            plan_id: plan_id.to_string(),
            resolution,
        })
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(OrchestratorCommand::Cancel)
    }

    fn send(&self, command: OrchestratorCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Orchestrator is no longer running"))
    }

    /// Latest published execution snapshot.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionSnapshot> {
        self.snapshots.clone()
    }
}

/// Run side: receives commands and publishes snapshots.
#[derive(Debug)]
pub struct OrchestratorControl {
    commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
    snapshots: watch::Sender<ExecutionSnapshot>,
    open: bool,
}

impl OrchestratorControl {
    /// Control for a run nobody can talk to. Checkpoints end such a run
    /// as blocked.
    pub fn detached() -> Self {
        let (handle, control) = OrchestratorHandle::new();
        drop(handle);
        control
    }

    /// Whether commands may still arrive.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Next command; `None` once every handle is gone.
    pub async fn recv(&mut self) -> Option<OrchestratorCommand> {
        if !self.open {
            return None;
        }
        let command = self.commands.recv().await;
        if command.is_none() {
            self.open = false;
        }
        command
    }

    pub fn publish(&self, snapshot: ExecutionSnapshot) {
        self.snapshots.send_replace(snapshot);
    }

    /// Await `fut`, aborting with `Cancelled` if a cancel arrives first.
    /// A cancel already queued wins over a future that is ready.
    ///
    /// Resumes arriving outside wave execution have no checkpoint to
    /// answer and are dropped.
    pub async fn guard<T>(
        &mut self,
        fut: impl Future<Output = T>,
    ) -> Result<T, OrchestratorError> {
        tokio::pin!(fut);
        loop {
            if !self.open {
                return Ok(fut.await);
            }
            tokio::select! {
                biased;
                command = self.recv() => match command {
                    Some(OrchestratorCommand::Cancel) => return Err(OrchestratorError::Cancelled),
                    Some(OrchestratorCommand::Resume { plan_id, .. }) => {
                        warn!(plan = %plan_id, "Ignoring resume: no plan is executing");
                    }
                    None => {}
                },
                out = &mut fut => return Ok(out),
            }
        }
    }
}
