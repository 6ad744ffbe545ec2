//! Execution summary for a wave schedule.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::dag::scheduler::{PlanStatus, WaveScheduler};

/// Summary of plan execution results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Total plans in the schedule
    pub total_plans: usize,
    /// Total waves in the schedule
    pub total_waves: usize,
    /// Plans that completed successfully
    pub completed: usize,
    /// Plans whose executor failed
    pub failed: usize,
    /// Plans skipped because a dependency failed
    pub skipped: usize,
    /// Plans waiting on a checkpoint
    pub paused: usize,
    /// Total execution time in milliseconds
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExecutionSummary {
    /// Count plan statuses in `scheduler`.
    pub fn from_scheduler(scheduler: &WaveScheduler, duration: Duration) -> Self {
        let mut summary = Self {
            total_plans: scheduler.plan_count(),
            total_waves: scheduler.total_waves(),
            duration,
            ..Default::default()
        };
        for node in scheduler.nodes() {
            match node.status {
                PlanStatus::Completed => summary.completed += 1,
                PlanStatus::Failed { .. } => summary.failed += 1,
                PlanStatus::Skipped { .. } => summary.skipped += 1,
                PlanStatus::Paused => summary.paused += 1,
                PlanStatus::Pending | PlanStatus::Running => {}
            }
        }
        summary
    }

    /// Check if all plans completed successfully.
    pub fn all_success(&self) -> bool {
        self.completed == self.total_plans
    }

    /// Get completion percentage.
    pub fn completion_percentage(&self) -> f64 {
        if self.total_plans == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total_plans as f64) * 100.0
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
