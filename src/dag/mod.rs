//! Wave scheduling for plan execution.
//!
//! Plans declare the plans they depend on; the scheduler layers them into
//! waves so that every plan in a wave is independent of the others and can
//! run concurrently.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs a plan graph, validating ids, dependencies and acyclicity
//! 2. **Scheduler** - Assigns waves and tracks per-plan status, propagating failures
//! 3. **State** - Summarizes an execution
//!
//! ## Example
//!
//! ```
//! use gsd::dag::WaveScheduler;
//! use gsd::plan::Plan;
//!
//! let plans = vec![
//!     Plan::new("01-01", vec![]),
//!     Plan::new("01-02", vec![]),
//!     Plan::new("01-03", vec!["01-01".to_string(), "01-02".to_string()]),
//! ];
//!
//! let waves = WaveScheduler::schedule(&plans).unwrap();
//! // Wave 0: [01-01, 01-02] - no dependencies
//! // Wave 1: [01-03] - depends on both
//! assert_eq!(waves[&0], vec!["01-01", "01-02"]);
//! assert_eq!(waves[&1], vec!["01-03"]);
//! ```

mod builder;
mod scheduler;
mod state;

pub use builder::{DagBuilder, PlanGraph, PlanIndex};
pub use scheduler::{PlanNode, PlanStatus, ScheduleMerge, WaveMap, WaveScheduler};
pub use state::{ExecutionSummary, ExecutionTimer};
