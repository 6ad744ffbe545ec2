//! Autonomous phase orchestration.
//!
//! A phase is researched, planned (with a plan checker in the loop),
//! executed as dependency-ordered waves of plans, and verified against its
//! goal. Every model call goes through [`agent::AgentRunner`].

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod planning;
pub mod stages;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;
