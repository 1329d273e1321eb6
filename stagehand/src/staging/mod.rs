//! Staging task orchestration.
//!
//! This module provides:
//! - Immutable attributes describing what a task stages
//! - Staging environment and build script assembly
//! - The task orchestrator itself and its outcome type

mod attributes;
mod environment;
mod outcome;
mod task;

pub use attributes::{StagingAttributes, StagingProperties};
pub use environment::StagingEnvironment;
pub use outcome::StagingOutcome;
pub use task::StagingTask;
