//! # Stagehand
//!
//! Staging task orchestration: turn a raw application bundle into a
//! deployable droplet inside an isolated container sandbox.
//!
//! A [`staging::StagingTask`] owns one workspace and one container for its
//! lifetime and drives the full pipeline:
//!
//! - **Setup**: download the application archive and create the container
//!   concurrently, then resolve the container's filesystem root.
//! - **Execution**: unpack, run the build plugin, pack the droplet, copy it
//!   out, upload it, destroy the container. Steps run strictly in order
//!   and the first failure stops the pipeline.
//!
//! Whatever happens, the workspace is torn down and the registered
//! lifecycle hooks fire exactly once each.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagehand::prelude::*;
//!
//! let mut task = StagingTask::new(config, attributes, runtime, transport)?;
//! task.on_after_setup(|error| release_admission_slot(error));
//! task.on_completion(|error| notify_controller(error));
//!
//! let outcome = task.start().await;
//! outcome.into_result()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod container;
pub mod directory;
pub mod errors;
pub mod promise;
pub mod sandbox;
pub mod staging;
pub mod testing;
pub mod transport;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DirectoryServerConfig, StagingConfig};
    pub use crate::container::{
        BindMount, BindMountMode, CommandOutcome, ContainerHandle, ContainerInfo,
        ContainerRuntime,
    };
    pub use crate::directory::DirectoryServer;
    pub use crate::errors::StagingError;
    pub use crate::promise::Promise;
    pub use crate::staging::{
        StagingAttributes, StagingEnvironment, StagingOutcome, StagingProperties, StagingTask,
    };
    pub use crate::transport::{ArchiveTransport, HttpTransport};
    pub use crate::workspace::StagingWorkspace;
}
