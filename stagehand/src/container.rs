//! Container runtime interface.
//!
//! The staging task drives an external container runtime through
//! [`ContainerRuntime`]; the crate ships no runtime of its own. Production
//! embedders implement the trait over their runtime's client;
//! [`crate::testing::FakeContainerRuntime`] implements it for tests.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StagingError;

/// Opaque identifier for a container issued by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Wraps a runtime-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a bind mount is writable from inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMountMode {
    /// The container can read but not write the mount.
    ReadOnly,
    /// The container can read and write the mount.
    ReadWrite,
}

/// A host directory made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host path of the directory.
    pub source: PathBuf,
    /// Path the directory appears at inside the container.
    pub target: PathBuf,
    /// Mount mode.
    pub mode: BindMountMode,
}

impl BindMount {
    /// Creates a read-only bind mount.
    #[must_use]
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode: BindMountMode::ReadOnly,
        }
    }

    /// Creates a read-write bind mount.
    #[must_use]
    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode: BindMountMode::ReadWrite,
        }
    }

    /// Returns `true` for read-only mounts.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == BindMountMode::ReadOnly
    }
}

/// Runtime-reported details of a created container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Host path of the container's filesystem root, when the runtime
    /// exposes one.
    pub container_root_path: Option<PathBuf>,
    /// Host-reachable IP of the container, when the runtime exposes one.
    pub host_ip: Option<String>,
    /// Any further runtime-specific details, passed through untouched.
    pub extra: HashMap<String, String>,
}

impl ContainerInfo {
    /// Creates empty container info.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the container filesystem root path.
    #[must_use]
    pub fn with_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.container_root_path = Some(path.into());
        self
    }

    /// Sets the container host IP.
    #[must_use]
    pub fn with_host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = Some(ip.into());
        self
    }
}

/// Result of running a script inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit status of the script.
    pub exit_status: u32,
    /// Tail of captured stdout, when the runtime provides it.
    pub stdout: Option<String>,
    /// Tail of captured stderr, when the runtime provides it.
    pub stderr: Option<String>,
}

impl CommandOutcome {
    /// Creates an outcome with the given exit status and no output.
    #[must_use]
    pub fn new(exit_status: u32) -> Self {
        Self {
            exit_status,
            stdout: None,
            stderr: None,
        }
    }

    /// Attaches a stdout tail.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Attaches a stderr tail.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Returns `true` when the script exited with status zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Interface to an external container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a container with the given bind mounts and returns its handle.
    async fn create(&self, bind_mounts: &[BindMount]) -> Result<ContainerHandle, StagingError>;

    /// Runs a shell script inside the container and reports its outcome.
    ///
    /// A non-zero exit status is an `Ok` outcome here; interpreting it is
    /// the caller's business.
    async fn run_command(
        &self,
        handle: &ContainerHandle,
        script: &str,
    ) -> Result<CommandOutcome, StagingError>;

    /// Copies a file out of the container to a host destination path.
    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        container_path: &Path,
        host_dest: &Path,
    ) -> Result<(), StagingError>;

    /// Queries runtime-reported details of the container.
    async fn info(&self, handle: &ContainerHandle) -> Result<ContainerInfo, StagingError>;

    /// Destroys the container and releases its resources.
    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), StagingError>;
}
