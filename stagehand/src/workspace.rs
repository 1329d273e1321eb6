//! Per-task host workspace layout and lifecycle.
//!
//! Each staging task owns a directory under the configured base directory,
//! named after the task id and created with owner-only permissions. All
//! host-side artifacts of a run live inside it:
//!
//! ```text
//! <base_dir>/<task-id>/
//!   app.zip            downloaded application archive
//!   plugin_config      JSON handed to the build plugin
//!   platform_config    JSON describing platform-provided paths
//!   staging_task.log   plugin output copied back from the container
//!   staged/droplet.tgz packed droplet copied back from the container
//! ```

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::StagingError;

/// The host-side working directory of a single staging task.
#[derive(Debug, Clone)]
pub struct StagingWorkspace {
    root: PathBuf,
}

impl StagingWorkspace {
    /// Creates a workspace rooted at `<base_dir>/<task_id>`.
    ///
    /// Nothing touches the filesystem until [`StagingWorkspace::ensure_root`].
    #[must_use]
    pub fn new(base_dir: &Path, task_id: &str) -> Self {
        Self {
            root: base_dir.join(task_id),
        }
    }

    /// The workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the downloaded application archive.
    #[must_use]
    pub fn downloaded_app_path(&self) -> PathBuf {
        self.root.join("app.zip")
    }

    /// Path of the JSON configuration handed to the build plugin.
    #[must_use]
    pub fn plugin_config_path(&self) -> PathBuf {
        self.root.join("plugin_config")
    }

    /// Path of the JSON file describing platform-provided paths.
    #[must_use]
    pub fn platform_config_path(&self) -> PathBuf {
        self.root.join("platform_config")
    }

    /// Path the staging log is copied to on the host.
    #[must_use]
    pub fn staging_log_path(&self) -> PathBuf {
        self.root.join("staging_task.log")
    }

    /// Directory the packed droplet is copied into on the host.
    #[must_use]
    pub fn staged_droplet_dir(&self) -> PathBuf {
        self.root.join("staged")
    }

    /// Path of the packed droplet on the host.
    #[must_use]
    pub fn staged_droplet_path(&self) -> PathBuf {
        self.root.join("staged").join("droplet.tgz")
    }

    /// Creates the workspace root with owner-only permissions.
    ///
    /// Idempotent: an existing root is left as is.
    pub fn ensure_root(&self) -> Result<(), StagingError> {
        if self.root.is_dir() {
            return Ok(());
        }
        if let Some(parent) = self.root.parent() {
            std::fs::create_dir_all(parent)?;
        }
        create_private_dir(&self.root)?;
        Ok(())
    }

    /// Removes the workspace and everything in it.
    ///
    /// An already-missing root counts as success, so teardown can run on
    /// every exit path without tracking whether setup got far enough to
    /// create anything.
    pub fn destroy(&self) -> Result<(), StagingError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir(path)
}

/// Destroys the workspace when dropped.
///
/// Held across the completion hook so the workspace comes down even if the
/// hook panics. Failures are logged rather than raised since drop has
/// nowhere to report them.
pub(crate) struct TeardownGuard {
    workspace: StagingWorkspace,
}

impl TeardownGuard {
    pub(crate) fn new(workspace: StagingWorkspace) -> Self {
        Self { workspace }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Err(error) = self.workspace.destroy() {
            warn!(
                workspace = %self.workspace.root().display(),
                %error,
                "failed to remove staging workspace"
            );
        }
    }
}
