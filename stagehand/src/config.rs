//! Configuration types for staging tasks.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::container::BindMount;
use crate::errors::StagingError;

/// Configuration for a staging task.
///
/// Everything a task needs is named here explicitly; nothing is discovered
/// at runtime. In particular [`StagingConfig::plugin_path`] must point at
/// the build plugin executable directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Host directory under which per-task workspaces are created.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Absolute path of the build plugin executable.
    ///
    /// The plugin must be reachable inside the container, which in practice
    /// means it lives under [`StagingConfig::agent_dir`].
    #[serde(default)]
    pub plugin_path: PathBuf,
    /// Host directory holding shared staging assets (`bin/`, `lib/`,
    /// `include/`), mounted read-only into the container.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    /// Host directory holding the agent installation, mounted read-only
    /// into the container so the plugin executable is visible there.
    #[serde(default = "default_agent_dir")]
    pub agent_dir: PathBuf,
    /// Seconds the plugin is allowed to run, exported to it as
    /// `STAGING_TIMEOUT`.
    #[serde(default = "default_staging_timeout")]
    pub staging_timeout_secs: u64,
    /// Additional bind mounts for the container beyond the standard
    /// workspace, assets, and agent mounts.
    #[serde(default)]
    pub extra_bind_mounts: Vec<BindMount>,
    /// Streaming-log directory server settings.
    #[serde(default)]
    pub directory_server: DirectoryServerConfig,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/tmp/staging")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("/var/stagehand/assets")
}

fn default_agent_dir() -> PathBuf {
    PathBuf::from("/var/stagehand/agent")
}

fn default_staging_timeout() -> u64 {
    900
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            plugin_path: PathBuf::new(),
            assets_dir: default_assets_dir(),
            agent_dir: default_agent_dir(),
            staging_timeout_secs: default_staging_timeout(),
            extra_bind_mounts: Vec::new(),
            directory_server: DirectoryServerConfig::default(),
        }
    }
}

impl StagingConfig {
    /// Creates a new staging configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the workspace base directory.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the build plugin executable path.
    #[must_use]
    pub fn with_plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_path = path.into();
        self
    }

    /// Sets the shared assets directory.
    #[must_use]
    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    /// Sets the agent installation directory.
    #[must_use]
    pub fn with_agent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agent_dir = dir.into();
        self
    }

    /// Adds an extra bind mount.
    #[must_use]
    pub fn with_bind_mount(mut self, mount: BindMount) -> Self {
        self.extra_bind_mounts.push(mount);
        self
    }

    /// Sets the directory server settings.
    #[must_use]
    pub fn with_directory_server(mut self, directory_server: DirectoryServerConfig) -> Self {
        self.directory_server = directory_server;
        self
    }

    /// Checks that the configuration is complete enough to stage with.
    pub fn validate(&self) -> Result<(), StagingError> {
        if self.plugin_path.as_os_str().is_empty() {
            return Err(StagingError::config("plugin_path is not set"));
        }
        if self.directory_server.secret.is_empty() {
            return Err(StagingError::config("directory_server.secret is not set"));
        }
        Ok(())
    }
}

/// Settings for the directory server that serves staging logs over HTTP.
///
/// The crate only builds signed URLs pointing at this server; the server
/// itself runs elsewhere and shares [`DirectoryServerConfig::secret`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryServerConfig {
    /// URL scheme, `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Externally reachable `host:port` of the directory server.
    #[serde(default = "default_address")]
    pub address: String,
    /// Shared secret used to sign streaming-log URLs.
    #[serde(default)]
    pub secret: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_address() -> String {
    "127.0.0.1:34567".to_string()
}

impl Default for DirectoryServerConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            address: default_address(),
            secret: String::new(),
        }
    }
}

impl DirectoryServerConfig {
    /// Creates new directory server settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the externally reachable address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the signing secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }
}
