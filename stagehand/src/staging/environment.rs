//! Staging environment and build script assembly.
//!
//! The build plugin runs inside the container under a controlled
//! environment: paths into the shared assets tree, the platform config
//! location, and whatever the application itself declared. The full
//! invocation is a single shell line so the container runtime can execute
//! it without any staging-specific knowledge.

use std::path::Path;

use crate::config::StagingConfig;
use crate::sandbox::{self, shell_quote, shell_quote_path};
use crate::staging::StagingProperties;
use crate::workspace::StagingWorkspace;

/// Environment the build plugin runs under, in export order.
#[derive(Debug, Clone)]
pub struct StagingEnvironment {
    entries: Vec<(String, String)>,
}

impl StagingEnvironment {
    /// Assembles the environment for one task.
    ///
    /// Platform entries come first, then the application's own entries in
    /// declaration order, so applications can override platform values.
    #[must_use]
    pub fn for_task(
        config: &StagingConfig,
        workspace: &StagingWorkspace,
        properties: &StagingProperties,
    ) -> Self {
        let assets = config.assets_dir.display();
        let mut entries = vec![
            (
                "PLATFORM_CONFIG".to_string(),
                workspace.platform_config_path().display().to_string(),
            ),
            ("C_INCLUDE_PATH".to_string(), format!("{assets}/include")),
            ("LIBRARY_PATH".to_string(), format!("{assets}/lib")),
            ("LD_LIBRARY_PATH".to_string(), format!("{assets}/lib")),
            (
                "PATH".to_string(),
                format!("{assets}/bin:/usr/local/bin:/usr/bin:/bin"),
            ),
            (
                "STAGING_TIMEOUT".to_string(),
                config.staging_timeout_secs.to_string(),
            ),
        ];
        entries.extend(properties.environment().iter().cloned());
        Self { entries }
    }

    /// The environment entries, in export order.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Renders the entries as a `K='v'` prefix for a shell command.
    #[must_use]
    pub fn export_prefix(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={}", shell_quote(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the shell line that runs the plugin and captures its output.
    ///
    /// The log directory is created first since the plugin's combined
    /// output is redirected into it before the plugin itself can make any
    /// directories.
    #[must_use]
    pub fn build_script(
        &self,
        plugin_path: &Path,
        runtime_name: &str,
        plugin_config_path: &Path,
    ) -> String {
        format!(
            "mkdir -p {} && {} {} {} {} > {} 2>&1",
            sandbox::STAGING_LOG_DIR,
            self.export_prefix(),
            shell_quote_path(plugin_path),
            shell_quote(runtime_name),
            shell_quote_path(plugin_config_path),
            sandbox::STAGING_LOG_PATH,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn environment() -> (StagingEnvironment, StagingWorkspace) {
        let config = StagingConfig::new()
            .with_assets_dir("/opt/agent/assets")
            .with_plugin_path("/opt/agent/bin/stage_plugin");
        let workspace = StagingWorkspace::new(Path::new("/tmp/staging"), "task-9");
        let properties = StagingProperties::new("ruby18", "sinatra")
            .with_environment_entry("RACK_ENV", "production");
        (
            StagingEnvironment::for_task(&config, &workspace, &properties),
            workspace,
        )
    }

    #[test]
    fn test_platform_entries_then_application_entries() {
        let (environment, workspace) = environment();
        let entries = environment.entries();

        assert_eq!(entries[0].0, "PLATFORM_CONFIG");
        assert_eq!(
            entries[0].1,
            workspace.platform_config_path().display().to_string()
        );
        assert_eq!(
            entries.last().unwrap(),
            &("RACK_ENV".to_string(), "production".to_string())
        );
    }

    #[test]
    fn test_paths_point_into_assets_tree() {
        let (environment, _) = environment();
        let entries: std::collections::HashMap<_, _> =
            environment.entries().iter().cloned().collect();

        assert_eq!(entries["C_INCLUDE_PATH"], "/opt/agent/assets/include");
        assert_eq!(entries["LD_LIBRARY_PATH"], "/opt/agent/assets/lib");
        assert!(entries["PATH"].starts_with("/opt/agent/assets/bin:"));
    }

    #[test]
    fn test_export_prefix_quotes_values() {
        let config = StagingConfig::new();
        let workspace = StagingWorkspace::new(Path::new("/tmp/staging"), "task-q");
        let properties =
            StagingProperties::new("ruby18", "sinatra").with_environment_entry("MOTD", "it's up");
        let environment = StagingEnvironment::for_task(&config, &workspace, &properties);

        assert!(environment.export_prefix().contains("MOTD='it'\\''s up'"));
    }

    #[test]
    fn test_build_script_layout() {
        let (environment, workspace) = environment();
        let script = environment.build_script(
            &PathBuf::from("/opt/agent/bin/stage_plugin"),
            "ruby18",
            &workspace.plugin_config_path(),
        );

        assert!(script.starts_with("mkdir -p /tmp/staged/logs && "));
        assert!(script.contains("RACK_ENV='production'"));
        assert!(script.contains("STAGING_TIMEOUT="));
        assert!(script.contains("/opt/agent/bin/stage_plugin"));
        assert!(script.contains("'ruby18'"));
        assert!(script.contains(&workspace.plugin_config_path().display().to_string()));
        assert!(script.ends_with("> /tmp/staged/logs/staging_task.log 2>&1"));
    }
}
