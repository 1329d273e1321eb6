//! Ready-made configuration and attributes for task tests.

use std::path::Path;

use crate::config::{DirectoryServerConfig, StagingConfig};
use crate::staging::{StagingAttributes, StagingProperties};

/// A complete, valid staging configuration rooted at `base_dir`.
#[must_use]
pub fn staging_config(base_dir: &Path) -> StagingConfig {
    StagingConfig::new()
        .with_base_dir(base_dir)
        .with_plugin_path("/opt/agent/bin/stage_plugin")
        .with_assets_dir("/opt/agent/assets")
        .with_agent_dir("/opt/agent")
        .with_directory_server(DirectoryServerConfig::new().with_secret("fixture-secret"))
}

/// Attributes for a small ruby application.
#[must_use]
pub fn staging_attributes() -> StagingAttributes {
    StagingAttributes::new(
        "http://platform.example.com/apps/42/bits",
        "http://platform.example.com/droplets/42",
        StagingProperties::new("ruby18", "sinatra").with_environment_entry("RACK_ENV", "production"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_config_fixture_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(staging_config(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_staging_attributes_fixture() {
        let attributes = staging_attributes();
        assert_eq!(attributes.properties().runtime_name(), "ruby18");
        assert!(attributes.download_uri().ends_with("/bits"));
    }
}
