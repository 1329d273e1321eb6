//! Immutable descriptions of what a staging task works on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything one staging run needs to know about its application: where
/// to fetch the archive, where to deliver the droplet, and the properties
/// handed through to the build plugin.
///
/// Attributes are fixed at construction; accessors hand out references and
/// nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingAttributes {
    download_uri: String,
    upload_uri: String,
    properties: StagingProperties,
}

impl StagingAttributes {
    /// Creates attributes from owned values.
    #[must_use]
    pub fn new(
        download_uri: impl Into<String>,
        upload_uri: impl Into<String>,
        properties: StagingProperties,
    ) -> Self {
        Self {
            download_uri: download_uri.into(),
            upload_uri: upload_uri.into(),
            properties,
        }
    }

    /// URI the application archive is downloaded from.
    #[must_use]
    pub fn download_uri(&self) -> &str {
        &self.download_uri
    }

    /// URI the packed droplet is uploaded to.
    #[must_use]
    pub fn upload_uri(&self) -> &str {
        &self.upload_uri
    }

    /// Properties handed through to the build plugin.
    #[must_use]
    pub fn properties(&self) -> &StagingProperties {
        &self.properties
    }
}

/// Application properties the build plugin stages against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingProperties {
    runtime_name: String,
    framework_name: String,
    #[serde(default)]
    environment: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buildpack_cache_uri: Option<String>,
    #[serde(default)]
    resources: HashMap<String, serde_json::Value>,
}

impl StagingProperties {
    /// Creates properties for the given runtime and framework.
    #[must_use]
    pub fn new(runtime_name: impl Into<String>, framework_name: impl Into<String>) -> Self {
        Self {
            runtime_name: runtime_name.into(),
            framework_name: framework_name.into(),
            environment: Vec::new(),
            buildpack_cache_uri: None,
            resources: HashMap::new(),
        }
    }

    /// Appends an application environment entry.
    #[must_use]
    pub fn with_environment_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    /// Sets the buildpack cache URI.
    #[must_use]
    pub fn with_buildpack_cache_uri(mut self, uri: impl Into<String>) -> Self {
        self.buildpack_cache_uri = Some(uri.into());
        self
    }

    /// Adds an opaque resource limit entry.
    #[must_use]
    pub fn with_resource(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.resources.insert(key.into(), value);
        self
    }

    /// Name of the runtime the application targets.
    #[must_use]
    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    /// Name of the framework the application uses.
    #[must_use]
    pub fn framework_name(&self) -> &str {
        &self.framework_name
    }

    /// Application environment entries, in declaration order.
    #[must_use]
    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    /// Buildpack cache URI, when one was assigned.
    #[must_use]
    pub fn buildpack_cache_uri(&self) -> Option<&str> {
        self.buildpack_cache_uri.as_deref()
    }

    /// Opaque resource limits, passed through to the plugin untouched.
    #[must_use]
    pub fn resources(&self) -> &HashMap<String, serde_json::Value> {
        &self.resources
    }
}
