//! Signed streaming-log URLs.
//!
//! Staging logs are served by an external directory server that shares a
//! secret with this crate. [`DirectoryServer`] builds URLs whose path and
//! query are authenticated with HMAC-SHA256, so the server can hand out
//! log files without any further authorization state.

use std::fmt;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::DirectoryServerConfig;
use crate::errors::StagingError;

type HmacSha256 = Hmac<Sha256>;

/// Client-side view of the directory server: builds and checks signed URLs.
#[derive(Clone)]
pub struct DirectoryServer {
    config: DirectoryServerConfig,
    mac: HmacSha256,
}

impl DirectoryServer {
    /// Creates a signer from directory server settings.
    pub fn new(config: DirectoryServerConfig) -> Result<Self, StagingError> {
        let mac = HmacSha256::new_from_slice(config.secret.as_bytes())
            .map_err(|err| StagingError::config(format!("invalid directory server secret: {err}")))?;
        Ok(Self { config, mac })
    }

    /// Builds a signed URL that streams the staging log of `task_id`.
    ///
    /// `sandbox_path` is the log's path inside the container; it travels in
    /// the `path` query parameter, percent-encoded. The signature covers
    /// the whole path and query apart from the trailing `hmac` parameter.
    #[must_use]
    pub fn staging_log_url(&self, task_id: &str, sandbox_path: &str) -> String {
        let timestamp = Utc::now().timestamp();
        let path_and_query = format!(
            "/staging_tasks/{task_id}/file_path?path={}&timestamp={timestamp}",
            urlencoding::encode(sandbox_path)
        );
        let signature = self.sign(&path_and_query);
        format!(
            "{}://{}{path_and_query}&hmac={signature}",
            self.config.protocol, self.config.address
        )
    }

    /// Checks the signature of a previously issued URL.
    ///
    /// This is the check the serving side performs before handing out a
    /// file; it lives here so both ends agree on the signed message format.
    #[must_use]
    pub fn verify(&self, url: &str) -> bool {
        let Some(path_and_query) = path_and_query(url) else {
            return false;
        };
        let Some((message, presented)) = path_and_query.rsplit_once("&hmac=") else {
            return false;
        };
        let Ok(signature) = hex::decode(presented) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    fn sign(&self, message: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for DirectoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryServer")
            .field("protocol", &self.config.protocol)
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

/// Strips scheme and authority, leaving the path and query.
fn path_and_query(url: &str) -> Option<&str> {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    after_scheme.find('/').map(|index| &after_scheme[index..])
}
