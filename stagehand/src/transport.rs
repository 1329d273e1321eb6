//! Archive transfer interface and the HTTP reference implementation.
//!
//! [`ArchiveTransport`] is the seam between the staging pipeline and
//! whatever moves archives around. [`HttpTransport`] covers the common
//! case of plain HTTP endpoints; tests use
//! [`crate::testing::FakeTransport`] instead. No retries happen at this
//! layer: a failed transfer is reported as is and the task decides what
//! that means.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::StagingError;

/// Moves application archives between the platform and the host.
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Downloads the archive at `uri` into `dest_dir` and returns the path
    /// of the downloaded file.
    async fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf, StagingError>;

    /// Uploads the file at `path` to `uri`.
    async fn upload(&self, path: &Path, uri: &str) -> Result<(), StagingError>;
}

/// [`ArchiveTransport`] over plain HTTP.
///
/// Downloads stream to a `.download` temp name and are renamed into place
/// once complete, so a partially fetched archive is never mistaken for a
/// whole one. Uploads PUT the file bytes. Any non-2xx status is a
/// [`StagingError::Transport`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport over a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    async fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf, StagingError> {
        let response = self.client.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::transport(format!(
                "download of {uri} returned {status}"
            )));
        }

        let name = archive_name(uri);
        let temp_path = dest_dir.join(format!("{name}.download"));
        let final_path = dest_dir.join(name);

        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &final_path).await?;
        debug!(uri, path = %final_path.display(), "downloaded archive");
        Ok(final_path)
    }

    async fn upload(&self, path: &Path, uri: &str) -> Result<(), StagingError> {
        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len();
        let response = self.client.put(uri).body(bytes).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StagingError::transport(format!(
                "upload to {uri} returned {status}"
            )));
        }
        debug!(uri, size, "uploaded artifact");
        Ok(())
    }
}

/// Picks a local file name for a downloaded archive from its URI.
fn archive_name(uri: &str) -> String {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    let path = without_query
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map_or("", |(_, path)| path);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("archive")
        .to_string()
}
