//! Fake collaborators that record calls and return configurable results.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::container::{
    BindMount, CommandOutcome, ContainerHandle, ContainerInfo, ContainerRuntime,
};
use crate::errors::StagingError;
use crate::transport::ArchiveTransport;

/// An in-memory container runtime.
///
/// Scripts succeed, file copies materialize seeded bytes on the host, and
/// every call is recorded. Individual operations can be made to fail or
/// stall through the `set_*` methods.
#[derive(Debug)]
pub struct FakeContainerRuntime {
    root_path: Mutex<Option<PathBuf>>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    exit_statuses: Mutex<Vec<(String, u32)>>,
    create_delay: Mutex<Option<Duration>>,
    fail_create: Mutex<Option<String>>,
    fail_run: Mutex<Option<String>>,
    fail_copy_out: Mutex<Option<String>>,
    fail_info: Mutex<Option<String>>,
    fail_destroy: Mutex<Option<String>>,
    next_handle: Mutex<usize>,
    created_mounts: Mutex<Vec<Vec<BindMount>>>,
    scripts: Mutex<Vec<String>>,
    copies: Mutex<Vec<(PathBuf, PathBuf)>>,
    destroyed: Mutex<Vec<ContainerHandle>>,
}

impl FakeContainerRuntime {
    /// Creates a runtime whose containers report a fixed filesystem root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root_path: Mutex::new(Some(PathBuf::from("/var/containers/c-1/root"))),
            files: Mutex::new(HashMap::new()),
            exit_statuses: Mutex::new(Vec::new()),
            create_delay: Mutex::new(None),
            fail_create: Mutex::new(None),
            fail_run: Mutex::new(None),
            fail_copy_out: Mutex::new(None),
            fail_info: Mutex::new(None),
            fail_destroy: Mutex::new(None),
            next_handle: Mutex::new(0),
            created_mounts: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    /// Sets the filesystem root reported by `info`, or `None` to withhold it.
    pub fn set_container_root(&self, path: Option<PathBuf>) {
        *self.root_path.lock() = path;
    }

    /// Seeds the bytes copied out for a container path.
    pub fn set_file(&self, container_path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.lock().insert(container_path.into(), bytes);
    }

    /// Makes scripts containing `fragment` exit with `status`.
    pub fn set_exit_status(&self, fragment: impl Into<String>, status: u32) {
        self.exit_statuses.lock().push((fragment.into(), status));
    }

    /// Stalls `create` for the given duration before it completes.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Makes `create` fail with a container error.
    pub fn set_fail_create(&self, message: impl Into<String>) {
        *self.fail_create.lock() = Some(message.into());
    }

    /// Makes `run_command` fail with a container error.
    pub fn set_fail_run_command(&self, message: impl Into<String>) {
        *self.fail_run.lock() = Some(message.into());
    }

    /// Makes `copy_out` fail with a container error.
    pub fn set_fail_copy_out(&self, message: impl Into<String>) {
        *self.fail_copy_out.lock() = Some(message.into());
    }

    /// Makes `info` fail with a container error.
    pub fn set_fail_info(&self, message: impl Into<String>) {
        *self.fail_info.lock() = Some(message.into());
    }

    /// Makes `destroy` fail with a container error.
    pub fn set_fail_destroy(&self, message: impl Into<String>) {
        *self.fail_destroy.lock() = Some(message.into());
    }

    /// Bind mounts passed to each completed `create` call.
    #[must_use]
    pub fn created_mounts(&self) -> Vec<Vec<BindMount>> {
        self.created_mounts.lock().clone()
    }

    /// Scripts run, in order.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    /// Copy-out requests as `(container_path, host_dest)` pairs.
    #[must_use]
    pub fn copies(&self) -> Vec<(PathBuf, PathBuf)> {
        self.copies.lock().clone()
    }

    /// Handles passed to `destroy`, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<ContainerHandle> {
        self.destroyed.lock().clone()
    }
}

impl Default for FakeContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn create(&self, bind_mounts: &[BindMount]) -> Result<ContainerHandle, StagingError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_create.lock().clone() {
            return Err(StagingError::container(message));
        }
        let handle = {
            let mut next = self.next_handle.lock();
            *next += 1;
            ContainerHandle::new(format!("fake-container-{}", *next))
        };
        self.created_mounts.lock().push(bind_mounts.to_vec());
        Ok(handle)
    }

    async fn run_command(
        &self,
        _handle: &ContainerHandle,
        script: &str,
    ) -> Result<CommandOutcome, StagingError> {
        if let Some(message) = self.fail_run.lock().clone() {
            return Err(StagingError::container(message));
        }
        self.scripts.lock().push(script.to_string());
        let status = self
            .exit_statuses
            .lock()
            .iter()
            .find(|(fragment, _)| script.contains(fragment.as_str()))
            .map_or(0, |(_, status)| *status);
        if status == 0 {
            Ok(CommandOutcome::new(0))
        } else {
            Ok(CommandOutcome::new(status).with_stderr("fake script failure"))
        }
    }

    async fn copy_out(
        &self,
        _handle: &ContainerHandle,
        container_path: &Path,
        host_dest: &Path,
    ) -> Result<(), StagingError> {
        if let Some(message) = self.fail_copy_out.lock().clone() {
            return Err(StagingError::container(message));
        }
        let bytes = self
            .files
            .lock()
            .get(container_path)
            .cloned()
            .unwrap_or_default();
        if let Some(parent) = host_dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(host_dest, bytes)?;
        self.copies
            .lock()
            .push((container_path.to_path_buf(), host_dest.to_path_buf()));
        Ok(())
    }

    async fn info(&self, _handle: &ContainerHandle) -> Result<ContainerInfo, StagingError> {
        if let Some(message) = self.fail_info.lock().clone() {
            return Err(StagingError::container(message));
        }
        let mut info = ContainerInfo::new().with_host_ip("127.0.0.1");
        info.container_root_path = self.root_path.lock().clone();
        Ok(info)
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), StagingError> {
        if let Some(message) = self.fail_destroy.lock().clone() {
            return Err(StagingError::container(message));
        }
        self.destroyed.lock().push(handle.clone());
        Ok(())
    }
}

/// An in-memory archive transport.
///
/// Downloads write a canned archive into the destination directory, named
/// after the last URI segment the way an HTTP transport would name it.
#[derive(Debug)]
pub struct FakeTransport {
    archive_bytes: Mutex<Vec<u8>>,
    download_delay: Mutex<Option<Duration>>,
    fail_download: Mutex<Option<String>>,
    fail_upload: Mutex<Option<String>>,
    downloads: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeTransport {
    /// Creates a transport serving a small placeholder archive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            archive_bytes: Mutex::new(b"fake application archive".to_vec()),
            download_delay: Mutex::new(None),
            fail_download: Mutex::new(None),
            fail_upload: Mutex::new(None),
            downloads: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Sets the bytes written by each download.
    pub fn set_archive_bytes(&self, bytes: Vec<u8>) {
        *self.archive_bytes.lock() = bytes;
    }

    /// Stalls `download` for the given duration before it completes.
    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock() = Some(delay);
    }

    /// Makes `download` fail with a transport error.
    pub fn set_fail_download(&self, message: impl Into<String>) {
        *self.fail_download.lock() = Some(message.into());
    }

    /// Makes `upload` fail with a transport error.
    pub fn set_fail_upload(&self, message: impl Into<String>) {
        *self.fail_upload.lock() = Some(message.into());
    }

    /// URIs downloaded, in order.
    #[must_use]
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    /// Uploads as `(source_path, uri)` pairs.
    #[must_use]
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().clone()
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveTransport for FakeTransport {
    async fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf, StagingError> {
        let delay = *self.download_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_download.lock().clone() {
            return Err(StagingError::transport(message));
        }
        let name = uri
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("archive");
        let dest = dest_dir.join(name);
        std::fs::write(&dest, self.archive_bytes.lock().clone())?;
        self.downloads.lock().push(uri.to_string());
        Ok(dest)
    }

    async fn upload(&self, path: &Path, uri: &str) -> Result<(), StagingError> {
        if let Some(message) = self.fail_upload.lock().clone() {
            return Err(StagingError::transport(message));
        }
        // Reading the source enforces that the uploaded file exists.
        std::fs::read(path)?;
        self.uploads.lock().push((path.to_path_buf(), uri.to_string()));
        Ok(())
    }
}

/// Records lifecycle hook invocations.
///
/// Each entry is the rendered error message, or `None` when the hook
/// observed success. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    after_setup: Arc<Mutex<Vec<Option<String>>>>,
    completions: Arc<Mutex<Vec<Option<String>>>>,
}

impl RecordingHooks {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a hook suitable for `StagingTask::on_after_setup`.
    #[must_use]
    pub fn after_setup_hook(&self) -> impl FnOnce(Option<&StagingError>) + Send + 'static {
        let calls = Arc::clone(&self.after_setup);
        move |error| calls.lock().push(error.map(ToString::to_string))
    }

    /// Returns a hook suitable for `StagingTask::on_completion`.
    #[must_use]
    pub fn completion_hook(&self) -> impl FnOnce(Option<&StagingError>) + Send + 'static {
        let calls = Arc::clone(&self.completions);
        move |error| calls.lock().push(error.map(ToString::to_string))
    }

    /// After-setup invocations, in order.
    #[must_use]
    pub fn after_setup_calls(&self) -> Vec<Option<String>> {
        self.after_setup.lock().clone()
    }

    /// Completion invocations, in order.
    #[must_use]
    pub fn completion_calls(&self) -> Vec<Option<String>> {
        self.completions.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_runtime_records_lifecycle() {
        let runtime = FakeContainerRuntime::new();
        let mounts = vec![BindMount::read_write("/tmp/ws", "/tmp/ws")];

        let handle = runtime.create(&mounts).await.unwrap();
        assert_eq!(handle.as_str(), "fake-container-1");
        assert_eq!(runtime.created_mounts(), vec![mounts]);

        let outcome = runtime.run_command(&handle, "echo hi").await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(runtime.scripts(), vec!["echo hi".to_string()]);

        runtime.destroy(&handle).await.unwrap();
        assert_eq!(runtime.destroyed(), vec![handle]);
    }

    #[tokio::test]
    async fn test_fake_runtime_exit_status_matches_fragment() {
        let runtime = FakeContainerRuntime::new();
        runtime.set_exit_status("plugin", 7);
        let handle = runtime.create(&[]).await.unwrap();

        let failed = runtime.run_command(&handle, "run plugin now").await.unwrap();
        assert_eq!(failed.exit_status, 7);
        assert!(failed.stderr.is_some());

        let passed = runtime.run_command(&handle, "echo hi").await.unwrap();
        assert!(passed.is_success());
    }

    #[tokio::test]
    async fn test_fake_runtime_failures() {
        let runtime = FakeContainerRuntime::new();
        runtime.set_fail_create("no capacity");

        let err = runtime.create(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Container error: no capacity");
        assert!(runtime.created_mounts().is_empty());
    }

    #[tokio::test]
    async fn test_fake_runtime_copy_out_materializes_seeded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeContainerRuntime::new();
        runtime.set_file("/tmp/droplet.tgz", b"droplet".to_vec());
        let handle = runtime.create(&[]).await.unwrap();

        let dest = dir.path().join("out/droplet.tgz");
        runtime
            .copy_out(&handle, Path::new("/tmp/droplet.tgz"), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"droplet");
        assert_eq!(
            runtime.copies(),
            vec![(PathBuf::from("/tmp/droplet.tgz"), dest)]
        );
    }

    #[tokio::test]
    async fn test_fake_transport_names_archive_from_uri() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.set_archive_bytes(b"zip bytes".to_vec());

        let path = transport
            .download("http://platform/apps/42/bits", dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("bits"));
        assert_eq!(std::fs::read(&path).unwrap(), b"zip bytes");
        assert_eq!(transport.downloads(), vec!["http://platform/apps/42/bits".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_transport_upload_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();

        let missing = dir.path().join("droplet.tgz");
        let err = transport
            .upload(&missing, "http://platform/droplets/42")
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Io(_)));
        assert!(transport.uploads().is_empty());

        std::fs::write(&missing, b"droplet").unwrap();
        transport
            .upload(&missing, "http://platform/droplets/42")
            .await
            .unwrap();
        assert_eq!(
            transport.uploads(),
            vec![(missing, "http://platform/droplets/42".to_string())]
        );
    }

    #[tokio::test]
    async fn test_recording_hooks_share_records_across_clones() {
        let hooks = RecordingHooks::new();
        let observer = hooks.clone();

        let after_setup = hooks.after_setup_hook();
        after_setup(None);
        let completion = hooks.completion_hook();
        completion(Some(&StagingError::transport("bits missing")));

        assert_eq!(observer.after_setup_calls(), vec![None]);
        assert_eq!(
            observer.completion_calls(),
            vec![Some("Transport error: bits missing".to_string())]
        );
    }
}
