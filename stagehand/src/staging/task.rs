//! The staging task orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StagingConfig;
use crate::container::{BindMount, ContainerHandle, ContainerInfo, ContainerRuntime};
use crate::directory::DirectoryServer;
use crate::errors::StagingError;
use crate::promise::{self, Promise};
use crate::sandbox;
use crate::staging::{StagingAttributes, StagingEnvironment, StagingOutcome};
use crate::transport::ArchiveTransport;
use crate::workspace::{StagingWorkspace, TeardownGuard};

type LifecycleHook = Box<dyn FnOnce(Option<&StagingError>) + Send>;

/// The container bound to this task once setup has resolved it.
#[derive(Debug, Clone)]
struct BoundContainer {
    handle: ContainerHandle,
    root_path: PathBuf,
}

/// Drives one application bundle through the full staging pipeline.
///
/// A task owns one workspace and one container for its lifetime. `start`
/// runs two phases:
///
/// - **Setup**: prepare the workspace, then download the archive and
///   create the container concurrently, then resolve the container's
///   filesystem root. The outcome reaches the after-setup hook exactly
///   once, error or not, before anything else happens.
/// - **Execution**: unpack, run the build plugin, pack the droplet, copy
///   it out, upload it, destroy the container. Strictly in order; the
///   first failure stops the pipeline and later steps never start.
///
/// However the run ends, the completion hook fires once and the workspace
/// is removed afterwards; the hook still observes it on disk, the caller
/// does not.
/// A container left behind by a failed pipeline is destroyed on a best
/// effort basis; one still being created by an abandoned setup step is
/// the runtime's orphan policy to reap.
pub struct StagingTask {
    task_id: String,
    config: StagingConfig,
    attributes: StagingAttributes,
    runtime: Arc<dyn ContainerRuntime>,
    transport: Arc<dyn ArchiveTransport>,
    directory: DirectoryServer,
    workspace: StagingWorkspace,
    bound: Option<BoundContainer>,
    created_container: Arc<Mutex<Option<ContainerHandle>>>,
    droplet_digest: Arc<Mutex<Option<String>>>,
    started: bool,
    after_setup_hook: Option<LifecycleHook>,
    completion_hook: Option<LifecycleHook>,
}

impl StagingTask {
    /// Creates an idle task.
    ///
    /// The task id and every workspace path are fixed here; nothing
    /// touches the filesystem or the container runtime until
    /// [`StagingTask::start`].
    pub fn new(
        config: StagingConfig,
        attributes: StagingAttributes,
        runtime: Arc<dyn ContainerRuntime>,
        transport: Arc<dyn ArchiveTransport>,
    ) -> Result<Self, StagingError> {
        config.validate()?;
        let directory = DirectoryServer::new(config.directory_server.clone())?;
        let task_id = Uuid::new_v4().to_string();
        let workspace = StagingWorkspace::new(&config.base_dir, &task_id);

        Ok(Self {
            task_id,
            config,
            attributes,
            runtime,
            transport,
            directory,
            workspace,
            bound: None,
            created_container: Arc::new(Mutex::new(None)),
            droplet_digest: Arc::new(Mutex::new(None)),
            started: false,
            after_setup_hook: None,
            completion_hook: None,
        })
    }

    /// Registers the hook fired once setup has succeeded or failed.
    ///
    /// The hook receives the setup error, or `None` on success, and runs
    /// before the execution phase starts and before any failure
    /// propagates. Typical use is releasing an admission slot held while
    /// containers are scarce.
    pub fn on_after_setup<F>(&mut self, hook: F)
    where
        F: FnOnce(Option<&StagingError>) + Send + 'static,
    {
        self.after_setup_hook = Some(Box::new(hook));
    }

    /// Registers the hook fired once the whole run has finished.
    ///
    /// The hook receives the earliest pipeline failure, or `None`, and
    /// runs while the workspace still exists on disk.
    pub fn on_completion<F>(&mut self, hook: F)
    where
        F: FnOnce(Option<&StagingError>) + Send + 'static,
    {
        self.completion_hook = Some(Box::new(hook));
    }

    /// The task's stable identifier, generated at construction.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The task's host workspace.
    #[must_use]
    pub fn workspace(&self) -> &StagingWorkspace {
        &self.workspace
    }

    /// The staging log copied back from the container, when present.
    ///
    /// Absence is not an error: the log only exists once the stage step
    /// has run far enough to produce one. Plugin output is arbitrary
    /// bytes, so invalid UTF-8 is replaced rather than hiding the log.
    #[must_use]
    pub fn task_log(&self) -> Option<String> {
        let bytes = std::fs::read(self.workspace.staging_log_path()).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// A signed URL streaming this task's staging log.
    #[must_use]
    pub fn streaming_log_url(&self) -> String {
        self.directory
            .staging_log_url(&self.task_id, sandbox::STAGING_LOG_PATH)
    }

    /// Resolves a path inside the container's filesystem root.
    ///
    /// `None` until setup has bound a container.
    #[must_use]
    pub fn container_path(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        self.bound.as_ref().map(|bound| {
            let relative = relative.as_ref();
            let relative = relative.strip_prefix("/").unwrap_or(relative);
            bound.root_path.join(relative)
        })
    }

    /// SHA-256 of the retrieved droplet, once copy-out has succeeded.
    #[must_use]
    pub fn staged_droplet_digest(&self) -> Option<String> {
        self.droplet_digest.lock().clone()
    }

    /// Runs the whole staging pipeline and reports how it went.
    ///
    /// A task starts once; further calls are rejected with
    /// [`StagingError::AlreadyStarted`] without touching hooks or the
    /// workspace.
    pub async fn start(&mut self) -> StagingOutcome {
        if self.started {
            return StagingOutcome {
                error: Some(StagingError::AlreadyStarted),
                after_setup_fired: false,
                completed: false,
            };
        }
        self.started = true;
        info!(task_id = %self.task_id, "staging task started");

        let setup_result = self.run_setup().await;
        self.notify_after_setup(&setup_result);

        let pipeline_result = match setup_result {
            Ok(()) => self.run_execution().await,
            Err(error) => Err(error),
        };

        self.finish(pipeline_result).await
    }

    async fn run_setup(&mut self) -> Result<(), StagingError> {
        debug!(task_id = %self.task_id, workspace = %self.workspace.root().display(), "preparing workspace");
        self.prepare_workspace()?;

        let download = self.promise_app_download();
        let create = self.promise_container_create();
        let ((), handle) = promise::resolve_both(download, create).await?;

        let info = self.promise_container_info(handle.clone()).resolve().await?;
        let root_path = info
            .container_root_path
            .ok_or(StagingError::ContainerRootMissing)?;

        info!(task_id = %self.task_id, container = %handle, "setup complete");
        self.bound = Some(BoundContainer { handle, root_path });
        Ok(())
    }

    async fn run_execution(&mut self) -> Result<(), StagingError> {
        let Some(bound) = self.bound.clone() else {
            return Err(StagingError::internal("execution started without a container"));
        };
        info!(task_id = %self.task_id, "staging pipeline started");

        let steps = vec![
            self.promise_unpack_app(&bound),
            self.promise_stage(&bound),
            self.promise_pack_app(&bound),
            self.promise_copy_out(&bound),
            self.promise_app_upload(),
            self.promise_destroy(&bound),
        ];
        promise::resolve_in_sequence(steps).await?;

        self.bound = None;
        info!(task_id = %self.task_id, "staging pipeline complete");
        Ok(())
    }

    /// Writes the plugin and platform configuration files into the
    /// workspace and lays out the directories later steps rely on.
    fn prepare_workspace(&self) -> Result<(), StagingError> {
        self.workspace.ensure_root()?;
        std::fs::create_dir_all(self.workspace.staged_droplet_dir())?;

        let plugin_config = json!({
            "source_dir": sandbox::UNSTAGED_DIR,
            "dest_dir": sandbox::STAGED_DIR,
            "cache_dir": sandbox::CACHE_DIR,
            "staged_droplet_path": sandbox::DROPLET_PATH,
            "properties": self.attributes.properties(),
        });
        std::fs::write(
            self.workspace.plugin_config_path(),
            serde_json::to_vec_pretty(&plugin_config)?,
        )?;

        let platform_config = json!({ "cache_dir": sandbox::CACHE_DIR });
        std::fs::write(
            self.workspace.platform_config_path(),
            serde_json::to_vec_pretty(&platform_config)?,
        )?;
        Ok(())
    }

    fn notify_after_setup(&mut self, result: &Result<(), StagingError>) {
        if let Some(hook) = self.after_setup_hook.take() {
            hook(result.as_ref().err());
        }
    }

    async fn finish(&mut self, result: Result<(), StagingError>) -> StagingOutcome {
        // A failed pipeline can leave the container alive; reap it so the
        // error path does not leak runtime resources.
        let leaked = self.created_container.lock().take();
        if let Some(handle) = leaked {
            if let Err(error) = self.runtime.destroy(&handle).await {
                warn!(task_id = %self.task_id, container = %handle, %error, "failed to destroy container during teardown");
            }
        }
        self.bound = None;

        let error = result.err();
        let guard = TeardownGuard::new(self.workspace.clone());
        if let Some(hook) = self.completion_hook.take() {
            hook(error.as_ref());
        }
        drop(guard);

        match &error {
            Some(error) => warn!(task_id = %self.task_id, %error, "staging task failed"),
            None => info!(task_id = %self.task_id, "staging task succeeded"),
        }

        let completed = error.is_none();
        StagingOutcome {
            error,
            after_setup_fired: true,
            completed,
        }
    }

    fn bind_mounts(&self) -> Vec<BindMount> {
        let root = self.workspace.root();
        let mut mounts = vec![
            BindMount::read_write(root, root),
            BindMount::read_only(&self.config.assets_dir, &self.config.assets_dir),
            BindMount::read_only(&self.config.agent_dir, &self.config.agent_dir),
        ];
        mounts.extend(self.config.extra_bind_mounts.iter().cloned());
        mounts
    }

    fn promise_app_download(&self) -> Promise<()> {
        let transport = Arc::clone(&self.transport);
        let uri = self.attributes.download_uri().to_string();
        let workspace_root = self.workspace.root().to_path_buf();
        let app_path = self.workspace.downloaded_app_path();
        let task_id = self.task_id.clone();
        Promise::new(async move {
            debug!(task_id = %task_id, uri = %uri, "downloading application archive");
            let downloaded = transport.download(&uri, &workspace_root).await?;
            if downloaded != app_path {
                tokio::fs::rename(&downloaded, &app_path).await?;
            }
            set_app_permissions(&app_path)?;
            Ok(())
        })
    }

    fn promise_container_create(&self) -> Promise<ContainerHandle> {
        let runtime = Arc::clone(&self.runtime);
        let bind_mounts = self.bind_mounts();
        let slot = Arc::clone(&self.created_container);
        let task_id = self.task_id.clone();
        Promise::new(async move {
            debug!(task_id = %task_id, mounts = bind_mounts.len(), "creating container");
            let handle = runtime.create(&bind_mounts).await?;
            *slot.lock() = Some(handle.clone());
            Ok(handle)
        })
    }

    fn promise_container_info(&self, handle: ContainerHandle) -> Promise<ContainerInfo> {
        let runtime = Arc::clone(&self.runtime);
        Promise::new(async move { runtime.info(&handle).await })
    }

    fn promise_unpack_app(&self, bound: &BoundContainer) -> Promise<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = bound.handle.clone();
        let script = sandbox::unpack_script(&self.workspace.downloaded_app_path());
        Promise::new(async move { run_step_script(runtime.as_ref(), &handle, "unpack_app", &script).await })
    }

    fn promise_stage(&self, bound: &BoundContainer) -> Promise<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = bound.handle.clone();
        let environment = StagingEnvironment::for_task(
            &self.config,
            &self.workspace,
            self.attributes.properties(),
        );
        let script = environment.build_script(
            &self.config.plugin_path,
            self.attributes.properties().runtime_name(),
            &self.workspace.plugin_config_path(),
        );
        let log_dest = self.workspace.staging_log_path();
        Promise::new(async move {
            let build_result = run_step_script(runtime.as_ref(), &handle, "stage", &script).await;
            // The log is copied back whether the plugin succeeded or not.
            let copy_result = runtime
                .copy_out(&handle, Path::new(sandbox::STAGING_LOG_PATH), &log_dest)
                .await;
            match (build_result, copy_result) {
                (Ok(()), Ok(())) => Ok(()),
                (Ok(()), Err(copy_error)) => Err(copy_error),
                (Err(build_error), Ok(())) => Err(build_error),
                (Err(build_error), Err(copy_error)) => {
                    warn!(error = %copy_error, "failed to copy staging log after build failure");
                    Err(build_error)
                }
            }
        })
    }

    fn promise_pack_app(&self, bound: &BoundContainer) -> Promise<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = bound.handle.clone();
        let script = sandbox::pack_script();
        Promise::new(async move { run_step_script(runtime.as_ref(), &handle, "pack_app", &script).await })
    }

    fn promise_copy_out(&self, bound: &BoundContainer) -> Promise<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = bound.handle.clone();
        let dest = self.workspace.staged_droplet_path();
        let digest_slot = Arc::clone(&self.droplet_digest);
        let task_id = self.task_id.clone();
        Promise::new(async move {
            runtime
                .copy_out(&handle, Path::new(sandbox::DROPLET_PATH), &dest)
                .await?;
            let digest = file_sha256(&dest)?;
            info!(task_id = %task_id, droplet = %dest.display(), sha256 = %digest, "droplet retrieved");
            *digest_slot.lock() = Some(digest);
            Ok(())
        })
    }

    fn promise_app_upload(&self) -> Promise<()> {
        let transport = Arc::clone(&self.transport);
        let uri = self.attributes.upload_uri().to_string();
        let droplet = self.workspace.staged_droplet_path();
        let task_id = self.task_id.clone();
        Promise::new(async move {
            debug!(task_id = %task_id, uri = %uri, "uploading droplet");
            transport.upload(&droplet, &uri).await
        })
    }

    fn promise_destroy(&self, bound: &BoundContainer) -> Promise<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = bound.handle.clone();
        let slot = Arc::clone(&self.created_container);
        Promise::new(async move {
            debug!(container = %handle, "destroying container");
            runtime.destroy(&handle).await?;
            *slot.lock() = None;
            Ok(())
        })
    }
}

impl fmt::Debug for StagingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingTask")
            .field("task_id", &self.task_id)
            .field("workspace", &self.workspace.root())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Runs one pipeline script and folds a non-zero exit into a build error.
async fn run_step_script(
    runtime: &dyn ContainerRuntime,
    handle: &ContainerHandle,
    step: &str,
    script: &str,
) -> Result<(), StagingError> {
    debug!(step, "running staging script");
    let outcome = runtime.run_command(handle, script).await?;
    if outcome.is_success() {
        return Ok(());
    }
    if let Some(stderr) = &outcome.stderr {
        warn!(step, exit_status = outcome.exit_status, stderr = %stderr, "staging script failed");
    } else {
        warn!(step, exit_status = outcome.exit_status, "staging script failed");
    }
    Err(StagingError::build(step, outcome.exit_status))
}

fn file_sha256(path: &Path) -> Result<String, StagingError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn set_app_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o744))
}

#[cfg(not(unix))]
fn set_app_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::BindMountMode;
    use crate::staging::StagingProperties;
    use crate::testing::{staging_attributes, staging_config, FakeContainerRuntime, FakeTransport};

    fn task_with_fakes(
        base: &Path,
    ) -> (StagingTask, Arc<FakeContainerRuntime>, Arc<FakeTransport>) {
        let runtime = Arc::new(FakeContainerRuntime::new());
        let transport = Arc::new(FakeTransport::new());
        let task = StagingTask::new(
            staging_config(base),
            staging_attributes(),
            runtime.clone(),
            transport.clone(),
        )
        .unwrap();
        (task, runtime, transport)
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        let runtime = Arc::new(FakeContainerRuntime::new());
        let transport = Arc::new(FakeTransport::new());
        let err = StagingTask::new(
            StagingConfig::default(),
            staging_attributes(),
            runtime,
            transport,
        )
        .unwrap_err();
        assert!(matches!(err, StagingError::Config(_)));
    }

    #[test]
    fn test_task_ids_are_unique_and_root_workspace_paths() {
        let base = tempfile::tempdir().unwrap();
        let (first, _, _) = task_with_fakes(base.path());
        let (second, _, _) = task_with_fakes(base.path());

        assert_ne!(first.task_id(), second.task_id());
        assert_eq!(first.workspace().root(), base.path().join(first.task_id()));
    }

    #[test]
    fn test_task_log_roundtrip() {
        let base = tempfile::tempdir().unwrap();
        let (task, _, _) = task_with_fakes(base.path());

        assert_eq!(task.task_log(), None);

        task.workspace().ensure_root().unwrap();
        std::fs::write(task.workspace().staging_log_path(), "compile ok\n").unwrap();
        assert_eq!(task.task_log().as_deref(), Some("compile ok\n"));

        task.workspace().destroy().unwrap();
        assert_eq!(task.task_log(), None);
    }

    #[test]
    fn test_task_log_tolerates_non_utf8_output() {
        let base = tempfile::tempdir().unwrap();
        let (task, _, _) = task_with_fakes(base.path());

        task.workspace().ensure_root().unwrap();
        std::fs::write(task.workspace().staging_log_path(), b"gcc: \xff\xfe fatal\n").unwrap();

        assert_eq!(
            task.task_log().as_deref(),
            Some("gcc: \u{fffd}\u{fffd} fatal\n")
        );
    }

    #[test]
    fn test_container_path_requires_bound_container() {
        let base = tempfile::tempdir().unwrap();
        let (mut task, _, _) = task_with_fakes(base.path());

        assert_eq!(task.container_path("tmp/staged"), None);

        task.bound = Some(BoundContainer {
            handle: ContainerHandle::new("c-1"),
            root_path: PathBuf::from("/var/containers/c-1/root"),
        });
        assert_eq!(
            task.container_path("tmp/staged"),
            Some(PathBuf::from("/var/containers/c-1/root/tmp/staged"))
        );
        assert_eq!(
            task.container_path("/tmp/staged"),
            Some(PathBuf::from("/var/containers/c-1/root/tmp/staged"))
        );
    }

    #[test]
    fn test_streaming_log_url_is_signed_for_this_task() {
        let base = tempfile::tempdir().unwrap();
        let (task, _, _) = task_with_fakes(base.path());

        let url = task.streaming_log_url();
        assert!(url.contains(task.task_id()));
        assert!(url.contains("path=%2Ftmp%2Fstaged%2Flogs%2Fstaging_task.log"));

        let verifier = DirectoryServer::new(staging_config(base.path()).directory_server).unwrap();
        assert!(verifier.verify(&url));
    }

    #[test]
    fn test_prepare_workspace_writes_config_files() {
        let base = tempfile::tempdir().unwrap();
        let (task, _, _) = task_with_fakes(base.path());

        task.prepare_workspace().unwrap();

        let plugin: serde_json::Value =
            serde_json::from_slice(&std::fs::read(task.workspace().plugin_config_path()).unwrap())
                .unwrap();
        assert_eq!(plugin["source_dir"], "/tmp/unstaged");
        assert_eq!(plugin["dest_dir"], "/tmp/staged");
        assert_eq!(plugin["staged_droplet_path"], "/tmp/droplet.tgz");
        assert_eq!(plugin["properties"]["runtime_name"], "ruby18");

        let platform: serde_json::Value = serde_json::from_slice(
            &std::fs::read(task.workspace().platform_config_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(platform["cache_dir"], "/tmp/cache");

        assert!(task.workspace().staged_droplet_dir().is_dir());
    }

    #[test]
    fn test_prepare_workspace_carries_buildpack_cache_uri() {
        let base = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        let transport = Arc::new(FakeTransport::new());
        let attributes = StagingAttributes::new(
            "http://platform/apps/1/bits",
            "http://platform/droplets/1",
            StagingProperties::new("ruby18", "sinatra")
                .with_buildpack_cache_uri("http://platform/cache/1"),
        );
        let task = StagingTask::new(
            staging_config(base.path()),
            attributes,
            runtime,
            transport,
        )
        .unwrap();

        task.prepare_workspace().unwrap();
        let plugin: serde_json::Value =
            serde_json::from_slice(&std::fs::read(task.workspace().plugin_config_path()).unwrap())
                .unwrap();
        assert_eq!(plugin["properties"]["buildpack_cache_uri"], "http://platform/cache/1");
    }

    #[tokio::test]
    async fn test_download_promise_renames_into_place() {
        let base = tempfile::tempdir().unwrap();
        let (task, _, transport) = task_with_fakes(base.path());
        transport.set_archive_bytes(b"application bits".to_vec());
        task.prepare_workspace().unwrap();

        task.promise_app_download().resolve().await.unwrap();

        let app = task.workspace().downloaded_app_path();
        assert_eq!(std::fs::read(&app).unwrap(), b"application bits");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_promise_sets_archive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let base = tempfile::tempdir().unwrap();
        let (task, _, _) = task_with_fakes(base.path());
        task.prepare_workspace().unwrap();

        task.promise_app_download().resolve().await.unwrap();

        let mode = std::fs::metadata(task.workspace().downloaded_app_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o744);
    }

    #[test]
    fn test_bind_mounts_workspace_then_platform_dirs() {
        let base = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        let transport = Arc::new(FakeTransport::new());
        let config = staging_config(base.path())
            .with_bind_mount(BindMount::read_only("/var/cache/buildpacks", "/var/cache/buildpacks"));
        let task = StagingTask::new(config, staging_attributes(), runtime, transport).unwrap();

        let mounts = task.bind_mounts();
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].source, task.workspace().root());
        assert_eq!(mounts[0].mode, BindMountMode::ReadWrite);
        assert!(mounts[1].is_read_only());
        assert!(mounts[2].is_read_only());
        assert_eq!(mounts[3].source, PathBuf::from("/var/cache/buildpacks"));
    }
}
