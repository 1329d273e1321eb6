//! Fixed in-sandbox paths and shell script assembly.
//!
//! Every container sees the same layout: the application is unpacked under
//! [`UNSTAGED_DIR`], the plugin writes its result under [`STAGED_DIR`], and
//! the packed droplet lands at [`DROPLET_PATH`]. Host-side code composes
//! scripts against these constants and never inspects the container
//! filesystem directly.

use std::path::Path;

/// Scratch root inside the container.
pub const TMP_DIR: &str = "/tmp";

/// Directory the raw application archive is unpacked into.
pub const UNSTAGED_DIR: &str = "/tmp/unstaged";

/// Directory the build plugin stages the application into.
pub const STAGED_DIR: &str = "/tmp/staged";

/// Cache directory available to the build plugin across runs.
pub const CACHE_DIR: &str = "/tmp/cache";

/// Path of the packed droplet produced inside the container.
pub const DROPLET_PATH: &str = "/tmp/droplet.tgz";

/// Directory holding the staging log inside the container.
pub const STAGING_LOG_DIR: &str = "/tmp/staged/logs";

/// Path of the staging log inside the container.
pub const STAGING_LOG_PATH: &str = "/tmp/staged/logs/staging_task.log";

/// Shell-escape a string for safe interpolation.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    // Single-quoting in POSIX shell: replace ' with '\'' then wrap in '
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Shell-escape a Path for safe interpolation.
#[must_use]
pub fn shell_quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

/// Builds the script that unpacks the mounted application archive.
///
/// `app_path` is the archive's host path, visible inside the container
/// through the workspace bind mount.
#[must_use]
pub fn unpack_script(app_path: &Path) -> String {
    format!(
        "unzip -q {} -d {UNSTAGED_DIR}",
        shell_quote_path(app_path)
    )
}

/// Builds the script that packs the staged application into a droplet.
#[must_use]
pub fn pack_script() -> String {
    format!("cd {STAGED_DIR} && tar -czf {DROPLET_PATH} .")
}
