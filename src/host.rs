//! Access to the host being provisioned.
//!
//! [`Host`] bundles the filesystem root, the command executor and the
//! dry-run flag. Steps address files by their absolute in-host path
//! (`/etc/hosts`); `Host` maps them under its root, so the same steps run
//! against `/`, a mounted image, or a test directory.

use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::document::Passwd;
use crate::error::ProvisionError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult, execute_checked};

/// Suffix of staging files written next to their final path before a rename.
const STAGING_SUFFIX: &str = ".hostprep-tmp";

/// Format of the timestamp appended to backup copies.
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Sets Unix file permissions on the given path.
#[cfg(unix)]
pub(crate) fn set_file_mode(path: &Utf8Path, mode: u32) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| ProvisionError::io(format!("failed to read metadata for {}", path), e))?
        .permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
        .map_err(|e| ProvisionError::io(format!("failed to set permissions on {}", path), e))
}

#[cfg(not(unix))]
pub(crate) fn set_file_mode(_path: &Utf8Path, _mode: u32) -> Result<(), ProvisionError> {
    Ok(())
}

/// Returns the permission bits of `path`, if it exists.
#[cfg(unix)]
pub fn file_mode(path: &Utf8Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn file_mode(_path: &Utf8Path) -> Option<u32> {
    None
}

fn optional_content(
    path: &Utf8Path,
    read: io::Result<String>,
    dry_run: bool,
) -> Result<Option<String>, ProvisionError> {
    match read {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if dry_run && e.kind() == io::ErrorKind::PermissionDenied => {
            warn!("dry run: cannot read {}; assuming it must be written", path);
            Ok(None)
        }
        Err(e) => Err(ProvisionError::io(format!("failed to read {}", path), e)),
    }
}

/// The host a provisioning run targets.
#[derive(Clone)]
pub struct Host {
    root: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
    dry_run: bool,
}

impl Host {
    pub fn new(root: impl Into<Utf8PathBuf>, executor: Arc<dyn CommandExecutor>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            executor,
            dry_run,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn executor(&self) -> &dyn CommandExecutor {
        self.executor.as_ref()
    }

    /// Maps an absolute in-host path under the host root.
    pub fn path(&self, in_host: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        let in_host = in_host.as_ref();
        match in_host.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(in_host),
        }
    }

    pub fn exists(&self, in_host: impl AsRef<Utf8Path>) -> bool {
        self.path(in_host).exists()
    }

    /// Reads a file, returning `None` if it does not exist.
    ///
    /// In dry-run mode an unreadable file also reads as `None`, so an
    /// unprivileged preview reports the change as pending instead of failing.
    pub fn read_optional(&self, in_host: impl AsRef<Utf8Path>) -> Result<Option<String>, ProvisionError> {
        let path = self.path(in_host);
        optional_content(&path, fs::read_to_string(&path), self.dry_run)
    }

    /// Reads the passwd database; a missing file yields an empty database.
    pub fn passwd(&self) -> Result<Passwd, ProvisionError> {
        Ok(Passwd::parse(&self.read_optional("/etc/passwd")?.unwrap_or_default()))
    }

    /// Writes `content` to a file with the given mode, replacing it atomically.
    ///
    /// The content goes to a staging file in the same directory which is then
    /// renamed over the target, so readers never see a partial file. In
    /// dry-run mode nothing is written.
    pub fn write_file(
        &self,
        in_host: impl AsRef<Utf8Path>,
        content: &str,
        mode: u32,
    ) -> Result<(), ProvisionError> {
        let path = self.path(in_host);
        if self.dry_run {
            info!("would write {} ({} bytes, mode {:o})", path, content.len(), mode);
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProvisionError::io(format!("failed to create {}", parent), e))?;
        }
        let staging = Utf8PathBuf::from(format!("{}{}", path, STAGING_SUFFIX));
        fs::write(&staging, content)
            .map_err(|e| ProvisionError::io(format!("failed to write {}", staging), e))?;
        set_file_mode(&staging, mode)?;
        fs::rename(&staging, &path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            ProvisionError::io(format!("failed to move {} into place", path), e)
        })?;
        debug!("wrote {}", path);
        Ok(())
    }

    /// Removes a file if it exists.
    pub fn remove_file(&self, in_host: impl AsRef<Utf8Path>) -> Result<(), ProvisionError> {
        let path = self.path(in_host);
        if self.dry_run {
            info!("would remove {}", path);
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::io(format!("failed to remove {}", path), e)),
        }
    }

    /// Creates a directory (and parents) and sets its mode.
    pub fn create_dir(&self, in_host: impl AsRef<Utf8Path>, mode: u32) -> Result<(), ProvisionError> {
        let path = self.path(in_host);
        if self.dry_run {
            info!("would create directory {} (mode {:o})", path, mode);
            return Ok(());
        }
        fs::create_dir_all(&path)
            .map_err(|e| ProvisionError::io(format!("failed to create {}", path), e))?;
        set_file_mode(&path, mode)
    }

    /// Copies a file to `<file>.hostprep-<timestamp>` before it is edited.
    ///
    /// Returns the backup path, or `None` if the file does not exist or this
    /// is a dry run.
    pub fn backup(&self, in_host: impl AsRef<Utf8Path>) -> Result<Option<Utf8PathBuf>, ProvisionError> {
        let path = self.path(in_host);
        if !path.exists() {
            return Ok(None);
        }
        let stamp = chrono::Local::now().format(BACKUP_TIMESTAMP_FORMAT);
        let backup = Utf8PathBuf::from(format!("{}.hostprep-{}", path, stamp));
        if self.dry_run {
            info!("would back up {} to {}", path, backup);
            return Ok(None);
        }
        fs::copy(&path, &backup)
            .map_err(|e| ProvisionError::io(format!("failed to back up {} to {}", path, backup), e))?;
        info!("backed up {} to {}", path, backup);
        Ok(Some(backup))
    }

    /// Runs a command and fails on a non-zero exit status.
    pub fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        debug!("running: {}", spec);
        execute_checked(self.executor.as_ref(), spec)
    }

    /// Runs a command and reports whether it exited successfully.
    ///
    /// Used for probes (`id -u`, `visudo -c`) where a non-zero exit is an
    /// answer rather than an error. In dry-run mode the probe is assumed to
    /// succeed.
    pub fn probe(&self, spec: &CommandSpec) -> Result<bool> {
        debug!("probing: {}", spec);
        Ok(self.executor.execute(spec)?.success())
    }
}
