//! Kind-specific install procedures.
//!
//! Both procedures download first and only then touch the installed files,
//! so a failed or cancelled download leaves the installation as it was.
//! Once the swap begins it runs to completion on a blocking thread.

use super::fs_ops;
use super::progress::ProgressReporter;
use super::reload::HostReloader;
use super::versions::normalize_version;
use crate::cancel::CancellationToken;
use crate::config::{InstallPaths, ResourceKind, SourceConfig};
use crate::error::{NatpierceError, Result};
use crate::network::{artifact_file_name, ArtifactFetcher, DownloadProgress};
use crate::platform;
use crate::settings::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything an install needs from its surroundings.
#[derive(Clone)]
pub struct InstallContext {
    pub paths: InstallPaths,
    pub sources: SourceConfig,
    pub settings: Settings,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub reloader: Arc<dyn HostReloader>,
    /// System user the installation belongs to; `None` leaves ownership alone.
    pub owner: Option<String>,
}

pub(crate) struct Installer {
    ctx: InstallContext,
}

impl Installer {
    pub(crate) fn new(ctx: InstallContext) -> Self {
        Self { ctx }
    }

    pub(crate) fn context(&self) -> &InstallContext {
        &self.ctx
    }

    pub(crate) async fn install(
        &self,
        kind: ResourceKind,
        version: &str,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        match kind {
            ResourceKind::Plugin => self.install_plugin(version, cancel, reporter).await,
            ResourceKind::Core => self.install_core(version, cancel, reporter).await,
        }
    }

    async fn install_plugin(
        &self,
        version: &str,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let archive = self
            .download(ResourceKind::Plugin, version, cancel, reporter)
            .await?;
        checkpoint(cancel, &archive)?;

        let swap = PluginSwap {
            plugin_dir: self.ctx.paths.plugin_dir.clone(),
            bin_dir: self.ctx.paths.bin_dir(),
            backup_dir: self.ctx.paths.bin_backup_dir(),
            scratch_parent: self.ctx.paths.runtime_dir.clone(),
            archive,
            archive_root: self.ctx.sources.plugin_archive_root.clone(),
            owner: self.ctx.owner.clone(),
        };
        run_blocking(move || swap.run()).await?;

        info!("Plugin {} installed, restarting host loader", version);
        self.ctx.reloader.reload().await
    }

    async fn install_core(
        &self,
        version: &str,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let artifact = self
            .download(ResourceKind::Core, version, cancel, reporter)
            .await?;
        checkpoint(cancel, &artifact)?;

        let swap = CoreSwap {
            bin_dir: self.ctx.paths.bin_dir(),
            binary: self.ctx.paths.core_binary(),
            artifact,
            owner: self.ctx.owner.clone(),
        };
        run_blocking(move || swap.run()).await?;

        if let Some(installed) = normalize_version(version) {
            if let Err(e) = self.ctx.settings.set_core_version(&installed) {
                warn!("Failed to record core version {}: {}", installed, e);
            }
        }
        info!("Core {} installed", version);
        Ok(())
    }

    async fn download(
        &self,
        kind: ResourceKind,
        version: &str,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf> {
        let url = kind.download_url(&self.ctx.sources, version);
        let dest = self.ctx.paths.downloads_dir().join(artifact_file_name(&url));
        info!("Downloading {} {} from {}", kind, version, url);

        reporter.start();
        let on_progress = |progress: DownloadProgress| reporter.on_download(progress);
        let bytes = self
            .ctx
            .fetcher
            .fetch_to_file(&url, &dest, &on_progress, cancel)
            .await?;

        if !tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Err(NatpierceError::InstallationFailed {
                message: format!("Downloaded artifact missing at {}", dest.display()),
            });
        }
        debug!("Downloaded {} bytes for {} {}", bytes, kind, version);
        reporter.complete();
        Ok(dest)
    }
}

/// Last point at which an install may be cancelled.
fn checkpoint(cancel: &CancellationToken, artifact: &Path) -> Result<()> {
    if let Err(cancelled) = cancel.check() {
        info!("Upgrade cancelled before install, discarding {}", artifact.display());
        fs_ops::discard(artifact);
        return Err(cancelled.into());
    }
    Ok(())
}

async fn run_blocking<F>(job: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| NatpierceError::InstallationFailed {
            message: format!("Install step aborted: {}", e),
        })?
}

/// Replace the package directory while keeping its `bin` subdirectory.
struct PluginSwap {
    plugin_dir: PathBuf,
    bin_dir: PathBuf,
    backup_dir: PathBuf,
    scratch_parent: PathBuf,
    archive: PathBuf,
    archive_root: String,
    owner: Option<String>,
}

impl PluginSwap {
    fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.scratch_parent)
            .map_err(|e| NatpierceError::io_with_path(e, &self.scratch_parent))?;
        let scratch = tempfile::Builder::new()
            .prefix("plugin-")
            .tempdir_in(&self.scratch_parent)
            .map_err(|e| NatpierceError::io_with_path(e, &self.scratch_parent))?;

        // Unpack before anything is removed: a bad archive fails here.
        fs_ops::extract_zip(&self.archive, scratch.path())?;
        let content = fs_ops::archive_content_root(scratch.path(), &self.archive_root)?;

        if self.plugin_dir.exists() {
            platform::add_mode_recursive(&self.plugin_dir, 0o200)?;
        }

        let has_backup = self.bin_dir.is_dir();
        if has_backup {
            fs_ops::remove_if_exists(&self.backup_dir)?;
            fs_ops::copy_dir_recursive(&self.bin_dir, &self.backup_dir)?;
            debug!("Backed up {} to {}", self.bin_dir.display(), self.backup_dir.display());
        }

        fs_ops::remove_if_exists(&self.plugin_dir)?;

        if let Err(e) = fs_ops::copy_dir_recursive(&content, &self.plugin_dir) {
            error!("Failed to install package files: {}", e);
            if has_backup {
                self.restore_bin();
            }
            return Err(e);
        }

        // Merge the backup over the new `bin`: kept binaries win, files the
        // package ships alongside them stay.
        if has_backup {
            fs_ops::copy_dir_recursive(&self.backup_dir, &self.bin_dir)?;
            fs_ops::discard(&self.backup_dir);
        }

        if self.bin_dir.exists() {
            platform::add_mode_recursive(&self.bin_dir, 0o111)?;
        }
        if let Some(owner) = &self.owner {
            platform::chown_recursive(&self.plugin_dir, owner)?;
        }

        fs_ops::discard(&self.archive);
        Ok(())
    }

    /// Put `bin` back after a failed copy so the core still runs.
    fn restore_bin(&self) {
        let result = fs_ops::remove_if_exists(&self.bin_dir)
            .and_then(|_| fs_ops::copy_dir_recursive(&self.backup_dir, &self.bin_dir));
        match result {
            Ok(()) => warn!("Restored {} after failed install", self.bin_dir.display()),
            Err(e) => error!(
                "Failed to restore {} (backup kept at {}): {}",
                self.bin_dir.display(),
                self.backup_dir.display(),
                e
            ),
        }
    }
}

/// Replace the core binary with a freshly decompressed one.
struct CoreSwap {
    bin_dir: PathBuf,
    binary: PathBuf,
    artifact: PathBuf,
    owner: Option<String>,
}

impl CoreSwap {
    fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.bin_dir)
            .map_err(|e| NatpierceError::io_with_path(e, &self.bin_dir))?;

        let mut staged = self.binary.clone().into_os_string();
        staged.push(".part");
        let staged = PathBuf::from(staged);

        if let Err(e) = fs_ops::gunzip_file(&self.artifact, &staged) {
            fs_ops::discard(&staged);
            return Err(e);
        }

        fs_ops::remove_if_exists(&self.binary)?;
        std::fs::rename(&staged, &self.binary)
            .map_err(|e| NatpierceError::io_with_path(e, &self.binary))?;
        platform::set_executable(&self.binary)?;
        if let Some(owner) = &self.owner {
            platform::chown_recursive(&self.binary, owner)?;
        }

        fs_ops::discard(&self.artifact);
        Ok(())
    }
}
