//! Lifecycle of the supervised core process.

use super::launcher::{self, CoreLaunchConfig, LaunchedCore};
use super::preflight::Preflight;
use super::version;
use crate::config::{InstallPaths, ProcessConfig};
use crate::error::{NatpierceError, Result};
use crate::platform;
use crate::settings::Settings;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fs::File;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handler invoked once with the exit code when the core exits on its own.
pub type ExitCallback = Arc<dyn Fn(Option<i32>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The live core: watcher task plus the log file its output goes to.
///
/// Dropping it closes the log, so every path that clears the slot releases
/// the file exactly once.
struct ManagedProcess {
    pid: Option<u32>,
    port: u16,
    command: String,
    generation: u64,
    watcher: JoinHandle<()>,
    _log: File,
}

#[derive(Default)]
struct ProcessSlot {
    current: Option<ManagedProcess>,
    generation: u64,
    last_exit_code: Option<i32>,
}

type SharedSlot = Arc<Mutex<ProcessSlot>>;
type SharedCallback = Arc<Mutex<Option<ExitCallback>>>;

/// Starts, stops and observes the core process.
pub struct CoreSupervisor {
    paths: InstallPaths,
    settings: Settings,
    preflight: Preflight,
    slot: SharedSlot,
    exit_callback: SharedCallback,
    /// Serializes `start`/`stop` so a caller never sees a half-started core.
    lifecycle: tokio::sync::Mutex<()>,
}

impl CoreSupervisor {
    pub fn new(paths: InstallPaths, settings: Settings, preflight: Preflight) -> Self {
        Self {
            paths,
            settings,
            preflight,
            slot: Arc::new(Mutex::new(ProcessSlot::default())),
            exit_callback: Arc::new(Mutex::new(None)),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    /// Start the core, stopping a live one first.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        self.preflight.run().await?;
        self.link_config().await?;

        if self.is_running() {
            warn!("Core is already running, restarting it");
            match self.stop_locked() {
                Ok(()) | Err(NatpierceError::NotRunning) => {}
                Err(e) => return Err(e),
            }
        }

        let port = self.settings.controller_port();
        let config = CoreLaunchConfig::new(self.paths.core_binary(), port, self.paths.core_log());

        // Hold the slot while spawning so the watcher cannot observe the
        // exit before the process is registered.
        let mut slot = lock(&self.slot);
        let LaunchedCore {
            child,
            log,
            command,
        } = launcher::launch(&config)?;

        slot.generation += 1;
        slot.last_exit_code = None;
        let generation = slot.generation;
        let pid = child.id();
        let watcher = tokio::spawn(watch_exit(
            child,
            generation,
            Arc::clone(&self.slot),
            Arc::clone(&self.exit_callback),
        ));

        slot.current = Some(ManagedProcess {
            pid,
            port,
            command,
            generation,
            watcher,
            _log: log,
        });
        info!("Core started (PID: {:?}, port {})", pid, port);
        Ok(())
    }

    /// Stop the core.
    ///
    /// Fails with [`NatpierceError::NotRunning`] if nothing is live. A failed
    /// termination signal is logged; the supervisor still ends up stopped.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked()
    }

    /// `start()` under its restart name.
    pub async fn restart(&self) -> Result<()> {
        self.start().await
    }

    fn stop_locked(&self) -> Result<()> {
        let process = lock(&self.slot)
            .current
            .take()
            .ok_or(NatpierceError::NotRunning)?;

        info!("Terminating core (PID: {:?})", process.pid);
        process.watcher.abort();

        if let Some(pid) = process.pid {
            if let Err(e) = platform::terminate_process(pid) {
                error!("Failed to terminate core: {}", e);
            }
        }

        drop(process);
        debug!("Core terminated");
        Ok(())
    }

    /// True while a started core has not been stopped and has not exited.
    pub fn is_running(&self) -> bool {
        lock(&self.slot).current.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.slot).current.as_ref().and_then(|p| p.pid)
    }

    /// Port of the live core, if any.
    pub fn port(&self) -> Option<u16> {
        lock(&self.slot).current.as_ref().map(|p| p.port)
    }

    pub fn command(&self) -> Option<String> {
        lock(&self.slot).current.as_ref().map(|p| p.command.clone())
    }

    /// Exit code of the last unsolicited exit, cleared by the next `start()`.
    pub fn last_exit_code(&self) -> Option<i32> {
        lock(&self.slot).last_exit_code
    }

    /// Register (or clear) the exit handler. Only one handler is kept.
    pub fn set_exit_callback(&self, callback: Option<ExitCallback>) {
        *lock(&self.exit_callback) = callback;
    }

    /// Version of the core.
    ///
    /// While running, the most recent banner in the live log. Otherwise the
    /// recorded install-time version when the binary exists, probing the
    /// binary once if nothing was recorded. Empty when unknown.
    pub async fn get_version(&self) -> String {
        if self.is_running() {
            return version::read_log_version(&self.paths.core_log()).await;
        }

        let binary = self.paths.core_binary();
        if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return String::new();
        }

        let recorded = self.settings.core_version();
        if !recorded.is_empty() {
            return recorded;
        }

        match version::probe_version(&binary, ProcessConfig::VERSION_PROBE_TIMEOUT).await {
            Ok(found) if !found.is_empty() => {
                if let Err(e) = self.settings.set_core_version(&found) {
                    warn!("Failed to record core version: {}", e);
                }
                found
            }
            Ok(_) => String::new(),
            Err(e) => {
                error!("Failed to probe core version: {}", e);
                String::new()
            }
        }
    }

    /// Point `bin/data/config` at the durable configuration path.
    async fn link_config(&self) -> Result<()> {
        let link = self.paths.core_config_link();
        let target = self.paths.durable_core_config();

        let result: std::io::Result<()> = async {
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                tokio::fs::remove_file(&link).await?;
            }
            symlink(&target, &link).await
        }
        .await;

        result.map_err(|e| {
            error!("Failed to link config: {}", e);
            NatpierceError::io_with_path(e, link)
        })
    }
}

impl Drop for CoreSupervisor {
    fn drop(&mut self) {
        if let Some(process) = lock(&self.slot).current.take() {
            process.watcher.abort();
        }
    }
}

#[cfg(unix)]
async fn symlink(target: &std::path::Path, link: &std::path::Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(_target: &std::path::Path, link: &std::path::Path) -> std::io::Result<()> {
    warn!("Symlinks unsupported, skipping {}", link.display());
    Ok(())
}

/// Wait for the child, clear the slot if it still belongs to this launch,
/// then notify the exit handler.
async fn watch_exit(mut child: Child, generation: u64, slot: SharedSlot, callback: SharedCallback) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for core: {}", e);
            None
        }
    };
    debug!("Core exited with code: {:?}", code);

    let released = {
        let mut slot = lock(&slot);
        if slot.current.as_ref().map(|p| p.generation) == Some(generation) {
            slot.last_exit_code = code;
            slot.current.take()
        } else {
            None
        }
    };
    if released.is_none() {
        return;
    }
    drop(released);

    let handler = lock(&callback).clone();
    if let Some(handler) = handler {
        match AssertUnwindSafe(handler(code)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Error in exit callback: {}", e),
            Err(_) => error!("Exit callback panicked"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
