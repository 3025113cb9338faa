//! Upgrade engine: per-kind upgrade tasks and the latest-version cache.
//!
//! At most one task runs per [`ResourceKind`]. A request for a kind that
//! already has a running task attaches to it, so every concurrent caller
//! observes the same outcome. Finished tasks leave the registry, making the
//! kind eligible for a fresh upgrade.

mod fs_ops;
mod installer;
mod progress;
mod reload;
mod task;
mod versions;

pub use fs_ops::{copy_dir_recursive, remove_if_exists};
pub use installer::InstallContext;
pub use progress::{ProgressEvent, UpgradeProgress};
pub use reload::{HostReloader, SystemctlReloader};
pub use task::TaskState;
pub use versions::{normalize_version, VersionQueryCache};

use crate::cancel::CancellationToken;
use crate::config::ResourceKind;
use crate::error::{NatpierceError, Result};
use installer::Installer;
use progress::ProgressReporter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use task::UpgradeTask;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

struct EngineInner {
    installer: Installer,
    versions: VersionQueryCache,
    progress: broadcast::Sender<ProgressEvent>,
    tasks: Mutex<HashMap<ResourceKind, UpgradeTask>>,
    next_id: AtomicU64,
}

impl EngineInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<ResourceKind, UpgradeTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the task for `kind` if it is still the one with `id`.
    fn retire(&self, kind: ResourceKind, id: u64) {
        let mut tasks = self.tasks();
        if tasks.get(&kind).is_some_and(|t| t.id == id) {
            tasks.remove(&kind);
            debug!("Retired {} upgrade task {}", kind, id);
        }
    }
}

/// Downloads and installs new versions of the plugin and the core.
///
/// Cloning is cheap; clones share the task registry and version cache.
#[derive(Clone)]
pub struct UpgradeEngine {
    inner: Arc<EngineInner>,
}

impl UpgradeEngine {
    pub fn new(ctx: InstallContext) -> Self {
        let versions = VersionQueryCache::new(Arc::clone(&ctx.fetcher), ctx.sources.clone());
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                installer: Installer::new(ctx),
                versions,
                progress,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Upgrade `kind` to `version`, or wait for the upgrade already running.
    ///
    /// Returns [`NatpierceError::UpgradeCancelled`] if the task was cancelled
    /// and [`NatpierceError::UpgradeFailed`] wrapping the cause if it failed.
    pub async fn upgrade(&self, kind: ResourceKind, version: &str) -> Result<()> {
        let mut state = {
            let mut tasks = self.inner.tasks();

            if tasks.get(&kind).is_some_and(UpgradeTask::is_terminal) {
                tasks.remove(&kind);
                debug!("Removed finished {} upgrade task", kind);
            }

            match tasks.get(&kind) {
                Some(task) => {
                    warn!(
                        "Duplicate upgrade attempt for {} ({} requested while {} is in progress), waiting for it",
                        kind, version, task.version
                    );
                    task.state.clone()
                }
                None => {
                    let task = self.spawn_task(kind, version);
                    let state = task.state.clone();
                    tasks.insert(kind, task);
                    state
                }
            }
        };

        let outcome = match state.wait_for(TaskState::is_terminal).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => TaskState::Failed(Arc::new(NatpierceError::Other(format!(
                "{} upgrade task ended without an outcome",
                kind
            )))),
        };

        match outcome {
            TaskState::Succeeded => Ok(()),
            TaskState::Cancelled => Err(NatpierceError::UpgradeCancelled { kind }),
            TaskState::Failed(source) => Err(NatpierceError::UpgradeFailed { kind, source }),
            TaskState::Running => Err(NatpierceError::Other(format!(
                "{} upgrade still running",
                kind
            ))),
        }
    }

    /// Request cancellation of the running upgrade for `kind`, if any.
    pub fn cancel_upgrade(&self, kind: ResourceKind) {
        let tasks = self.inner.tasks();
        match tasks.get(&kind) {
            Some(task) if !task.is_terminal() => {
                info!("Cancelling {} upgrade to {}", kind, task.version);
                task.cancel.cancel();
            }
            _ => debug!("No {} upgrade to cancel", kind),
        }
    }

    pub fn is_upgrading(&self, kind: ResourceKind) -> bool {
        self.inner
            .tasks()
            .get(&kind)
            .is_some_and(|task| !task.is_terminal())
    }

    /// Subscribe to download progress of every upgrade.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    /// Latest available version of `kind`, debounced per kind.
    pub async fn get_latest_version(
        &self,
        kind: ResourceKind,
        timeout: Duration,
        debounce_time: Duration,
    ) -> Result<String> {
        self.inner
            .versions
            .get_latest_version(kind, timeout, debounce_time)
            .await
    }

    pub fn context(&self) -> &InstallContext {
        self.inner.installer.context()
    }

    /// Cancel every running upgrade.
    pub fn cancel_all(&self) {
        for kind in ResourceKind::ALL {
            self.cancel_upgrade(kind);
        }
    }

    fn spawn_task(&self, kind: ResourceKind, version: &str) -> UpgradeTask {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(TaskState::Running);
        info!("Starting {} upgrade to {} (task {})", kind, version, id);

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let target = version.to_string();
        let handle = tokio::spawn(async move {
            let reporter = ProgressReporter::new(kind, inner.progress.clone());
            let result = inner
                .installer
                .install(kind, &target, &token, &reporter)
                .await;

            let state = match result {
                Ok(()) => {
                    info!("Upgrade of {} to {} succeeded", kind, target);
                    TaskState::Succeeded
                }
                Err(e) if e.is_cancellation() => {
                    info!("Upgrade of {} to {} cancelled", kind, target);
                    TaskState::Cancelled
                }
                Err(e) => {
                    error!("Upgrade of {} to {} failed: {}", kind, target, e);
                    TaskState::Failed(Arc::new(e))
                }
            };

            inner.retire(kind, id);
            let _ = tx.send(state);
        });

        UpgradeTask {
            id,
            version: version.to_string(),
            cancel,
            state: rx,
            handle,
        }
    }
}
