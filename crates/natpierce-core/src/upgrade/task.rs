//! One in-flight upgrade.

use crate::cancel::CancellationToken;
use crate::error::NatpierceError;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Completion state of an upgrade task.
#[derive(Debug, Clone)]
pub enum TaskState {
    Running,
    Succeeded,
    Failed(Arc<NatpierceError>),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

/// Registry entry: the task's handle plus what callers need to attach to it.
pub(crate) struct UpgradeTask {
    pub(crate) id: u64,
    pub(crate) version: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) state: watch::Receiver<TaskState>,
    pub(crate) handle: JoinHandle<()>,
}

impl UpgradeTask {
    /// True once the task reported an outcome or stopped without one.
    pub(crate) fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal() || self.handle.is_finished()
    }
}
