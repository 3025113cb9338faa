//! Download progress events addressed by resource kind.

use crate::config::ResourceKind;
use crate::network::DownloadProgress;
use serde::Serialize;
use std::sync::atomic::{AtomicI16, Ordering};
use tokio::sync::broadcast;

/// One step of an upgrade's download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeProgress {
    Percent(u8),
    /// Sentinel emitted once the artifact is fully on disk.
    Complete,
}

impl UpgradeProgress {
    /// Value sent to observers: the percent, or `-1` for completion.
    pub fn wire_value(&self) -> i32 {
        match self {
            UpgradeProgress::Percent(p) => i32::from(*p),
            UpgradeProgress::Complete => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub kind: ResourceKind,
    pub progress: UpgradeProgress,
}

impl ProgressEvent {
    /// Event name observers listen on, e.g. `dl_core_progress`.
    pub fn event_name(&self) -> String {
        format!("dl_{}_progress", self.kind)
    }
}

/// Turns raw byte counts into de-duplicated percent events.
pub(crate) struct ProgressReporter {
    kind: ResourceKind,
    sender: broadcast::Sender<ProgressEvent>,
    last_percent: AtomicI16,
}

impl ProgressReporter {
    pub(crate) fn new(kind: ResourceKind, sender: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            kind,
            sender,
            last_percent: AtomicI16::new(-1),
        }
    }

    /// Emit `Percent(0)` as the download begins, even when the size is unknown.
    pub(crate) fn start(&self) {
        if self.last_percent.fetch_max(0, Ordering::SeqCst) < 0 {
            self.emit(UpgradeProgress::Percent(0));
        }
    }

    /// Emit a percent event if the whole percent moved forward.
    pub(crate) fn on_download(&self, progress: DownloadProgress) {
        let Some(percent) = progress.percent() else {
            return;
        };
        let previous = self.last_percent.fetch_max(i16::from(percent), Ordering::SeqCst);
        if i16::from(percent) > previous {
            self.emit(UpgradeProgress::Percent(percent));
        }
    }

    pub(crate) fn complete(&self) {
        self.emit(UpgradeProgress::Complete);
    }

    fn emit(&self, progress: UpgradeProgress) {
        // no subscribers is fine
        let _ = self.sender.send(ProgressEvent {
            kind: self.kind,
            progress,
        });
    }
}
