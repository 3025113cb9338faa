//! Process termination.

use crate::error::{NatpierceError, Result};
use tracing::debug;

/// Ask a process to exit (SIGTERM).
///
/// Does not wait for the process; reaping belongs to whoever owns the handle.
/// A process that is already gone counts as success.
pub fn terminate_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| NatpierceError::Other(format!("Invalid pid {}", pid)))?;
        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(NatpierceError::Other(format!(
                "Failed to send SIGTERM to {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        debug!("Termination of {} not supported on this platform", pid);
        Err(NatpierceError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_terminate_running_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        terminate_process(pid).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after SIGTERM")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_reaped_process_is_ok() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        // pid no longer exists (ESRCH) or was recycled into something we may
        // not signal; both must not panic.
        let _ = terminate_process(pid);
    }
}
