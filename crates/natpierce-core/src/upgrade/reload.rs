//! Restarting the host's plugin loader after a self-upgrade.

use crate::config::AppConfig;
use crate::error::{NatpierceError, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

/// Makes the host pick up freshly installed package files.
#[async_trait]
pub trait HostReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Restarts a systemd unit (`systemctl restart <unit>`).
#[derive(Debug, Clone)]
pub struct SystemctlReloader {
    unit: String,
}

impl SystemctlReloader {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

impl Default for SystemctlReloader {
    fn default() -> Self {
        Self::new(AppConfig::PLUGIN_LOADER_UNIT)
    }
}

#[async_trait]
impl HostReloader for SystemctlReloader {
    async fn reload(&self) -> Result<()> {
        info!("Restarting {}", self.unit);
        let mut cmd = Command::new("systemctl");
        cmd.arg("restart").arg(&self.unit);
        crate::platform::scrub_env(&mut cmd);

        let output = cmd.output().await.map_err(|e| NatpierceError::ReloadFailed {
            code: None,
            stderr: e.to_string(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(NatpierceError::ReloadFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
