//! Environment checks run before the core is spawned.
//!
//! The core needs a kernel networking module and IP forwarding. The module
//! is checked first because forwarding is meaningless without it.

use crate::config::ProcessConfig;
use crate::error::{NatpierceError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Where the pre-flight looks and which helpers it runs.
#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub module: String,
    /// Directory listing loaded modules (`/sys/module`).
    pub sys_module_dir: PathBuf,
    /// Forwarding control file (`/proc/sys/net/ipv4/ip_forward`).
    pub ip_forward_path: PathBuf,
    pub modinfo_program: PathBuf,
    pub modprobe_program: PathBuf,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            module: ProcessConfig::KERNEL_MODULE.to_string(),
            sys_module_dir: PathBuf::from(ProcessConfig::SYS_MODULE_DIR),
            ip_forward_path: PathBuf::from(ProcessConfig::IP_FORWARD_PATH),
            modinfo_program: PathBuf::from("modinfo"),
            modprobe_program: PathBuf::from("modprobe"),
        }
    }
}

/// Runs the environment checks.
#[derive(Debug, Clone, Default)]
pub struct Preflight {
    config: PreflightConfig,
}

impl Preflight {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreflightConfig {
        &self.config
    }

    /// Ensure the kernel module is loaded, then that forwarding is on.
    pub async fn run(&self) -> Result<()> {
        self.ensure_module().await?;
        self.ensure_ip_forward().await
    }

    async fn ensure_module(&self) -> Result<()> {
        let module = &self.config.module;
        let loaded = tokio::fs::try_exists(self.config.sys_module_dir.join(module))
            .await
            .unwrap_or(false);
        if loaded {
            debug!("Kernel module {} is loaded", module);
            return Ok(());
        }

        if !self.helper_succeeds(&self.config.modinfo_program).await? {
            return Err(NatpierceError::KernelModuleUnavailable {
                module: module.clone(),
                message: "module is not present on this system".into(),
            });
        }

        info!("Loading kernel module {}", module);
        if !self.helper_succeeds(&self.config.modprobe_program).await? {
            return Err(NatpierceError::KernelModuleUnavailable {
                module: module.clone(),
                message: "failed to load module, insufficient privilege".into(),
            });
        }
        Ok(())
    }

    async fn helper_succeeds(&self, program: &std::path::Path) -> Result<bool> {
        let mut cmd = Command::new(program);
        cmd.arg(&self.config.module);
        crate::platform::scrub_env(&mut cmd);

        match cmd.output().await {
            Ok(output) => {
                if !output.status.success() {
                    debug!(
                        "{} {} failed: {}",
                        program.display(),
                        self.config.module,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(output.status.success())
            }
            Err(e) => {
                warn!("Failed to run {}: {}", program.display(), e);
                Ok(false)
            }
        }
    }

    async fn ensure_ip_forward(&self) -> Result<()> {
        let path = &self.config.ip_forward_path;
        let current = tokio::fs::read_to_string(path).await.map_err(|e| {
            NatpierceError::IpForwarding {
                message: describe_io(&e, path, "read"),
            }
        })?;

        if current.trim() == "1" {
            debug!("IP forwarding is enabled");
            return Ok(());
        }

        info!("Enabling IP forwarding");
        tokio::fs::write(path, b"1")
            .await
            .map_err(|e| NatpierceError::IpForwarding {
                message: describe_io(&e, path, "enable"),
            })
    }
}

fn describe_io(err: &std::io::Error, path: &std::path::Path, action: &str) -> String {
    match err.kind() {
        ErrorKind::NotFound => format!("{} does not exist", path.display()),
        ErrorKind::PermissionDenied => {
            format!("permission denied trying to {} {}", action, path.display())
        }
        _ => format!("failed to {} {}: {}", action, path.display(), err),
    }
}
