//! Spawning the core with captured output.

use crate::error::{NatpierceError, Result};
use crate::platform;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

/// How to launch the core.
#[derive(Debug, Clone)]
pub struct CoreLaunchConfig {
    /// Path to the core binary.
    pub binary: PathBuf,
    /// Controller port passed with `-p`.
    pub port: u16,
    /// Log file receiving stdout and stderr; truncated on every launch.
    pub log_file: PathBuf,
}

impl CoreLaunchConfig {
    pub fn new(binary: impl Into<PathBuf>, port: u16, log_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            port,
            log_file: log_file.into(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec!["-p".to_string(), self.port.to_string()]
    }

    /// Human-readable command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        parts.extend(self.args());
        parts.join(" ")
    }
}

/// A freshly spawned core and the log file its output goes to.
#[derive(Debug)]
pub struct LaunchedCore {
    pub child: Child,
    pub log: File,
    pub command: String,
}

/// Spawn the core described by `config`.
///
/// On failure the log file handle is released before the error is returned.
pub fn launch(config: &CoreLaunchConfig) -> Result<LaunchedCore> {
    let command = config.command_line();
    info!("Starting core: {}", command);

    if let Some(parent) = config.log_file.parent() {
        fs::create_dir_all(parent).map_err(|e| NatpierceError::io_with_path(e, parent))?;
    }
    info!("Core log file: {}", config.log_file.display());
    let log = File::create(&config.log_file)
        .map_err(|e| NatpierceError::io_with_path(e, &config.log_file))?;

    let stdout = log
        .try_clone()
        .map_err(|e| NatpierceError::io_with_path(e, &config.log_file))?;
    let stderr = log
        .try_clone()
        .map_err(|e| NatpierceError::io_with_path(e, &config.log_file))?;

    let mut cmd = Command::new(&config.binary);
    cmd.args(config.args())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(false);
    platform::scrub_env(&mut cmd);

    match cmd.spawn() {
        Ok(child) => {
            debug!("Core pid: {:?}", child.id());
            Ok(LaunchedCore {
                child,
                log,
                command,
            })
        }
        Err(e) => {
            error!("Failed to start core: {}", e);
            drop(log);
            Err(NatpierceError::SpawnFailed {
                command,
                message: e.to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_command_line() {
        let config = CoreLaunchConfig::new("/opt/np/bin/natpierce", 33272, "/tmp/core.log");
        assert_eq!(config.command_line(), "/opt/np/bin/natpierce -p 33272");
    }

    #[tokio::test]
    async fn test_output_goes_to_truncated_log() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("core.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"port $2\"\necho oops >&2\n").unwrap();
        crate::platform::set_executable(&script).unwrap();

        let log_file = temp_dir.path().join("logs").join("core.log");
        std::fs::create_dir_all(log_file.parent().unwrap()).unwrap();
        std::fs::write(&log_file, "stale output from a previous run\n").unwrap();

        let config = CoreLaunchConfig::new(&script, 40001, &log_file);
        let mut launched = launch(&config).unwrap();
        launched.child.wait().await.unwrap();

        let log = std::fs::read_to_string(&log_file).unwrap();
        assert!(log.contains("port 40001"));
        assert!(log.contains("oops"));
        assert!(!log.contains("stale"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreLaunchConfig::new(
            Path::new("/nonexistent/natpierce"),
            33272,
            temp_dir.path().join("core.log"),
        );

        let err = launch(&config).unwrap_err();
        assert!(matches!(err, NatpierceError::SpawnFailed { .. }));
    }
}
