//! Core version discovery: banner scraping and `-v` probing.

use crate::error::{NatpierceError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

static BANNER_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9])[Vv](\d+\.\d+)").expect("banner version regex must compile")
});

/// Extract the most recent `V<major>.<minor>` from the core's banner output.
///
/// Only lines starting with whitespace are banner lines. Lines are scanned
/// from the end so a restart's banner wins over an earlier one. The result
/// is lower-cased (`v1.24`); no match yields an empty string.
pub fn parse_banner_version(log: &str) -> String {
    log.lines()
        .rev()
        .filter(|line| line.starts_with(char::is_whitespace))
        .find_map(|line| BANNER_VERSION.captures(line))
        .map(|caps| format!("v{}", &caps[1]))
        .unwrap_or_default()
}

/// Read the live log and parse its banner version.
pub async fn read_log_version(log_file: &Path) -> String {
    match tokio::fs::read(log_file).await {
        Ok(bytes) => parse_banner_version(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            debug!("Cannot read core log {}: {}", log_file.display(), e);
            String::new()
        }
    }
}

/// First whitespace-separated token of `-v` output that starts with `v`.
pub fn parse_probe_output(output: &str) -> String {
    output
        .split_whitespace()
        .find(|token| token.starts_with('v'))
        .map(str::to_string)
        .unwrap_or_default()
}

/// Run `<binary> -v` and parse the reported version.
pub async fn probe_version(binary: &Path, timeout: Duration) -> Result<String> {
    let mut cmd = Command::new(binary);
    cmd.arg("-v").kill_on_drop(true);
    crate::platform::scrub_env(&mut cmd);
    debug!("Probing core version: {} -v", binary.display());

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| NatpierceError::Timeout(timeout))?
        .map_err(|e| NatpierceError::SpawnFailed {
            command: format!("{} -v", binary.display()),
            message: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("Version probe output: {}", stdout.trim());
    Ok(parse_probe_output(&stdout))
}
