//! Environment sanitisation.

use crate::config::ProcessConfig;
use tokio::process::Command;
use tracing::debug;

/// Strip host-specific variables (the dynamic linker search path) from `cmd`.
///
/// The host runtime ships its own libraries; a child inheriting that override
/// links against them instead of the system ones.
pub fn scrub_env(cmd: &mut Command) {
    for var in ProcessConfig::SCRUBBED_ENV_VARS {
        if std::env::var_os(var).is_some() {
            debug!("Removing {} from child environment", var);
        }
        cmd.env_remove(var);
    }
}
