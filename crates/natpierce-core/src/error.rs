//! Error types for the natpierce supervisor.
//!
//! Every failure that can cross the library boundary is a variant of
//! [`NatpierceError`]. The variants are grouped by where they come from so the
//! caller-facing layer can tell environment problems, process-control errors,
//! network failures and cancellations apart.

use crate::config::ResourceKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for the supervisor and upgrade engine.
#[derive(Debug, Error)]
pub enum NatpierceError {
    // Environment pre-flight errors
    #[error("Kernel module {module} unavailable: {message}")]
    KernelModuleUnavailable { module: String, message: String },

    #[error("IP forwarding unavailable: {message}")]
    IpForwarding { message: String },

    // Process control errors
    #[error("No running core")]
    NotRunning,

    #[error("Failed to start core ({command}): {message}")]
    SpawnFailed { command: String, message: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Download cancelled")]
    DownloadCancelled,

    #[error("Release not found for {repo}")]
    ReleaseNotFound { repo: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Upgrade errors
    #[error("Installation failed: {message}")]
    InstallationFailed { message: String },

    #[error("Failed to restart plugin loader (exit code {code:?}): {stderr}")]
    ReloadFailed { code: Option<i32>, stderr: String },

    #[error("Upgrade of {kind} failed: {source}")]
    UpgradeFailed {
        kind: ResourceKind,
        #[source]
        source: Arc<NatpierceError>,
    },

    #[error("Upgrade of {kind} cancelled")]
    UpgradeCancelled { kind: ResourceKind },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, NatpierceError>;

impl From<std::io::Error> for NatpierceError {
    fn from(err: std::io::Error) -> Self {
        NatpierceError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NatpierceError {
    fn from(err: serde_json::Error) -> Self {
        NatpierceError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for NatpierceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NatpierceError::Timeout(std::time::Duration::from_secs(0))
        } else {
            NatpierceError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl From<zip::result::ZipError> for NatpierceError {
    fn from(err: zip::result::ZipError) -> Self {
        NatpierceError::InstallationFailed {
            message: format!("Invalid zip archive: {}", err),
        }
    }
}

impl NatpierceError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NatpierceError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True when the error means "somebody asked this to stop", as opposed to a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            NatpierceError::DownloadCancelled | NatpierceError::UpgradeCancelled { .. }
        )
    }

    /// True for pre-flight failures: the host is not fit to run the core.
    pub fn is_environment_unmet(&self) -> bool {
        matches!(
            self,
            NatpierceError::KernelModuleUnavailable { .. } | NatpierceError::IpForwarding { .. }
        )
    }

    /// Check if a caller could reasonably retry the operation.
    ///
    /// Nothing in this crate retries on its own; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            NatpierceError::Network { .. } | NatpierceError::Timeout(_) => true,
            NatpierceError::UpgradeFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(NatpierceError::NotRunning.to_string(), "No running core");

        let err = NatpierceError::UpgradeCancelled {
            kind: ResourceKind::Core,
        };
        assert_eq!(err.to_string(), "Upgrade of core cancelled");
    }

    #[test]
    fn test_cancellation_is_distinguished_from_failure() {
        assert!(NatpierceError::DownloadCancelled.is_cancellation());
        assert!(NatpierceError::UpgradeCancelled {
            kind: ResourceKind::Plugin
        }
        .is_cancellation());

        let failed = NatpierceError::UpgradeFailed {
            kind: ResourceKind::Plugin,
            source: Arc::new(NatpierceError::DownloadFailed {
                url: "https://example.invalid/a.zip".into(),
                message: "status 404".into(),
            }),
        };
        assert!(!failed.is_cancellation());
        assert!(failed.to_string().contains("status 404"));
    }

    #[test]
    fn test_environment_errors() {
        let err = NatpierceError::KernelModuleUnavailable {
            module: "tun".into(),
            message: "insufficient privilege".into(),
        };
        assert!(err.is_environment_unmet());
        assert!(!NatpierceError::NotRunning.is_environment_unmet());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NatpierceError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!NatpierceError::NotRunning.is_retryable());

        let wrapped = NatpierceError::UpgradeFailed {
            kind: ResourceKind::Core,
            source: Arc::new(NatpierceError::Timeout(std::time::Duration::from_secs(1))),
        };
        assert!(wrapped.is_retryable());
    }
}
