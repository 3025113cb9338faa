//! natpierce-core - supervision and upgrades for the natpierce core service.
//!
//! This crate runs the natpierce core binary on behalf of a host plugin
//! runtime and keeps both the core and the supervising package up to date:
//!
//! - [`process::CoreSupervisor`] starts, stops and watches the core.
//! - [`upgrade::UpgradeEngine`] downloads and atomically installs new
//!   versions, one task per resource kind, with cancellation.
//! - [`upgrade::VersionQueryCache`] answers "what is the latest version",
//!   debounced per kind.
//!
//! [`NatpierceApi`] ties these together behind the operations the host's
//! UI layer calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use natpierce_core::{InstallPaths, NatpierceApi};
//!
//! #[tokio::main]
//! async fn main() -> natpierce_core::Result<()> {
//!     let paths = InstallPaths::under(std::path::Path::new("/opt/natpierce"));
//!     let api = NatpierceApi::builder(paths).plugin_version("0.3.0").build().await?;
//!
//!     let response = api.set_core_status(true).await;
//!     println!("started: {}", response.is_success());
//!     println!("latest core: {}", api.get_latest_version("core").await);
//!
//!     api.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod platform;
pub mod process;
pub mod settings;
pub mod upgrade;

mod api;

pub use api::NatpierceApiBuilder;
pub use cancel::{CancellationToken, CancelledError};
pub use config::{InstallPaths, ResourceKind, SourceConfig};
pub use error::{NatpierceError, Result};
pub use models::{ApiResponse, CoreConfigSnapshot, HostEvent, UnitResponse};
pub use network::{ArtifactFetcher, DownloadProgress, HttpFetcher, TlsPolicy};
pub use process::{CoreSupervisor, ExitCallback, Preflight, PreflightConfig};
pub use settings::{JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore};
pub use upgrade::{
    HostReloader, InstallContext, ProgressEvent, SystemctlReloader, TaskState, UpgradeEngine,
    UpgradeProgress, VersionQueryCache,
};

use std::sync::Arc;
use tokio::sync::broadcast;

/// Caller-facing entry point.
///
/// Every operation returns a value or an [`ApiResponse`]; errors are logged
/// and turned into messages rather than propagated. Cloning is cheap.
#[derive(Clone)]
pub struct NatpierceApi {
    inner: Arc<ApiState>,
}

struct ApiState {
    paths: InstallPaths,
    settings: Settings,
    supervisor: CoreSupervisor,
    engine: UpgradeEngine,
    /// Version of the installed package as reported by the host.
    plugin_version: String,
    events: broadcast::Sender<HostEvent>,
}

impl NatpierceApi {
    /// Create a builder for an installation laid out as `paths`.
    pub fn builder(paths: InstallPaths) -> NatpierceApiBuilder {
        NatpierceApiBuilder::new(paths)
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.inner.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn supervisor(&self) -> &CoreSupervisor {
        &self.inner.supervisor
    }

    pub fn engine(&self) -> &UpgradeEngine {
        &self.inner.engine
    }

    /// Events for the host (core exits).
    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.inner.events.subscribe()
    }

    /// Download progress of every upgrade.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.engine.subscribe_progress()
    }
}
