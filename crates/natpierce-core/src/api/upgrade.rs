//! Upgrade and version operations on NatpierceApi.

use super::parse_resource;
use crate::config::ResourceKind;
use crate::models::UnitResponse;
use crate::NatpierceApi;
use tracing::{debug, error, info};

impl NatpierceApi {
    /// Upgrade `res` (`"plugin"` or `"core"`) to `version`.
    ///
    /// A core that was running when a core upgrade finished is restarted so
    /// it runs the new binary.
    pub async fn upgrade(&self, res: &str, version: &str) -> UnitResponse {
        let Some(kind) = parse_resource("upgrade", res) else {
            return UnitResponse::error("invalid resource");
        };

        if let Err(e) = self.inner.engine.upgrade(kind, version).await {
            error!("upgrade: failed with {}", e);
            return UnitResponse::error(e.to_string());
        }

        if kind == ResourceKind::Core && self.inner.supervisor.is_running() {
            info!("Restarting core to pick up {}", version);
            if let Err(e) = self.inner.supervisor.restart().await {
                error!("upgrade: core installed but restart failed: {}", e);
                return UnitResponse::error(format!(
                    "Core {} installed but restart failed: {}",
                    version, e
                ));
            }
        }
        UnitResponse::ok()
    }

    pub async fn cancel_upgrade(&self, res: &str) {
        if let Some(kind) = parse_resource("cancel_upgrade", res) {
            self.inner.engine.cancel_upgrade(kind);
        }
    }

    pub async fn is_upgrading(&self, res: &str) -> bool {
        parse_resource("is_upgrading", res).is_some_and(|kind| self.inner.engine.is_upgrading(kind))
    }

    /// Installed version of `res`; empty when unknown or invalid.
    pub async fn get_version(&self, res: &str) -> String {
        let Some(kind) = parse_resource("get_version", res) else {
            return String::new();
        };

        let version = match kind {
            ResourceKind::Plugin => plugin_display_version(&self.inner.plugin_version),
            ResourceKind::Core => self.inner.supervisor.get_version().await,
        };
        debug!("get_version: {} {}", res, version);
        version
    }

    /// Latest available version of `res`, debounced; empty on failure.
    pub async fn get_latest_version(&self, res: &str) -> String {
        let Some(kind) = parse_resource("get_latest_version", res) else {
            return String::new();
        };

        let timeout = self.inner.settings.timeout();
        let debounce = self.inner.settings.debounce_time();
        match self
            .inner
            .engine
            .get_latest_version(kind, timeout, debounce)
            .await
        {
            Ok(version) => {
                debug!("get_latest_version: {} {}", res, version);
                version
            }
            Err(e) => {
                error!("get_latest_version: failed with {}", e);
                String::new()
            }
        }
    }
}

/// Host package versions come without the `v` prefix.
fn plugin_display_version(raw: &str) -> String {
    if raw.starts_with(|c: char| c.is_ascii_digit()) {
        format!("v{}", raw)
    } else {
        raw.to_string()
    }
}
