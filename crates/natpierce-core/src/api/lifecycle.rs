//! Core lifecycle operations on NatpierceApi.

use crate::models::{CoreConfigSnapshot, UnitResponse};
use crate::process::ExitCallback;
use crate::NatpierceApi;
use tracing::{debug, error, info};

impl NatpierceApi {
    pub async fn get_core_status(&self) -> bool {
        let running = self.inner.supervisor.is_running();
        debug!("get_core_status: {}", running);
        running
    }

    /// Start (`true`) or stop (`false`) the core.
    pub async fn set_core_status(&self, status: bool) -> UnitResponse {
        let result = if status {
            self.inner.supervisor.start().await
        } else {
            self.inner.supervisor.stop().await
        };
        if let Err(e) = &result {
            error!("set_core_status: failed with {}", e);
        }
        UnitResponse::from_unit(result)
    }

    pub async fn restart_core(&self) -> UnitResponse {
        let result = self.inner.supervisor.restart().await;
        if let Err(e) = &result {
            error!("restart_core: failed with {}", e);
        }
        UnitResponse::from_unit(result)
    }

    pub async fn get_config(&self) -> CoreConfigSnapshot {
        let config = CoreConfigSnapshot {
            status: self.inner.supervisor.is_running(),
            autostart: self.inner.settings.autostart(),
            controller_port: self.inner.settings.controller_port(),
        };
        info!("get_config: {:?}", config);
        config
    }

    /// Replace the exit handler. `None` also drops the default `core_exit`
    /// forwarding.
    pub fn set_exit_callback(&self, callback: Option<ExitCallback>) {
        self.inner.supervisor.set_exit_callback(callback);
    }

    /// Stop the core if it runs and cancel pending upgrades.
    pub async fn shutdown(&self) {
        self.inner.engine.cancel_all();
        if self.inner.supervisor.is_running() {
            if let Err(e) = self.inner.supervisor.stop().await {
                error!("shutdown: failed to stop core: {}", e);
            }
        }
    }
}
