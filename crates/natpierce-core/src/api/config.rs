//! Settings and host information on NatpierceApi.

use crate::models::UnitResponse;
use crate::{platform, NatpierceApi};
use serde_json::Value;
use tracing::{error, info};

impl NatpierceApi {
    pub async fn get_config_value(&self, key: &str) -> Option<Value> {
        let value = self.inner.settings.get_value(key);
        info!("get_config_value: {} => {:?}", key, value);
        value
    }

    pub async fn set_config_value(&self, key: &str, value: Value) -> UnitResponse {
        info!("set_config_value: {} => {}", key, value);
        let result = self.inner.settings.set_value(key, value);
        if let Err(e) = &result {
            error!("set_config_value: failed with {}", e);
        }
        UnitResponse::from_unit(result)
    }

    /// Address of the outbound interface, `127.0.0.1` without a route.
    pub async fn get_ip(&self) -> String {
        platform::local_ip().to_string()
    }
}
