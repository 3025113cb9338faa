//! Durable key/value settings.
//!
//! The store itself belongs to the host; this crate only needs `get`/`set`
//! through the [`SettingsStore`] trait. [`JsonSettingsStore`] is the default
//! file-backed implementation and [`MemorySettingsStore`] serves tests and
//! ephemeral hosts. [`Settings`] layers typed accessors and defaults on top.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};

use crate::config::{NetworkConfig, ProcessConfig};
use crate::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Setting keys shared with the caller-facing layer.
pub mod keys {
    pub const TIMEOUT: &str = "timeout";
    pub const DEBOUNCE_TIME: &str = "debounce_time";
    pub const AUTOSTART: &str = "autostart";
    pub const CONTROLLER_PORT: &str = "controller_port";
    pub const AUTO_CHECK_UPDATE: &str = "auto_check_update";
    pub const DISABLE_VERIFY: &str = "disable_verify";
    pub const CORE_VERSION: &str = "core_version";
    pub const LOG_LEVEL: &str = "log_level";
}

/// Durable key/value store provided by the host.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Settings persisted as one JSON object on disk.
pub struct JsonSettingsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonSettingsStore {
    /// Open (or lazily create) the settings file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match atomic_read_json::<Value>(&path)? {
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!(
                    "Settings file {} does not hold an object ({}), starting empty",
                    path.display(),
                    other
                );
                Map::new()
            }
            None => Map::new(),
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        atomic_write_json(&self.path, &*values)
    }
}

/// In-memory store without persistence.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Typed view over a [`SettingsStore`].
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Settings backed by a fresh [`MemorySettingsStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySettingsStore::new()))
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        let value = self.store.get(key).filter(|v| !v.is_null());
        debug!("getSetting: {} => {:?}", key, value);
        value
    }

    pub fn set_value(&self, key: &str, value: Value) -> Result<()> {
        debug!("setSetting: {} => {}", key, value);
        self.store.set(key, value)
    }

    /// Write the default of every known key that is still missing.
    pub fn apply_defaults(&self) -> Result<()> {
        let defaults: [(&str, Value); 8] = [
            (keys::TIMEOUT, Value::from(NetworkConfig::REQUEST_TIMEOUT.as_secs_f64())),
            (keys::DEBOUNCE_TIME, Value::from(NetworkConfig::DEFAULT_DEBOUNCE.as_secs_f64())),
            (keys::AUTOSTART, Value::from(false)),
            (keys::CONTROLLER_PORT, Value::from(ProcessConfig::DEFAULT_CONTROLLER_PORT)),
            (keys::AUTO_CHECK_UPDATE, Value::from(true)),
            (keys::DISABLE_VERIFY, Value::from(false)),
            (keys::CORE_VERSION, Value::from("")),
            (keys::LOG_LEVEL, Value::from("INFO")),
        ];

        for (key, value) in defaults {
            if self.get_value(key).is_none() {
                self.set_value(key, value)?;
            }
        }
        Ok(())
    }

    pub fn controller_port(&self) -> u16 {
        let port = self
            .get_value(keys::CONTROLLER_PORT)
            .and_then(|v| match v {
                Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(ProcessConfig::DEFAULT_CONTROLLER_PORT);
        debug!("get_controller_port: {}", port);
        port
    }

    pub fn timeout(&self) -> Duration {
        self.seconds(keys::TIMEOUT)
            .unwrap_or(NetworkConfig::REQUEST_TIMEOUT)
    }

    pub fn debounce_time(&self) -> Duration {
        self.seconds(keys::DEBOUNCE_TIME)
            .unwrap_or(NetworkConfig::DEFAULT_DEBOUNCE)
    }

    pub fn autostart(&self) -> bool {
        self.flag(keys::AUTOSTART).unwrap_or(false)
    }

    pub fn auto_check_update(&self) -> bool {
        self.flag(keys::AUTO_CHECK_UPDATE).unwrap_or(true)
    }

    pub fn disable_verify(&self) -> bool {
        self.flag(keys::DISABLE_VERIFY).unwrap_or(false)
    }

    /// Last known installed core version, empty when unknown.
    pub fn core_version(&self) -> String {
        self.get_value(keys::CORE_VERSION)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn set_core_version(&self, version: &str) -> Result<()> {
        self.set_value(keys::CORE_VERSION, Value::from(version))
    }

    /// Persisted log level name (Python-style names such as `WARNING` accepted).
    pub fn log_level(&self) -> tracing::Level {
        let name = self
            .get_value(keys::LOG_LEVEL)
            .and_then(|v| v.as_str().map(str::to_uppercase))
            .unwrap_or_default();
        match name.as_str() {
            "DEBUG" | "NOTSET" => tracing::Level::DEBUG,
            "WARNING" | "WARN" => tracing::Level::WARN,
            "ERROR" | "CRITICAL" => tracing::Level::ERROR,
            "TRACE" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    fn seconds(&self, key: &str) -> Option<Duration> {
        let secs = match self.get_value(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
    }

    fn flag(&self, key: &str) -> Option<bool> {
        match self.get_value(key)? {
            Value::Bool(b) => Some(b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_only_fill_missing_keys() {
        let settings = Settings::in_memory();
        settings.set_value(keys::CONTROLLER_PORT, json!(40000)).unwrap();
        settings.set_value(keys::AUTOSTART, json!(false)).unwrap();

        settings.apply_defaults().unwrap();

        assert_eq!(settings.controller_port(), 40000);
        assert!(!settings.autostart());
        assert_eq!(settings.timeout(), Duration::from_secs(15));
        assert_eq!(settings.debounce_time(), Duration::from_secs(10));
        assert!(settings.auto_check_update());
        assert_eq!(settings.core_version(), "");
        assert_eq!(settings.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_controller_port_accepts_strings_and_falls_back() {
        let settings = Settings::in_memory();
        assert_eq!(settings.controller_port(), ProcessConfig::DEFAULT_CONTROLLER_PORT);

        settings.set_value(keys::CONTROLLER_PORT, json!("34000")).unwrap();
        assert_eq!(settings.controller_port(), 34000);

        settings.set_value(keys::CONTROLLER_PORT, json!(700000)).unwrap();
        assert_eq!(settings.controller_port(), ProcessConfig::DEFAULT_CONTROLLER_PORT);
    }

    #[test]
    fn test_fractional_timeout() {
        let settings = Settings::in_memory();
        settings.set_value(keys::TIMEOUT, json!(2.5)).unwrap();
        assert_eq!(settings.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_python_log_level_names() {
        let settings = Settings::in_memory();
        settings.set_value(keys::LOG_LEVEL, json!("WARNING")).unwrap();
        assert_eq!(settings.log_level(), tracing::Level::WARN);
        settings.set_value(keys::LOG_LEVEL, json!("debug")).unwrap();
        assert_eq!(settings.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_json_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings").join("config.json");

        {
            let store = JsonSettingsStore::open(&path).unwrap();
            store.set(keys::CORE_VERSION, json!("v1.03")).unwrap();
        }

        let store = JsonSettingsStore::open(&path).unwrap();
        assert_eq!(store.get(keys::CORE_VERSION), Some(json!("v1.03")));
        assert_eq!(store.get("missing"), None);
    }
}
