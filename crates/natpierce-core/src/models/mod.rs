//! Data types returned across the caller-facing boundary.

mod api_response;

pub use api_response::{ApiResponse, UnitResponse};

use serde::{Deserialize, Serialize};

/// Snapshot returned by `get_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfigSnapshot {
    /// Whether the core is running.
    pub status: bool,
    pub autostart: bool,
    pub controller_port: u16,
}

/// Event pushed to the host, named the way the host dispatches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// The core exited without being asked to.
    CoreExit { code: Option<i32> },
}

impl HostEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            HostEvent::CoreExit { .. } => "core_exit",
        }
    }
}
