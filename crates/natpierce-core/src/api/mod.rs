//! Caller-facing operations.
//!
//! Each submodule adds an `impl NatpierceApi` block; the struct itself lives
//! in `lib.rs`.

mod builder;
mod config;
mod lifecycle;
mod upgrade;

pub use builder::NatpierceApiBuilder;

use crate::config::ResourceKind;
use tracing::error;

/// Parse a resource name from the caller, logging rejects under `op`.
fn parse_resource(op: &str, res: &str) -> Option<ResourceKind> {
    match ResourceKind::parse(res) {
        Ok(kind) => Some(kind),
        Err(_) => {
            error!("{}: invalid resource {}", op, res);
            None
        }
    }
}
