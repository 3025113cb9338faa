//! Platform abstraction layer.
//!
//! All OS-specific code lives here rather than scattered through the
//! supervisor and installers:
//! - `env` - environment scrubbing for host-adjacent children
//! - `permissions` - mode bits and ownership over install trees
//! - `process` - termination signals
//! - `net` - outbound interface address discovery
//!
//! Linux is the only target the core ships for; the non-unix branches exist
//! so the crate still builds elsewhere.

pub mod env;
pub mod net;
pub mod permissions;
pub mod process;

pub use env::scrub_env;
pub use net::local_ip;
pub use permissions::{add_mode_recursive, chown_recursive, set_executable};
pub use process::terminate_process;
