//! Core process management.
//!
//! [`CoreSupervisor`] owns the single supervised core process: it runs the
//! environment pre-flight, spawns the core with its output captured in a log
//! file, watches for unsolicited exits and reports the running version.
//!
//! # Example
//!
//! ```rust,no_run
//! use natpierce_core::config::InstallPaths;
//! use natpierce_core::process::{CoreSupervisor, Preflight, PreflightConfig};
//! use natpierce_core::settings::Settings;
//!
//! # async fn run() -> natpierce_core::Result<()> {
//! let supervisor = CoreSupervisor::new(
//!     InstallPaths::under(std::path::Path::new("/opt/natpierce")),
//!     Settings::in_memory(),
//!     Preflight::new(PreflightConfig::default()),
//! );
//!
//! supervisor.start().await?;
//! assert!(supervisor.is_running());
//! println!("core version: {}", supervisor.get_version().await);
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

mod launcher;
mod preflight;
mod supervisor;
mod version;

pub use launcher::{launch, CoreLaunchConfig, LaunchedCore};
pub use preflight::{Preflight, PreflightConfig};
pub use supervisor::{CoreSupervisor, ExitCallback};
pub use version::{parse_banner_version, parse_probe_output, probe_version, read_log_version};
