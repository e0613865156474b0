//! Launchpad Loadtest - staged virtual-user load against a deployed service
//!
//! ```rust,no_run
//! use launchpad_loadtest::{Credential, DriverConfig, LoadDriver};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), launchpad_loadtest::LoadError> {
//! let credentials = Credential::parse_list("loadtester:change-me")?;
//! let mut config = DriverConfig::new("http://localhost:8000", credentials);
//! config.profile = "30s:5,1m:5,30s:0".parse()?;
//!
//! let report = LoadDriver::new(config, CancellationToken::new())?.run().await;
//! for violation in &report.violations {
//!     eprintln!("{}", violation);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod report;

pub use client::{ApiClient, ApiRoutes, Credential};
pub use driver::{DriverConfig, LoadDriver};
pub use error::{ApiError, LoadError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use profile::{LoadProfile, LoadStage};
pub use report::{LoadReport, Thresholds, Violation};

/// Environment variable holding `user:password,...` for the virtual users
pub const CREDENTIALS_VAR: &str = "LAUNCHPAD_LOAD_CREDENTIALS";
