//! Launchpad Orchestrations - provisioning, image publication, topology
//! deployment and health gating across local and cloud targets
//!
//! # Usage
//!
//! ```rust,no_run
//! use launchpad_orchestrations::{Backend, BackendSettings, HttpProbe, Orchestrator, TokioCommandRunner};
//! use launchpad_models::DeployTarget;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(plan: launchpad_orchestrations::DeployPlan) -> anyhow::Result<()> {
//! let backend = Backend::for_target(&DeployTarget::local(), &BackendSettings::default(), Arc::new(TokioCommandRunner))?;
//! let orchestrator = Orchestrator::new(backend, Arc::new(HttpProbe::new()), CancellationToken::new());
//! let result = orchestrator.run(&plan).await;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod deploy;
pub mod error;
pub mod health;
pub mod initialize;
pub mod orchestrator;
pub mod process;
pub mod provision;
pub mod publish;
pub mod testing;

// Re-export key types for convenience
pub use backend::{Backend, BackendSettings};
pub use deploy::{DeployHandle, TopologyDeployer};
pub use error::*;
pub use health::{HealthGate, HealthOutcome, HttpProbe, Probe};
pub use initialize::{InitPlan, InitStep, SeedCredentials};
pub use orchestrator::{DeployPlan, Orchestrator};
pub use process::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use provision::{ensure, Provisioner};
pub use publish::{DockerPublisher, ImagePublisher, PublishRequest, RegistryLogin};
