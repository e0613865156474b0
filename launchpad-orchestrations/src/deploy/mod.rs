//! Topology deployment: bring the declared services to the desired state on
//! the target platform
//!
//! Each deployer converges the platform onto the topology it is given. Apply
//! is a rolling update on platforms that support it; nothing is ever torn
//! down and recreated.

mod compose;
mod ecs;
mod kubernetes;

pub use compose::ComposeDeployer;
pub use ecs::{EcsDeployer, EcsSettings};
pub use kubernetes::{ClusterCredentials, KubernetesDeployer};

use crate::error::{ApplyError, InitError};
use crate::initialize::{InitEnv, InitStep};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{EnvValue, ImageArtifact, LogTail, ServiceSpec, ServiceTopology};
use serde::{Deserialize, Serialize};

/// What an apply left running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployHandle {
    pub topology: String,
    pub services: Vec<String>,
    /// Base URL the health gate probes
    pub endpoint: Option<String>,
    /// Platform revision (task definition ARN, image digest, ...)
    pub revision: Option<String>,
}

#[async_trait]
pub trait TopologyDeployer: Send + Sync {
    async fn apply(
        &self,
        topology: &ServiceTopology,
        artifact: &ImageArtifact,
    ) -> Result<DeployHandle, ApplyError>;

    /// Best effort; failures are logged and yield fewer tails
    async fn recent_logs(&self, handle: &DeployHandle, lines: usize) -> Vec<LogTail>;

    async fn run_init(
        &self,
        handle: &DeployHandle,
        step: &InitStep,
        env: &InitEnv,
    ) -> Result<(), InitError>;
}

/// Template view of one environment binding
#[derive(Debug, Serialize)]
pub(crate) struct EnvView {
    pub name: String,
    pub value: Option<String>,
    pub secret: Option<String>,
    pub key: Option<String>,
}

impl EnvView {
    pub(crate) fn from_service(service: &ServiceSpec) -> Vec<EnvView> {
        service
            .env
            .iter()
            .map(|binding| match &binding.value {
                EnvValue::Literal { value } => EnvView {
                    name: binding.name.clone(),
                    value: Some(value.clone()),
                    secret: None,
                    key: None,
                },
                EnvValue::SecretRef { secret, key } => EnvView {
                    name: binding.name.clone(),
                    value: None,
                    secret: Some(secret.clone()),
                    key: Some(key.clone()),
                },
            })
            .collect()
    }
}

/// Service whose published port fronts the deployment
pub(crate) fn entry_service(topology: &ServiceTopology) -> Option<&ServiceSpec> {
    topology
        .services
        .iter()
        .find(|s| s.uses_artifact() && !s.ports.is_empty())
        .or_else(|| topology.services.iter().find(|s| !s.ports.is_empty()))
}

pub(crate) fn render_error(what: &str, err: impl std::fmt::Display) -> ApplyError {
    ApplyError::new(format!("failed to render {}: {}", what, err))
}

pub(crate) async fn run_apply(
    runner: &dyn CommandRunner,
    command: CommandSpec,
) -> Result<CommandOutput, ApplyError> {
    let output = runner
        .run(&command)
        .await
        .map_err(|e| ApplyError::new(format!("failed to run {}: {}", command.program, e)))?;
    if output.is_success() {
        Ok(output)
    } else {
        Err(ApplyError::new(output.failure_detail()))
    }
}

pub(crate) async fn run_init_command(
    runner: &dyn CommandRunner,
    step: &InitStep,
    command: CommandSpec,
) -> Result<CommandOutput, InitError> {
    let output = runner.run(&command).await.map_err(|e| InitError {
        step: step.describe(),
        detail: format!("failed to run {}: {}", command.program, e),
    })?;
    if output.is_success() {
        Ok(output)
    } else {
        Err(InitError {
            step: step.describe(),
            detail: output.failure_detail(),
        })
    }
}

/// Keeps the last `n` non-empty lines
pub(crate) fn tail_lines(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}
