//! Resource provisioning: create-if-absent for registries, clusters and
//! database placeholders on every target

mod aws;
mod azure;
mod gcp;
mod local;

pub use aws::AwsProvisioner;
pub use azure::AzureProvisioner;
pub use gcp::GcpProvisioner;
pub use local::LocalProvisioner;

use crate::error::ProvisionError;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{ResourceHandle, ResourceSpec};

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Looks up an existing resource matching `(kind, name)`
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProvisionError>;

    /// Creates the resource; only called after `find` came back empty
    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError>;
}

/// Ensures a resource exists, creating it only if absent.
///
/// Existence is always re-checked; nothing is cached between runs.
pub async fn ensure(
    provisioner: &dyn Provisioner,
    spec: &ResourceSpec,
) -> Result<ResourceHandle, ProvisionError> {
    let label = resource_label(spec);
    spec.validate()
        .map_err(|detail| ProvisionError::permanent(&label, detail))?;
    if spec.is_manual() {
        return Err(ProvisionError::permanent(
            &label,
            "manual resources are reported, not provisioned",
        ));
    }

    if let Some(existing) = provisioner.find(spec).await? {
        tracing::info!(resource = %label, "✓ Already exists, reusing");
        return Ok(existing);
    }

    tracing::info!(resource = %label, region = %spec.region, "Creating");
    let handle = provisioner.create(spec).await?;
    tracing::info!(resource = %label, "✓ Created");
    Ok(handle)
}

pub fn resource_label(spec: &ResourceSpec) -> String {
    format!("{}/{}", spec.kind, spec.name)
}

pub(crate) fn handle(spec: &ResourceSpec, uri: Option<String>, created: bool) -> ResourceHandle {
    ResourceHandle {
        kind: spec.kind,
        name: spec.name.clone(),
        region: spec.region.clone(),
        uri,
        created,
    }
}

pub(crate) fn unsupported(spec: &ResourceSpec, target: &str) -> ProvisionError {
    ProvisionError::permanent(
        resource_label(spec),
        format!(
            "{} resources are not provisioned on {}; declare them as manual",
            spec.kind, target
        ),
    )
}

/// Runs a provider CLI; a missing binary is a permanent failure
pub(crate) async fn run_cli(
    runner: &dyn CommandRunner,
    spec: &ResourceSpec,
    command: CommandSpec,
) -> Result<CommandOutput, ProvisionError> {
    runner.run(&command).await.map_err(|e| {
        ProvisionError::permanent(
            resource_label(spec),
            format!("failed to run {}: {}", command.program, e),
        )
    })
}

/// Outcome of a describe call: found, absent, or a real failure
pub(crate) fn describe_outcome(
    spec: &ResourceSpec,
    output: CommandOutput,
    not_found_markers: &[&str],
) -> Result<Option<CommandOutput>, ProvisionError> {
    if output.is_success() {
        return Ok(Some(output));
    }
    let stderr = output.stderr.to_ascii_lowercase();
    if not_found_markers
        .iter()
        .any(|m| stderr.contains(&m.to_ascii_lowercase()))
    {
        return Ok(None);
    }
    Err(ProvisionError::from_cli(resource_label(spec), &output.failure_detail()))
}

pub(crate) fn require_success(
    spec: &ResourceSpec,
    output: CommandOutput,
) -> Result<CommandOutput, ProvisionError> {
    if output.is_success() {
        Ok(output)
    } else {
        Err(ProvisionError::from_cli(resource_label(spec), &output.failure_detail()))
    }
}

pub(crate) fn parse_json(
    spec: &ResourceSpec,
    output: &CommandOutput,
) -> Result<serde_json::Value, ProvisionError> {
    serde_json::from_str(&output.stdout).map_err(|e| {
        ProvisionError::permanent(
            resource_label(spec),
            format!("unexpected CLI output: {}", e),
        )
    })
}
