//! Azure: resource group, ACR, AKS and Key Vault placeholders

use super::{describe_outcome, handle, parse_json, require_success, resource_label, run_cli, unsupported, Provisioner};
use crate::error::ProvisionError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{ResourceHandle, ResourceKind, ResourceSpec};
use std::sync::Arc;
use tokio::sync::OnceCell;

const NOT_FOUND: &[&str] = &["ResourceNotFound", "ResourceGroupNotFound", "could not be found", "was not found"];

pub struct AzureProvisioner {
    runner: Arc<dyn CommandRunner>,
    resource_group: String,
    subscription: Option<String>,
    /// ACR name granted pull access when creating AKS
    attach_registry: Option<String>,
    group_ready: OnceCell<()>,
}

impl AzureProvisioner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resource_group: impl Into<String>,
        subscription: Option<String>,
        attach_registry: Option<String>,
    ) -> Self {
        Self {
            runner,
            resource_group: resource_group.into(),
            subscription,
            attach_registry,
            group_ready: OnceCell::new(),
        }
    }

    fn az<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = CommandSpec::new("az").args(args).args(["--output", "json"]);
        if let Some(subscription) = &self.subscription {
            command = command.args(["--subscription", subscription.as_str()]);
        }
        command
    }

    /// Every Azure resource lives in the group; ensured once per run
    async fn ensure_group(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        self.group_ready
            .get_or_try_init(|| async {
                let group = self.resource_group.as_str();
                let output = run_cli(self.runner.as_ref(), spec, self.az(["group", "show", "--name", group])).await?;
                if describe_outcome(spec, output, NOT_FOUND)?.is_none() {
                    tracing::info!(resource_group = %group, location = %spec.region, "Creating resource group");
                    let create = self.az(["group", "create", "--name", group, "--location", spec.region.as_str()]);
                    require_success(spec, run_cli(self.runner.as_ref(), spec, create).await?)?;
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn uri_from(spec: &ResourceSpec, json: &serde_json::Value) -> Option<String> {
        let value = match spec.kind {
            ResourceKind::Registry => &json["loginServer"],
            ResourceKind::Cluster => &json["fqdn"],
            _ => &json["properties"]["vaultUri"],
        };
        value.as_str().map(str::to_string)
    }
}

#[async_trait]
impl Provisioner for AzureProvisioner {
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProvisionError> {
        let group = self.resource_group.as_str();
        let name = spec.name.as_str();
        let command = match spec.kind {
            ResourceKind::Registry => self.az(["acr", "show", "--name", name, "--resource-group", group]),
            ResourceKind::Cluster => self.az(["aks", "show", "--name", name, "--resource-group", group]),
            ResourceKind::Database => self.az(["keyvault", "show", "--name", name, "--resource-group", group]),
            _ => return Err(unsupported(spec, "azure")),
        };

        let output = run_cli(self.runner.as_ref(), spec, command).await?;
        let Some(output) = describe_outcome(spec, output, NOT_FOUND)? else {
            return Ok(None);
        };
        let json = parse_json(spec, &output)?;
        Ok(Some(handle(spec, Self::uri_from(spec, &json), false)))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError> {
        if !matches!(
            spec.kind,
            ResourceKind::Registry | ResourceKind::Cluster | ResourceKind::Database
        ) {
            return Err(unsupported(spec, "azure"));
        }
        self.ensure_group(spec).await?;

        let group = self.resource_group.as_str();
        let name = spec.name.as_str();
        let location = spec.region.as_str();
        let command = match spec.kind {
            ResourceKind::Registry => self.az([
                "acr", "create", "--name", name, "--resource-group", group, "--location", location,
                "--sku", "Basic",
            ]),
            ResourceKind::Cluster => {
                let mut command = self.az([
                    "aks", "create", "--name", name, "--resource-group", group, "--location", location,
                    "--node-count", "2", "--generate-ssh-keys",
                ]);
                if let Some(registry) = &self.attach_registry {
                    command = command.args(["--attach-acr", registry.as_str()]);
                }
                command
            }
            _ => self.az([
                "keyvault", "create", "--name", name, "--resource-group", group, "--location", location,
            ]),
        };

        let output = require_success(spec, run_cli(self.runner.as_ref(), spec, command).await?)?;
        let json = parse_json(spec, &output)?;
        let uri = Self::uri_from(spec, &json);
        if uri.is_none() {
            tracing::warn!(resource = %resource_label(spec), "Created but no address reported");
        }
        Ok(handle(spec, uri, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::provision::ensure;
    use crate::testing::ScriptedRunner;

    fn not_found() -> CommandOutput {
        CommandOutput::failure(3, "(ResourceNotFound) The Resource 'Microsoft.ContainerRegistry/registries/resumeai' under resource group 'resume-ai-rg' was not found.")
    }

    #[tokio::test]
    async fn test_group_is_ensured_once_for_many_creates() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("group show", CommandOutput::failure(3, "(ResourceGroupNotFound) Resource group 'resume-ai-rg' could not be found."))
                .on("acr show", not_found())
                .on("aks show", not_found())
                .on("acr create", CommandOutput::success(r#"{"loginServer":"resumeai.azurecr.io"}"#))
                .on("aks create", CommandOutput::success(r#"{"fqdn":"resume-ai-dns.hcp.eastus.azmk8s.io"}"#)),
        );
        let provisioner = AzureProvisioner::new(runner.clone(), "resume-ai-rg", None, Some("resumeai".into()));

        let registry = ensure(&provisioner, &ResourceSpec::managed(ResourceKind::Registry, "resumeai", "eastus"))
            .await
            .unwrap();
        let cluster = ensure(&provisioner, &ResourceSpec::managed(ResourceKind::Cluster, "resume-ai", "eastus"))
            .await
            .unwrap();

        assert_eq!(registry.uri.as_deref(), Some("resumeai.azurecr.io"));
        assert_eq!(cluster.uri.as_deref(), Some("resume-ai-dns.hcp.eastus.azmk8s.io"));
        assert_eq!(runner.count("group show"), 1);
        assert_eq!(runner.count("group create"), 1);
        assert_eq!(runner.count("--attach-acr resumeai"), 1);
    }

    #[tokio::test]
    async fn test_existing_registry_skips_group_and_create() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "acr show",
            CommandOutput::success(r#"{"loginServer":"resumeai.azurecr.io"}"#),
        ));
        let provisioner = AzureProvisioner::new(runner.clone(), "resume-ai-rg", Some("sub-1".into()), None);

        let handle = ensure(&provisioner, &ResourceSpec::managed(ResourceKind::Registry, "resumeai", "eastus"))
            .await
            .unwrap();

        assert!(!handle.created);
        assert_eq!(runner.calls().len(), 1);
        assert!(runner.command_lines()[0].contains("--subscription sub-1"));
    }
}
