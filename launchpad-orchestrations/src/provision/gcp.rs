//! GCP: Artifact Registry repositories, GKE Autopilot clusters, Secret Manager placeholders

use super::{describe_outcome, handle, parse_json, require_success, resource_label, run_cli, unsupported, Provisioner};
use crate::error::ProvisionError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{ResourceHandle, ResourceKind, ResourceSpec};
use std::sync::Arc;

const NOT_FOUND: &[&str] = &["NOT_FOUND", "not found", "was not found"];
const ALREADY_EXISTS: &str = "ALREADY_EXISTS";

pub struct GcpProvisioner {
    runner: Arc<dyn CommandRunner>,
    project: String,
}

impl GcpProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, project: impl Into<String>) -> Self {
        Self {
            runner,
            project: project.into(),
        }
    }

    fn gcloud<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("gcloud")
            .args(args)
            .args(["--project", self.project.as_str(), "--format", "json", "--quiet"])
    }

    fn describe_command(&self, spec: &ResourceSpec) -> Result<CommandSpec, ProvisionError> {
        let name = spec.name.as_str();
        let region = spec.region.as_str();
        match spec.kind {
            ResourceKind::Registry => Ok(self.gcloud([
                "artifacts", "repositories", "describe", name, "--location", region,
            ])),
            ResourceKind::Cluster => Ok(self.gcloud([
                "container", "clusters", "describe", name, "--region", region,
            ])),
            ResourceKind::Database => Ok(self.gcloud(["secrets", "describe", name])),
            _ => Err(unsupported(spec, "gcp")),
        }
    }

    fn create_command(&self, spec: &ResourceSpec) -> Result<CommandSpec, ProvisionError> {
        let name = spec.name.as_str();
        let region = spec.region.as_str();
        match spec.kind {
            ResourceKind::Registry => Ok(self.gcloud([
                "artifacts",
                "repositories",
                "create",
                name,
                "--repository-format",
                "docker",
                "--location",
                region,
            ])),
            ResourceKind::Cluster => Ok(self.gcloud([
                "container", "clusters", "create-auto", name, "--region", region,
            ])),
            ResourceKind::Database => Ok(self.gcloud([
                "secrets",
                "create",
                name,
                "--replication-policy",
                "automatic",
            ])),
            _ => Err(unsupported(spec, "gcp")),
        }
    }

    fn uri_for(&self, spec: &ResourceSpec, described: &serde_json::Value) -> Option<String> {
        match spec.kind {
            ResourceKind::Registry => Some(format!(
                "{}-docker.pkg.dev/{}/{}",
                spec.region, self.project, spec.name
            )),
            ResourceKind::Cluster => described["endpoint"].as_str().map(str::to_string),
            _ => described["name"].as_str().map(str::to_string),
        }
    }
}

#[async_trait]
impl Provisioner for GcpProvisioner {
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProvisionError> {
        let command = self.describe_command(spec)?;
        let output = run_cli(self.runner.as_ref(), spec, command).await?;
        let Some(output) = describe_outcome(spec, output, NOT_FOUND)? else {
            return Ok(None);
        };
        let json = parse_json(spec, &output)?;
        Ok(Some(handle(spec, self.uri_for(spec, &json), false)))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError> {
        let command = self.create_command(spec)?;
        let output = run_cli(self.runner.as_ref(), spec, command).await?;
        let adopted = !output.is_success() && output.stderr.contains(ALREADY_EXISTS);
        if !adopted {
            require_success(spec, output)?;
        }

        // gcloud create output differs per resource; describe gives one shape
        let described = self.find(spec).await?.ok_or_else(|| {
            ProvisionError::transient(resource_label(spec), "created but not visible yet")
        })?;
        Ok(ResourceHandle {
            created: !adopted,
            ..described
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::provision::ensure;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_registry_uri_is_artifact_registry_host() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_sequence(
                    "artifacts repositories describe",
                    vec![
                        CommandOutput::failure(1, "ERROR: (gcloud.artifacts.repositories.describe) NOT_FOUND: Requested entity was not found."),
                        CommandOutput::success(r#"{"name":"projects/acme/locations/us-central1/repositories/resume-ai"}"#),
                    ],
                )
                .on("artifacts repositories create", CommandOutput::success("{}")),
        );
        let provisioner = GcpProvisioner::new(runner.clone(), "acme");
        let spec = ResourceSpec::managed(ResourceKind::Registry, "resume-ai", "us-central1");

        let handle = ensure(&provisioner, &spec).await.unwrap();

        assert!(handle.created);
        assert_eq!(handle.uri.as_deref(), Some("us-central1-docker.pkg.dev/acme/resume-ai"));
        assert_eq!(runner.count("repositories create"), 1);
        assert!(runner.command_lines().iter().all(|c| c.contains("--project acme")));
    }

    #[tokio::test]
    async fn test_existing_cluster_is_not_recreated() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "container clusters describe",
            CommandOutput::success(r#"{"name":"resume-ai","endpoint":"34.1.2.3","status":"RUNNING"}"#),
        ));
        let provisioner = GcpProvisioner::new(runner.clone(), "acme");
        let spec = ResourceSpec::managed(ResourceKind::Cluster, "resume-ai", "us-central1");

        let first = ensure(&provisioner, &spec).await.unwrap();
        let second = ensure(&provisioner, &spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.uri.as_deref(), Some("34.1.2.3"));
        assert_eq!(runner.count("create-auto"), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_is_permanent() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "secrets describe",
            CommandOutput::failure(1, "ERROR: PERMISSION_DENIED: Permission 'secretmanager.secrets.get' denied"),
        ));
        let provisioner = GcpProvisioner::new(runner, "acme");
        let spec = ResourceSpec::managed(ResourceKind::Database, "resume-ai-db", "us-central1");

        let err = ensure(&provisioner, &spec).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.detail.contains("PERMISSION_DENIED"));
    }
}
