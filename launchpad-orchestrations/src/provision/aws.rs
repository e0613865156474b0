//! AWS: ECR repositories, ECS clusters, Secrets Manager placeholders

use super::{
    describe_outcome, handle, parse_json, require_success, resource_label, run_cli, unsupported,
    Provisioner,
};
use crate::error::ProvisionError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{ResourceHandle, ResourceKind, ResourceSpec};
use std::sync::Arc;

pub struct AwsProvisioner {
    runner: Arc<dyn CommandRunner>,
    profile: Option<String>,
}

impl AwsProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, profile: Option<String>) -> Self {
        Self { runner, profile }
    }

    fn aws<I, S>(&self, spec: &ResourceSpec, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = CommandSpec::new("aws")
            .args(args)
            .args(["--region", spec.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.profile {
            command = command.args(["--profile", profile.as_str()]);
        }
        command
    }

    /// `Ok(None)` when another run created the resource first
    async fn create_or_adopt(
        &self,
        spec: &ResourceSpec,
        command: CommandSpec,
        already_exists: &str,
    ) -> Result<Option<serde_json::Value>, ProvisionError> {
        let output = run_cli(self.runner.as_ref(), spec, command).await?;
        if !output.is_success() && output.stderr.contains(already_exists) {
            return Ok(None);
        }
        let output = require_success(spec, output)?;
        parse_json(spec, &output).map(Some)
    }

    async fn adopt(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError> {
        tracing::info!(resource = %resource_label(spec), "Created concurrently, adopting");
        self.find(spec).await?.ok_or_else(|| {
            ProvisionError::transient(resource_label(spec), "reported as existing but not found yet")
        })
    }
}

/// ECR repository URIs look like `<account>.dkr.ecr.<region>.amazonaws.com/<name>`
fn registry_host(repository_uri: &str) -> String {
    repository_uri
        .split_once('/')
        .map(|(host, _)| host)
        .unwrap_or(repository_uri)
        .to_string()
}

#[async_trait]
impl Provisioner for AwsProvisioner {
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProvisionError> {
        let runner = self.runner.as_ref();
        match spec.kind {
            ResourceKind::Registry => {
                let command = self.aws(
                    spec,
                    ["ecr", "describe-repositories", "--repository-names", spec.name.as_str()],
                );
                let output = run_cli(runner, spec, command).await?;
                let Some(output) = describe_outcome(spec, output, &["RepositoryNotFoundException"])?
                else {
                    return Ok(None);
                };
                let json = parse_json(spec, &output)?;
                let uri = json["repositories"][0]["repositoryUri"]
                    .as_str()
                    .map(registry_host);
                Ok(Some(handle(spec, uri, false)))
            }
            ResourceKind::Cluster => {
                let command = self.aws(spec, ["ecs", "describe-clusters", "--clusters", spec.name.as_str()]);
                let output = require_success(spec, run_cli(runner, spec, command).await?)?;
                let json = parse_json(spec, &output)?;
                let active = json["clusters"].as_array().and_then(|clusters| {
                    clusters
                        .iter()
                        .find(|c| c["status"].as_str() == Some("ACTIVE"))
                });
                Ok(active.map(|c| handle(spec, c["clusterArn"].as_str().map(str::to_string), false)))
            }
            ResourceKind::Database => {
                let command = self.aws(
                    spec,
                    ["secretsmanager", "describe-secret", "--secret-id", spec.name.as_str()],
                );
                let output = run_cli(runner, spec, command).await?;
                let Some(output) = describe_outcome(spec, output, &["ResourceNotFoundException"])?
                else {
                    return Ok(None);
                };
                let json = parse_json(spec, &output)?;
                Ok(Some(handle(spec, json["ARN"].as_str().map(str::to_string), false)))
            }
            _ => Err(unsupported(spec, "aws")),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError> {
        match spec.kind {
            ResourceKind::Registry => {
                let command = self.aws(
                    spec,
                    [
                        "ecr",
                        "create-repository",
                        "--repository-name",
                        spec.name.as_str(),
                        "--image-scanning-configuration",
                        "scanOnPush=true",
                    ],
                );
                let Some(json) = self
                    .create_or_adopt(spec, command, "RepositoryAlreadyExistsException")
                    .await?
                else {
                    return self.adopt(spec).await;
                };
                let uri = json["repository"]["repositoryUri"].as_str().map(registry_host);
                Ok(handle(spec, uri, true))
            }
            ResourceKind::Cluster => {
                // create-cluster is itself idempotent for an existing name
                let command = self.aws(spec, ["ecs", "create-cluster", "--cluster-name", spec.name.as_str()]);
                let output = require_success(spec, run_cli(self.runner.as_ref(), spec, command).await?)?;
                let json = parse_json(spec, &output)?;
                let arn = json["cluster"]["clusterArn"].as_str().map(str::to_string);
                Ok(handle(spec, arn, true))
            }
            ResourceKind::Database => {
                let command = self.aws(
                    spec,
                    [
                        "secretsmanager",
                        "create-secret",
                        "--name",
                        spec.name.as_str(),
                        "--description",
                        "Database connection placeholder managed by launchpad",
                        "--secret-string",
                        "{}",
                    ],
                );
                let Some(json) = self
                    .create_or_adopt(spec, command, "ResourceExistsException")
                    .await?
                else {
                    return self.adopt(spec).await;
                };
                Ok(handle(spec, json["ARN"].as_str().map(str::to_string), true))
            }
            _ => Err(unsupported(spec, "aws")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::provision::ensure;
    use crate::testing::ScriptedRunner;

    fn registry_spec() -> ResourceSpec {
        ResourceSpec::managed(ResourceKind::Registry, "resume-ai-backend", "us-east-1")
    }

    #[tokio::test]
    async fn test_existing_repository_is_reused() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "ecr describe-repositories",
            CommandOutput::success(
                r#"{"repositories":[{"repositoryUri":"123456789012.dkr.ecr.us-east-1.amazonaws.com/resume-ai-backend"}]}"#,
            ),
        ));
        let provisioner = AwsProvisioner::new(runner.clone(), None);

        let handle = ensure(&provisioner, &registry_spec()).await.unwrap();

        assert!(!handle.created);
        assert_eq!(handle.uri.as_deref(), Some("123456789012.dkr.ecr.us-east-1.amazonaws.com"));
        assert_eq!(runner.count("create-repository"), 0);
    }

    #[tokio::test]
    async fn test_missing_repository_is_created_once() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "ecr describe-repositories",
                    CommandOutput::failure(
                        254,
                        "An error occurred (RepositoryNotFoundException) when calling the DescribeRepositories operation",
                    ),
                )
                .on(
                    "ecr create-repository",
                    CommandOutput::success(
                        r#"{"repository":{"repositoryUri":"123456789012.dkr.ecr.us-east-1.amazonaws.com/resume-ai-backend"}}"#,
                    ),
                ),
        );
        let provisioner = AwsProvisioner::new(runner.clone(), Some("staging".to_string()));

        let handle = ensure(&provisioner, &registry_spec()).await.unwrap();

        assert!(handle.created);
        assert_eq!(runner.count("create-repository"), 1);
        assert!(runner.command_lines()[0].contains("--profile staging"));
        assert!(runner.command_lines()[0].contains("--region us-east-1"));
    }

    #[tokio::test]
    async fn test_inactive_cluster_is_recreated() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "ecs describe-clusters",
                    CommandOutput::success(r#"{"clusters":[{"clusterArn":"arn:old","status":"INACTIVE"}],"failures":[]}"#),
                )
                .on(
                    "ecs create-cluster",
                    CommandOutput::success(r#"{"cluster":{"clusterArn":"arn:aws:ecs:us-east-1:1:cluster/prod","status":"ACTIVE"}}"#),
                ),
        );
        let provisioner = AwsProvisioner::new(runner.clone(), None);
        let spec = ResourceSpec::managed(ResourceKind::Cluster, "prod", "us-east-1");

        let handle = ensure(&provisioner, &spec).await.unwrap();
        assert!(handle.created);
        assert_eq!(handle.uri.as_deref(), Some("arn:aws:ecs:us-east-1:1:cluster/prod"));
    }

    #[tokio::test]
    async fn test_throttled_describe_is_transient() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "describe-secret",
            CommandOutput::failure(255, "An error occurred (ThrottlingException): Rate exceeded"),
        ));
        let provisioner = AwsProvisioner::new(runner.clone(), None);
        let spec = ResourceSpec::managed(ResourceKind::Database, "resume-ai-db", "us-east-1");

        let err = ensure(&provisioner, &spec).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.resource, "database/resume-ai-db");
        assert_eq!(runner.count("create-secret"), 0);
    }

    #[tokio::test]
    async fn test_cache_is_manual_only() {
        let provisioner = AwsProvisioner::new(Arc::new(ScriptedRunner::new()), None);
        let spec = ResourceSpec::managed(ResourceKind::Cache, "redis", "us-east-1");
        let err = ensure(&provisioner, &spec).await.unwrap_err();
        assert!(err.detail.contains("manual"));
    }
}
