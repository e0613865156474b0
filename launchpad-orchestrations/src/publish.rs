//! Image build and publication

use crate::error::PublishError;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{ImageArtifact, RegistryHandle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// What to build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRequest {
    /// Docker build context
    pub context: PathBuf,
    /// Defaults to `<context>/Dockerfile`
    pub dockerfile: Option<PathBuf>,
    pub repository: String,
    pub tag: String,
}

#[async_trait]
pub trait ImagePublisher: Send + Sync {
    async fn publish(
        &self,
        request: &PublishRequest,
        registry: &RegistryHandle,
    ) -> Result<ImageArtifact, PublishError>;
}

/// How docker gets credentials for the target registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryLogin {
    /// Local daemon, or credentials already configured
    None,
    /// `aws ecr get-login-password | docker login`
    Ecr {
        region: String,
        profile: Option<String>,
    },
    /// `gcloud auth configure-docker <host>`
    ArtifactRegistry { project: String },
    /// `az acr login --name <registry>`
    Acr { subscription: Option<String> },
}

pub struct DockerPublisher {
    runner: Arc<dyn CommandRunner>,
    login: RegistryLogin,
}

impl DockerPublisher {
    pub fn new(runner: Arc<dyn CommandRunner>, login: RegistryLogin) -> Self {
        Self { runner, login }
    }

    async fn docker(&self, command: CommandSpec) -> std::io::Result<CommandOutput> {
        self.runner.run(&command).await
    }

    async fn build(&self, request: &PublishRequest, local_tag: &str) -> Result<(), PublishError> {
        let dockerfile = request
            .dockerfile
            .clone()
            .unwrap_or_else(|| request.context.join("Dockerfile"));
        let command = CommandSpec::new("docker").args([
            "build".to_string(),
            "-t".to_string(),
            local_tag.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            request.context.display().to_string(),
        ]);

        let output = self
            .docker(command)
            .await
            .map_err(|e| PublishError::Build(format!("failed to run docker build: {}", e)))?;
        if !output.is_success() {
            return Err(PublishError::Build(last_lines(&output.failure_detail(), 20)));
        }
        Ok(())
    }

    async fn authenticate(&self, registry: &RegistryHandle) -> Result<(), PublishError> {
        let host = registry.host();
        let output = match &self.login {
            RegistryLogin::None => return Ok(()),
            RegistryLogin::Ecr { region, profile } => {
                let mut password_cmd =
                    CommandSpec::new("aws").args(["ecr", "get-login-password", "--region", region.as_str()]);
                if let Some(profile) = profile {
                    password_cmd = password_cmd.args(["--profile", profile.as_str()]);
                }
                let password = self.run_login(password_cmd).await?;
                let login = CommandSpec::new("docker")
                    .args(["login", "--username", "AWS", "--password-stdin", host])
                    .stdin(password.stdout.trim())
                    .sensitive();
                self.run_login(login).await?
            }
            RegistryLogin::ArtifactRegistry { project } => {
                let command = CommandSpec::new("gcloud").args([
                    "auth",
                    "configure-docker",
                    host,
                    "--project",
                    project.as_str(),
                    "--quiet",
                ]);
                self.run_login(command).await?
            }
            RegistryLogin::Acr { subscription } => {
                // ACR login server is "<name>.azurecr.io"
                let name = host.split('.').next().unwrap_or(host);
                let mut command = CommandSpec::new("az").args(["acr", "login", "--name", name]);
                if let Some(subscription) = subscription {
                    command = command.args(["--subscription", subscription.as_str()]);
                }
                self.run_login(command).await?
            }
        };
        tracing::debug!(registry = %host, stdout = %output.stdout.trim(), "Registry login done");
        Ok(())
    }

    async fn run_login(&self, command: CommandSpec) -> Result<CommandOutput, PublishError> {
        let output = self
            .docker(command.clone())
            .await
            .map_err(|e| PublishError::Auth(format!("failed to run {}: {}", command.program, e)))?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(PublishError::Auth(output.failure_detail()))
        }
    }

    async fn tag_remote(&self, local_tag: &str, remote_uri: &str) -> Result<(), PublishError> {
        let tag = CommandSpec::new("docker").args(["tag", local_tag, remote_uri]);
        let output = self
            .docker(tag)
            .await
            .map_err(|e| PublishError::Push(format!("failed to run docker tag: {}", e)))?;
        if !output.is_success() {
            return Err(PublishError::Push(output.failure_detail()));
        }
        Ok(())
    }

    /// `repo@sha256:...` as reported after a push; absent for unpushed images
    async fn repo_digest(&self, remote_uri: &str) -> Option<String> {
        let command = CommandSpec::new("docker").args([
            "image",
            "inspect",
            "--format",
            "{{json .RepoDigests}}",
            remote_uri,
        ]);
        let output = self.docker(command).await.ok()?;
        if !output.is_success() {
            return None;
        }
        let digests: Vec<String> = serde_json::from_str(output.stdout.trim()).ok()?;
        digests
            .iter()
            .find_map(|d| d.split_once('@').map(|(_, digest)| digest.to_string()))
    }
}

#[async_trait]
impl ImagePublisher for DockerPublisher {
    async fn publish(
        &self,
        request: &PublishRequest,
        registry: &RegistryHandle,
    ) -> Result<ImageArtifact, PublishError> {
        let local_tag = ImageArtifact::local_reference(&request.repository, &request.tag);
        let remote_uri = ImageArtifact::remote_reference(&registry.uri, &request.repository, &request.tag);

        info!("Building image {}", local_tag);
        self.build(request, &local_tag).await?;

        if registry.requires_push {
            info!("Authenticating with {}", registry.host());
            self.authenticate(registry).await?;
        }

        self.tag_remote(&local_tag, &remote_uri).await?;

        let digest = if registry.requires_push {
            info!("Pushing {}", remote_uri);
            let push = CommandSpec::new("docker").args(["push", remote_uri.as_str()]);
            let output = self
                .docker(push)
                .await
                .map_err(|e| PublishError::Push(format!("failed to run docker push: {}", e)))?;
            if !output.is_success() {
                return Err(PublishError::Push(output.failure_detail()));
            }
            self.repo_digest(&remote_uri).await
        } else {
            None
        };

        info!("✓ Image ready: {}", remote_uri);
        Ok(ImageArtifact {
            local_tag,
            remote_uri,
            digest,
        })
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn request() -> PublishRequest {
        PublishRequest {
            context: PathBuf::from("./backend"),
            dockerfile: None,
            repository: "backend".to_string(),
            tag: "latest".to_string(),
        }
    }

    fn ecr() -> RegistryHandle {
        RegistryHandle {
            name: "resume-ai-backend".to_string(),
            uri: "123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            requires_push: true,
        }
    }

    #[tokio::test]
    async fn test_remote_uri_is_registry_plus_repository_and_tag() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("get-login-password", CommandOutput::success("s3cr3t\n"))
                .on(
                    "image inspect",
                    CommandOutput::success(
                        r#"["123456789012.dkr.ecr.us-east-1.amazonaws.com/backend@sha256:abc123"]"#,
                    ),
                ),
        );
        let publisher = DockerPublisher::new(
            runner.clone(),
            RegistryLogin::Ecr {
                region: "us-east-1".to_string(),
                profile: None,
            },
        );

        let artifact = publisher.publish(&request(), &ecr()).await.unwrap();

        assert_eq!(
            artifact.remote_uri,
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/backend:latest"
        );
        assert_eq!(artifact.local_tag, "backend:latest");
        assert_eq!(artifact.digest.as_deref(), Some("sha256:abc123"));

        let lines = runner.command_lines();
        assert!(lines[0].starts_with("docker build -t backend:latest -f ./backend/Dockerfile"));
        assert_eq!(runner.count("docker push"), 1);

        // the password only travels over stdin
        let login = runner.calls().into_iter().find(|c| c.args.first().map(String::as_str) == Some("login")).unwrap();
        assert_eq!(login.stdin.as_deref(), Some("s3cr3t"));
        assert!(lines.iter().all(|l| !l.contains("s3cr3t")));
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_push() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "docker build",
            CommandOutput::failure(1, "failed to solve: failed to read dockerfile: open Dockerfile: no such file or directory"),
        ));
        let publisher = DockerPublisher::new(runner.clone(), RegistryLogin::None);

        let err = publisher.publish(&request(), &ecr()).await.unwrap_err();

        assert!(matches!(err, PublishError::Build(_)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_login_failure_is_auth_error() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "az acr login",
            CommandOutput::failure(1, "Please run 'az login' to setup account."),
        ));
        let publisher = DockerPublisher::new(runner.clone(), RegistryLogin::Acr { subscription: None });
        let registry = RegistryHandle {
            name: "resumeai".to_string(),
            uri: "resumeai.azurecr.io".to_string(),
            requires_push: true,
        };

        let err = publisher.publish(&request(), &registry).await.unwrap_err();

        assert!(matches!(err, PublishError::Auth(_)));
        assert_eq!(runner.count("az acr login --name resumeai"), 1);
        assert_eq!(runner.count("docker push"), 0);
    }

    #[tokio::test]
    async fn test_local_registry_is_tagged_not_pushed() {
        let runner = Arc::new(ScriptedRunner::new());
        let publisher = DockerPublisher::new(runner.clone(), RegistryLogin::None);

        let artifact = publisher.publish(&request(), &RegistryHandle::local()).await.unwrap();

        assert_eq!(artifact.remote_uri, "launchpad.local/backend:latest");
        assert!(artifact.digest.is_none());
        assert_eq!(runner.count("docker tag backend:latest launchpad.local/backend:latest"), 1);
        assert_eq!(runner.count("docker push"), 0);
    }

    #[test]
    fn test_last_lines() {
        assert_eq!(last_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(last_lines("a", 5), "a");
    }
}
