//! Local docker daemon: the registry is the daemon itself, the "cluster" is
//! a docker network and the database placeholder is a named volume

use super::{describe_outcome, handle, require_success, run_cli, unsupported, Provisioner};
use crate::error::ProvisionError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{RegistryHandle, ResourceHandle, ResourceKind, ResourceSpec};
use std::sync::Arc;

const NOT_FOUND: &[&str] = &["No such network", "No such volume", "not found"];

pub struct LocalProvisioner {
    runner: Arc<dyn CommandRunner>,
}

impl LocalProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn object(spec: &ResourceSpec) -> Result<&'static str, ProvisionError> {
        match spec.kind {
            ResourceKind::Cluster => Ok("network"),
            ResourceKind::Database => Ok("volume"),
            _ => Err(unsupported(spec, "local")),
        }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProvisionError> {
        if spec.kind == ResourceKind::Registry {
            return Ok(Some(handle(spec, Some(RegistryHandle::LOCAL_URI.to_string()), false)));
        }
        let object = Self::object(spec)?;
        let command = CommandSpec::new("docker").args([object, "inspect", spec.name.as_str()]);
        let output = run_cli(self.runner.as_ref(), spec, command).await?;
        Ok(describe_outcome(spec, output, NOT_FOUND)?
            .map(|_| handle(spec, Some(spec.name.clone()), false)))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProvisionError> {
        let object = Self::object(spec)?;
        let command = CommandSpec::new("docker").args([object, "create", spec.name.as_str()]);
        require_success(spec, run_cli(self.runner.as_ref(), spec, command).await?)?;
        Ok(handle(spec, Some(spec.name.clone()), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::provision::ensure;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_registry_needs_no_docker_call() {
        let runner = Arc::new(ScriptedRunner::new());
        let provisioner = LocalProvisioner::new(runner.clone());
        let spec = ResourceSpec::managed(ResourceKind::Registry, "local", "local");

        let handle = ensure(&provisioner, &spec).await.unwrap();

        assert_eq!(handle.uri.as_deref(), Some(RegistryHandle::LOCAL_URI));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_network_is_created() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "docker network inspect",
            CommandOutput::failure(1, "Error response from daemon: network resume-ai not found"),
        ));
        let provisioner = LocalProvisioner::new(runner.clone());
        let spec = ResourceSpec::managed(ResourceKind::Cluster, "resume-ai", "local");

        let handle = ensure(&provisioner, &spec).await.unwrap();

        assert!(handle.created);
        assert_eq!(runner.count("docker network create resume-ai"), 1);
    }

    #[tokio::test]
    async fn test_existing_volume_is_reused() {
        let runner = Arc::new(ScriptedRunner::new().on("docker volume inspect", CommandOutput::success("[{}]")));
        let provisioner = LocalProvisioner::new(runner.clone());
        let spec = ResourceSpec::managed(ResourceKind::Database, "resume-ai-pgdata", "local");

        let handle = ensure(&provisioner, &spec).await.unwrap();

        assert!(!handle.created);
        assert_eq!(runner.count("volume create"), 0);
    }

    #[tokio::test]
    async fn test_daemon_down_is_transient() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "docker volume inspect",
            CommandOutput::failure(1, "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running? connection refused"),
        ));
        let provisioner = LocalProvisioner::new(runner);
        let spec = ResourceSpec::managed(ResourceKind::Database, "pgdata", "local");

        assert!(ensure(&provisioner, &spec).await.unwrap_err().is_transient());
    }
}
