//! Per-target wiring of provisioner, publisher and deployer
//!
//! This is the only place that branches on the target kind; every stage
//! after it works through the traits.

use crate::deploy::{ClusterCredentials, ComposeDeployer, EcsDeployer, EcsSettings, KubernetesDeployer, TopologyDeployer};
use crate::error::BackendError;
use crate::process::CommandRunner;
use crate::provision::{AwsProvisioner, AzureProvisioner, GcpProvisioner, LocalProvisioner, Provisioner};
use crate::publish::{DockerPublisher, ImagePublisher, RegistryLogin};
use launchpad_models::{CredentialContext, DeployTarget, TargetKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Target-independent knobs the CLI resolves from args and environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    /// ECS/GKE/AKS cluster name, or the docker network on the local target
    pub cluster: String,
    /// Kubernetes namespace
    pub namespace: String,
    /// Where the compose file is written
    pub work_dir: PathBuf,
    /// Registry name, attached to AKS for image pulls
    pub registry_name: Option<String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub execution_role_arn: Option<String>,
    /// Load balancer URL in front of an ECS service
    pub public_url: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            cluster: "launchpad".to_string(),
            namespace: "launchpad".to_string(),
            work_dir: PathBuf::from("."),
            registry_name: None,
            subnets: Vec::new(),
            security_groups: Vec::new(),
            execution_role_arn: None,
            public_url: None,
        }
    }
}

pub struct Backend {
    pub target: DeployTarget,
    pub provisioner: Box<dyn Provisioner>,
    pub publisher: Box<dyn ImagePublisher>,
    pub deployer: Box<dyn TopologyDeployer>,
}

impl Backend {
    pub fn for_target(
        target: &DeployTarget,
        settings: &BackendSettings,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, BackendError> {
        let (provisioner, publisher, deployer) = match (target.kind, &target.credentials) {
            (TargetKind::Local, _) => local(settings, runner),
            (TargetKind::Aws, CredentialContext::Aws { profile, .. }) => {
                aws(target, settings, runner, profile.clone())
            }
            (TargetKind::Aws, CredentialContext::None) => aws(target, settings, runner, None),
            (TargetKind::Gcp, CredentialContext::Gcp { project }) => gcp(target, settings, runner, project),
            (TargetKind::Azure, CredentialContext::Azure { subscription, resource_group }) => {
                azure(settings, runner, resource_group, subscription.clone())
            }
            (TargetKind::Gcp, CredentialContext::None) => {
                return Err(BackendError::MissingSetting {
                    target: target.kind.to_string(),
                    setting: "a GCP project",
                })
            }
            (TargetKind::Azure, CredentialContext::None) => {
                return Err(BackendError::MissingSetting {
                    target: target.kind.to_string(),
                    setting: "an Azure resource group",
                })
            }
            (kind, other) => {
                return Err(BackendError::CredentialMismatch {
                    target: kind.to_string(),
                    found: credential_provider(other).to_string(),
                })
            }
        };

        Ok(Self {
            target: target.clone(),
            provisioner,
            publisher,
            deployer,
        })
    }
}

type Parts = (Box<dyn Provisioner>, Box<dyn ImagePublisher>, Box<dyn TopologyDeployer>);

fn local(settings: &BackendSettings, runner: Arc<dyn CommandRunner>) -> Parts {
    (
        Box::new(LocalProvisioner::new(runner.clone())),
        Box::new(DockerPublisher::new(runner.clone(), RegistryLogin::None)),
        Box::new(ComposeDeployer::new(
            runner,
            settings.work_dir.clone(),
            Some(settings.cluster.clone()),
        )),
    )
}

fn aws(
    target: &DeployTarget,
    settings: &BackendSettings,
    runner: Arc<dyn CommandRunner>,
    profile: Option<String>,
) -> Parts {
    let ecs = EcsSettings {
        profile: profile.clone(),
        subnets: settings.subnets.clone(),
        security_groups: settings.security_groups.clone(),
        execution_role_arn: settings.execution_role_arn.clone(),
        public_url: settings.public_url.clone(),
        ..EcsSettings::new(settings.cluster.clone(), target.region.clone())
    };
    (
        Box::new(AwsProvisioner::new(runner.clone(), profile.clone())),
        Box::new(DockerPublisher::new(
            runner.clone(),
            RegistryLogin::Ecr {
                region: target.region.clone(),
                profile,
            },
        )),
        Box::new(EcsDeployer::new(runner, ecs)),
    )
}

fn gcp(target: &DeployTarget, settings: &BackendSettings, runner: Arc<dyn CommandRunner>, project: &str) -> Parts {
    (
        Box::new(GcpProvisioner::new(runner.clone(), project)),
        Box::new(DockerPublisher::new(
            runner.clone(),
            RegistryLogin::ArtifactRegistry {
                project: project.to_string(),
            },
        )),
        Box::new(KubernetesDeployer::new(
            runner,
            ClusterCredentials::Gke {
                cluster: settings.cluster.clone(),
                region: target.region.clone(),
                project: project.to_string(),
            },
            settings.namespace.clone(),
        )),
    )
}

fn azure(
    settings: &BackendSettings,
    runner: Arc<dyn CommandRunner>,
    resource_group: &str,
    subscription: Option<String>,
) -> Parts {
    (
        Box::new(AzureProvisioner::new(
            runner.clone(),
            resource_group,
            subscription.clone(),
            settings.registry_name.clone(),
        )),
        Box::new(DockerPublisher::new(
            runner.clone(),
            RegistryLogin::Acr {
                subscription: subscription.clone(),
            },
        )),
        Box::new(KubernetesDeployer::new(
            runner,
            ClusterCredentials::Aks {
                cluster: settings.cluster.clone(),
                resource_group: resource_group.to_string(),
                subscription,
            },
            settings.namespace.clone(),
        )),
    )
}

fn credential_provider(credentials: &CredentialContext) -> &'static str {
    match credentials {
        CredentialContext::None => "none",
        CredentialContext::Aws { .. } => "aws",
        CredentialContext::Gcp { .. } => "gcp",
        CredentialContext::Azure { .. } => "azure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn runner() -> Arc<dyn CommandRunner> {
        Arc::new(ScriptedRunner::new())
    }

    #[test]
    fn test_every_target_builds() {
        let settings = BackendSettings::default();
        let targets = [
            DeployTarget::local(),
            DeployTarget {
                kind: TargetKind::Aws,
                region: "us-east-1".into(),
                credentials: CredentialContext::None,
            },
            DeployTarget {
                kind: TargetKind::Gcp,
                region: "us-central1".into(),
                credentials: CredentialContext::Gcp { project: "acme".into() },
            },
            DeployTarget {
                kind: TargetKind::Azure,
                region: "eastus".into(),
                credentials: CredentialContext::Azure {
                    subscription: None,
                    resource_group: "resume-ai-rg".into(),
                },
            },
        ];
        for target in &targets {
            let backend = Backend::for_target(target, &settings, runner()).unwrap();
            assert_eq!(backend.target.kind, target.kind);
        }
    }

    #[test]
    fn test_gcp_without_project_is_rejected() {
        let target = DeployTarget {
            kind: TargetKind::Gcp,
            region: "us-central1".into(),
            credentials: CredentialContext::None,
        };
        let err = Backend::for_target(&target, &BackendSettings::default(), runner()).err().unwrap();
        assert!(matches!(err, BackendError::MissingSetting { .. }));
    }

    #[test]
    fn test_mismatched_credentials_are_rejected() {
        let target = DeployTarget {
            kind: TargetKind::Azure,
            region: "eastus".into(),
            credentials: CredentialContext::Gcp { project: "acme".into() },
        };
        let err = Backend::for_target(&target, &BackendSettings::default(), runner()).err().unwrap();
        assert_eq!(
            err,
            BackendError::CredentialMismatch {
                target: "azure".into(),
                found: "gcp".into()
            }
        );
    }
}
