//! GKE and AKS: server-side apply of Namespace, Deployment and Service objects

use super::{entry_service, render_error, run_apply, run_init_command, tail_lines, DeployHandle, EnvView, TopologyDeployer};
use crate::error::{ApplyError, InitError};
use crate::initialize::{env_lines, InitEnv, InitStep};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{Api, ListParams, LogParams, Patch, PatchParams};
use kube::{Client, Resource};
use launchpad_models::{ImageArtifact, LogTail, ServiceSpec, ServiceTopology};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tera::{Context as TeraContext, Tera};
use tokio::sync::OnceCell;
use tracing::{info, warn};

const FIELD_MANAGER: &str = "launchpad";

/// Exports `NAME=value` lines from stdin, then runs its arguments
const EXPORT_STDIN: &str = r#"while IFS= read -r line; do export "$line"; done; exec "$@""#;

/// How kubeconfig gets credentials for the target cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClusterCredentials {
    Gke {
        cluster: String,
        region: String,
        project: String,
    },
    Aks {
        cluster: String,
        resource_group: String,
        subscription: Option<String>,
    },
    /// Current kubeconfig context as is
    Current,
}

impl ClusterCredentials {
    fn command(&self) -> Option<CommandSpec> {
        match self {
            ClusterCredentials::Gke { cluster, region, project } => Some(
                CommandSpec::new("gcloud").args([
                    "container",
                    "clusters",
                    "get-credentials",
                    cluster.as_str(),
                    "--region",
                    region.as_str(),
                    "--project",
                    project.as_str(),
                    "--quiet",
                ]),
            ),
            ClusterCredentials::Aks { cluster, resource_group, subscription } => {
                let mut command = CommandSpec::new("az").args([
                    "aks",
                    "get-credentials",
                    "--name",
                    cluster.as_str(),
                    "--resource-group",
                    resource_group.as_str(),
                    "--overwrite-existing",
                ]);
                if let Some(subscription) = subscription {
                    command = command.args(["--subscription", subscription.as_str()]);
                }
                Some(command)
            }
            ClusterCredentials::Current => None,
        }
    }
}

#[derive(Serialize)]
struct PortView {
    container_port: u16,
    published: u16,
}

fn port_views(service: &ServiceSpec) -> Vec<PortView> {
    service
        .ports
        .iter()
        .map(|p| PortView {
            container_port: p.container_port,
            published: p.published(),
        })
        .collect()
}

fn templates() -> Result<Tera, ApplyError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("namespace", include_str!("templates/namespace.yaml")),
        ("deployment", include_str!("templates/deployment.yaml")),
        ("service", include_str!("templates/service.yaml")),
    ])
    .map_err(|e| render_error("kubernetes templates", e))?;
    Ok(tera)
}

fn render<T: DeserializeOwned>(tera: &Tera, template: &str, ctx: &TeraContext) -> Result<T, ApplyError> {
    let yaml = tera.render(template, ctx).map_err(|e| render_error(template, e))?;
    serde_yaml::from_str(&yaml).map_err(|e| render_error(template, e))
}

pub fn render_namespace(namespace: &str) -> Result<Namespace, ApplyError> {
    let mut ctx = TeraContext::new();
    ctx.insert("namespace", namespace);
    render(&templates()?, "namespace", &ctx)
}

pub fn render_deployment(
    namespace: &str,
    topology: &str,
    service: &ServiceSpec,
    image: &str,
) -> Result<Deployment, ApplyError> {
    let mut ctx = TeraContext::new();
    ctx.insert("namespace", namespace);
    ctx.insert("topology", topology);
    ctx.insert("name", &service.name);
    ctx.insert("image", image);
    ctx.insert("replicas", &service.replicas);
    ctx.insert("command", &service.command);
    ctx.insert("ports", &port_views(service));
    ctx.insert("env", &EnvView::from_service(service));
    render(&templates()?, "deployment", &ctx)
}

pub fn render_service(
    namespace: &str,
    topology: &str,
    service: &ServiceSpec,
    exposed: bool,
) -> Result<Service, ApplyError> {
    let mut ctx = TeraContext::new();
    ctx.insert("namespace", namespace);
    ctx.insert("topology", topology);
    ctx.insert("name", &service.name);
    ctx.insert("service_type", if exposed { "LoadBalancer" } else { "ClusterIP" });
    ctx.insert("ports", &port_views(service));
    render(&templates()?, "service", &ctx)
}

async fn apply_object<K>(api: &Api<K>, name: &str, object: &K) -> Result<K, ApplyError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    Ok(api.patch(name, &params, &Patch::Apply(object)).await?)
}

pub struct KubernetesDeployer {
    runner: Arc<dyn CommandRunner>,
    credentials: ClusterCredentials,
    namespace: String,
    endpoint_attempts: u32,
    endpoint_delay: Duration,
    client: OnceCell<Client>,
}

impl KubernetesDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, credentials: ClusterCredentials, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            credentials,
            namespace: namespace.into(),
            endpoint_attempts: 60,
            endpoint_delay: Duration::from_secs(5),
            client: OnceCell::new(),
        }
    }

    /// Fetches cluster credentials once, then builds a client from kubeconfig
    async fn client(&self) -> Result<&Client, ApplyError> {
        self.client
            .get_or_try_init(|| async {
                if let Some(command) = self.credentials.command() {
                    info!("Fetching cluster credentials");
                    run_apply(self.runner.as_ref(), command).await?;
                }
                Client::try_default()
                    .await
                    .map_err(|e| ApplyError::new(format!("failed to create Kubernetes client: {}", e)))
            })
            .await
    }

    /// Bounded wait for the LoadBalancer ingress address
    async fn wait_for_endpoint(&self, client: &Client, service: &ServiceSpec) -> Result<Option<String>, ApplyError> {
        let services: Api<Service> = Api::namespaced(client.clone(), &self.namespace);
        let port = service.ports.first().map(|p| p.published()).unwrap_or(80);

        for attempt in 1..=self.endpoint_attempts {
            let svc = services.get(&service.name).await?;
            let address = svc
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| ingress.first())
                .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));

            if let Some(address) = address {
                info!("External address: {}", address);
                return Ok(Some(format!("http://{}:{}", address, port)));
            }

            info!("Waiting for LoadBalancer address (attempt {}/{})...", attempt, self.endpoint_attempts);
            tokio::time::sleep(self.endpoint_delay).await;
        }

        warn!("LoadBalancer for '{}' has no address yet", service.name);
        Ok(None)
    }
}

#[async_trait]
impl TopologyDeployer for KubernetesDeployer {
    async fn apply(
        &self,
        topology: &ServiceTopology,
        artifact: &ImageArtifact,
    ) -> Result<DeployHandle, ApplyError> {
        let client = self.client().await?;
        let entry = entry_service(topology).map(|s| s.name.clone());

        let namespaces: Api<Namespace> = Api::all(client.clone());
        apply_object(&namespaces, &self.namespace, &render_namespace(&self.namespace)?).await?;
        info!("✓ Namespace {}", self.namespace);

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), &self.namespace);
        let services: Api<Service> = Api::namespaced(client.clone(), &self.namespace);
        for service in &topology.services {
            let image = service.resolved_image(artifact);
            if !service.volumes.is_empty() {
                warn!(service = %service.name, "Volume mounts are ignored on Kubernetes targets");
            }

            let deployment = render_deployment(&self.namespace, &topology.name, service, image)?;
            apply_object(&deployments, &service.name, &deployment).await?;
            info!("✓ Deployment {} ({} replicas, {})", service.name, service.replicas, image);

            if !service.ports.is_empty() {
                let exposed = entry.as_deref() == Some(service.name.as_str());
                let svc = render_service(&self.namespace, &topology.name, service, exposed)?;
                apply_object(&services, &service.name, &svc).await?;
                info!("✓ Service {}", service.name);
            }
        }

        let endpoint = match entry_service(topology) {
            Some(service) => self.wait_for_endpoint(client, service).await?,
            None => None,
        };

        Ok(DeployHandle {
            topology: topology.name.clone(),
            services: topology.services.iter().map(|s| s.name.clone()).collect(),
            endpoint,
            revision: artifact.digest.clone(),
        })
    }

    async fn recent_logs(&self, handle: &DeployHandle, lines: usize) -> Vec<LogTail> {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                warn!("Could not read logs: {}", e);
                return Vec::new();
            }
        };
        let pods: Api<Pod> = Api::namespaced(client.clone(), &self.namespace);

        let mut tails = Vec::new();
        for service in &handle.services {
            let selector = format!("app.kubernetes.io/name={}", service);
            let pod = match pods.list(&ListParams::default().labels(&selector).limit(1)).await {
                Ok(list) => list.items.into_iter().next().and_then(|p| p.metadata.name),
                Err(e) => {
                    warn!(service = %service, "Could not list pods: {}", e);
                    continue;
                }
            };
            let Some(pod) = pod else { continue };

            let params = LogParams {
                tail_lines: Some(lines as i64),
                ..LogParams::default()
            };
            match pods.logs(&pod, &params).await {
                Ok(text) => tails.push(LogTail {
                    service: service.clone(),
                    lines: tail_lines(&text, lines),
                }),
                Err(e) => warn!(service = %service, pod = %pod, "Could not read logs: {}", e),
            }
        }
        tails
    }

    async fn run_init(
        &self,
        _handle: &DeployHandle,
        step: &InitStep,
        env: &InitEnv,
    ) -> Result<(), InitError> {
        let mut command = CommandSpec::new("kubectl").arg("exec");
        if !env.is_empty() {
            command = command.arg("-i");
        }
        command = command
            .args(["-n", self.namespace.as_str()])
            .arg(format!("deploy/{}", step.service))
            .arg("--");
        // values go over stdin so they never appear on the local command line
        if !env.is_empty() {
            command = command.args(["sh", "-c", EXPORT_STDIN, "sh"]).stdin(env_lines(env));
        }
        let command = command.args(step.command.iter().cloned());
        run_init_command(self.runner.as_ref(), step, command).await?;
        Ok(())
    }
}
