use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Targets
// ============================================================================

/// A deployment destination
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Aws,
    Gcp,
    Azure,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Local => "local",
            TargetKind::Aws => "aws",
            TargetKind::Gcp => "gcp",
            TargetKind::Azure => "azure",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "compose" => Ok(TargetKind::Local),
            "aws" => Ok(TargetKind::Aws),
            "gcp" | "gcloud" => Ok(TargetKind::Gcp),
            "azure" | "az" => Ok(TargetKind::Azure),
            other => Err(format!(
                "unknown target '{}' (expected one of: local, aws, gcp, azure)",
                other
            )),
        }
    }
}

/// Provider credential context used by the cloud CLIs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum CredentialContext {
    #[default]
    None,
    Aws {
        profile: Option<String>,
        account_id: Option<String>,
    },
    Gcp {
        project: String,
    },
    Azure {
        subscription: Option<String>,
        resource_group: String,
    },
}

/// Selected once per invocation and never changed during the run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployTarget {
    pub kind: TargetKind,
    /// Region (aws/gcp) or location (azure); "local" for the compose target
    pub region: String,
    pub credentials: CredentialContext,
}

impl DeployTarget {
    pub fn local() -> Self {
        Self {
            kind: TargetKind::Local,
            region: "local".to_string(),
            credentials: CredentialContext::None,
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Registry,
    Cluster,
    Database,
    Cache,
    Dns,
    Certificate,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Registry => "registry",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Database => "database",
            ResourceKind::Cache => "cache",
            ResourceKind::Dns => "dns",
            ResourceKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the orchestrator provisions a resource or only reports it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    #[default]
    Managed,
    Manual,
}

/// Declaration of one infrastructure resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub mode: ResourceMode,
    /// Follow-up instructions for manual resources
    #[serde(default)]
    pub note: Option<String>,
}

impl ResourceSpec {
    pub fn managed(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            mode: ResourceMode::Managed,
            note: None,
        }
    }

    pub fn manual(kind: ResourceKind, name: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: String::new(),
            mode: ResourceMode::Manual,
            note: Some(note.into()),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.mode == ResourceMode::Manual
    }

    /// Checks the input constraints every provisioner relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("{} name must not be empty", self.kind));
        }
        if let Some(bad) = self
            .name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(format!(
                "{} name '{}' contains invalid character '{}'",
                self.kind, self.name, bad
            ));
        }
        if self.mode == ResourceMode::Managed && self.region.trim().is_empty() {
            return Err(format!("{} '{}' needs a region", self.kind, self.name));
        }
        Ok(())
    }
}

/// Reference to an existing (or freshly created) resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub region: String,
    /// Provider address of the resource (registry host, cluster endpoint, ...)
    pub uri: Option<String>,
    /// False when the resource already existed
    pub created: bool,
}

impl ResourceHandle {
    /// Registry view of this handle, if it is a registry with a known address
    pub fn as_registry(&self) -> Option<RegistryHandle> {
        if self.kind != ResourceKind::Registry {
            return None;
        }
        self.uri.as_ref().map(|uri| RegistryHandle {
            name: self.name.clone(),
            uri: uri.clone(),
            requires_push: uri != RegistryHandle::LOCAL_URI,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryHandle {
    pub name: String,
    pub uri: String,
    /// The docker daemon pseudo-registry is tagged into but never pushed to
    pub requires_push: bool,
}

impl RegistryHandle {
    pub const LOCAL_URI: &'static str = "launchpad.local";

    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            uri: Self::LOCAL_URI.to_string(),
            requires_push: false,
        }
    }

    /// Host part of the registry URI (used for docker login)
    pub fn host(&self) -> &str {
        self.uri.split('/').next().unwrap_or(&self.uri)
    }
}

/// Outcome of one resource in a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResourceOutcome {
    Ready(ResourceHandle),
    Manual(ResourceSpec),
}

// ============================================================================
// Images
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageArtifact {
    /// `repository:tag` as built locally
    pub local_tag: String,
    /// `registry/repository:tag`
    pub remote_uri: String,
    pub digest: Option<String>,
}

impl ImageArtifact {
    /// The one place a remote image reference is built
    pub fn remote_reference(registry_uri: &str, repository: &str, tag: &str) -> String {
        let registry = registry_uri.strip_suffix('/').unwrap_or(registry_uri);
        format!("{}/{}:{}", registry, repository, tag)
    }

    pub fn local_reference(repository: &str, tag: &str) -> String {
        format!("{}:{}", repository, tag)
    }
}

// ============================================================================
// Topology
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortMapping {
    pub container_port: u16,
    /// Host port (compose) or service port (kubernetes); defaults to the container port
    pub published_port: Option<u16>,
}

impl PortMapping {
    pub fn same(port: u16) -> Self {
        Self {
            container_port: port,
            published_port: None,
        }
    }

    pub fn published(&self) -> u16 {
        self.published_port.unwrap_or(self.container_port)
    }
}

/// Named volume mounted into a service (local target only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeMount {
    pub volume: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvValue {
    Literal { value: String },
    /// Resolved by the target platform, never by launchpad
    SecretRef { secret: String, key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvBinding {
    pub name: String,
    pub value: EnvValue,
}

impl EnvBinding {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Literal { value: value.into() },
        }
    }

    pub fn secret(name: impl Into<String>, secret: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::SecretRef {
                secret: secret.into(),
                key: key.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    /// External image; `None` binds the service to the published artifact
    pub image: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    pub replicas: u32,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
}

impl ServiceSpec {
    /// Single-replica service with no ports, env or volumes
    pub fn new(name: impl Into<String>, image: Option<String>) -> Self {
        Self {
            name: name.into(),
            image,
            ports: Vec::new(),
            env: Vec::new(),
            replicas: 1,
            command: None,
            volumes: Vec::new(),
        }
    }

    pub fn uses_artifact(&self) -> bool {
        self.image.is_none()
    }

    /// Image reference for this service given the published artifact
    pub fn resolved_image<'a>(&'a self, artifact: &'a ImageArtifact) -> &'a str {
        self.image.as_deref().unwrap_or(&artifact.remote_uri)
    }
}

/// Declared set of services; superseded as a whole on every deploy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceTopology {
    pub name: String,
    pub services: Vec<ServiceSpec>,
}

impl ServiceTopology {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckPolicy {
    /// Absolute URL or a path joined onto the deployment endpoint
    pub endpoint: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub expected_status: u16,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            endpoint: "/health".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
            expected_status: 200,
        }
    }
}

impl HealthCheckPolicy {
    /// Resolves the probe URL against a deployment base URL
    pub fn url(&self, base_url: Option<&str>) -> Option<String> {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return Some(self.endpoint.clone());
        }
        let base = base_url?.trim_end_matches('/');
        let path = self.endpoint.trim_start_matches('/');
        Some(format!("{}/{}", base, path))
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    Publish,
    Deploy,
    HealthGate,
    Initialize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Provision => "provision",
            Stage::Publish => "publish",
            Stage::Deploy => "deploy",
            Stage::HealthGate => "health_gate",
            Stage::Initialize => "initialize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogTail {
    pub service: String,
    pub lines: Vec<String>,
}

/// Why a run stopped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    /// Error class, e.g. "transient", "build", "health_timeout"
    pub kind: String,
    pub message: String,
    /// Safe to re-run without changing anything
    pub retryable: bool,
    /// Resource that failed to provision
    pub resource: Option<String>,
}

/// Outcome of one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentResult {
    pub run_id: Uuid,
    pub target: TargetKind,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub resources: Vec<ResourceOutcome>,
    pub artifact: Option<ImageArtifact>,
    pub endpoint: Option<String>,
    pub failure: Option<StageFailure>,
    pub warnings: Vec<String>,
    pub log_tails: Vec<LogTail>,
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }

    /// Resources the operator still has to set up by hand
    pub fn manual_steps(&self) -> Vec<&ResourceSpec> {
        self.resources
            .iter()
            .filter_map(|r| match r {
                ResourceOutcome::Manual(spec) => Some(spec),
                ResourceOutcome::Ready(_) => None,
            })
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("AWS".parse::<TargetKind>().unwrap(), TargetKind::Aws);
        assert_eq!("compose".parse::<TargetKind>().unwrap(), TargetKind::Local);
        assert!("heroku".parse::<TargetKind>().is_err());
        assert_eq!(TargetKind::Gcp.to_string(), "gcp");
    }

    #[test]
    fn test_remote_reference_is_deterministic() {
        let a = ImageArtifact::remote_reference("123.dkr.ecr.us-east-1.amazonaws.com", "backend", "latest");
        let b = ImageArtifact::remote_reference("123.dkr.ecr.us-east-1.amazonaws.com/", "backend", "latest");
        assert_eq!(a, "123.dkr.ecr.us-east-1.amazonaws.com/backend:latest");
        assert_eq!(a, b);
    }

    #[test]
    fn test_resource_spec_validation() {
        assert!(ResourceSpec::managed(ResourceKind::Registry, "backend", "us-east-1").validate().is_ok());
        assert!(ResourceSpec::managed(ResourceKind::Registry, "", "us-east-1").validate().is_err());
        assert!(ResourceSpec::managed(ResourceKind::Cluster, "bad name", "us-east-1").validate().is_err());
        assert!(ResourceSpec::managed(ResourceKind::Cluster, "prod", "").validate().is_err());
        // manual resources carry no region
        assert!(ResourceSpec::manual(ResourceKind::Dns, "example.com", "point A record").validate().is_ok());
    }

    #[test]
    fn test_registry_handle_from_resource() {
        let handle = ResourceHandle {
            kind: ResourceKind::Registry,
            name: "resume-ai".to_string(),
            region: "eastus".to_string(),
            uri: Some("resumeai.azurecr.io".to_string()),
            created: false,
        };
        let registry = handle.as_registry().unwrap();
        assert_eq!(registry.uri, "resumeai.azurecr.io");
        assert!(registry.requires_push);

        let local = ResourceHandle {
            uri: Some(RegistryHandle::LOCAL_URI.to_string()),
            ..handle.clone()
        };
        assert!(!local.as_registry().unwrap().requires_push);

        let cluster = ResourceHandle { kind: ResourceKind::Cluster, ..handle };
        assert!(cluster.as_registry().is_none());
    }

    #[test]
    fn test_health_policy_url() {
        let policy = HealthCheckPolicy::default();
        assert_eq!(
            policy.url(Some("http://localhost:8000/")).as_deref(),
            Some("http://localhost:8000/health")
        );
        assert_eq!(policy.url(None), None);

        let absolute = HealthCheckPolicy {
            endpoint: "https://api.example.com/health".to_string(),
            ..HealthCheckPolicy::default()
        };
        assert_eq!(absolute.url(None).as_deref(), Some("https://api.example.com/health"));
    }

    #[test]
    fn test_env_binding_serialization() {
        let binding = EnvBinding::secret("DATABASE_URL", "resume-ai-db", "url");
        let json = serde_json::to_string(&binding).unwrap();
        assert!(json.contains("\"type\":\"secret_ref\""));
        let parsed: EnvBinding = serde_json::from_str(&json).unwrap();
        assert_eq!(binding, parsed);
    }

    #[test]
    fn test_manual_steps() {
        let now = Utc::now();
        let result = DeploymentResult {
            run_id: Uuid::new_v4(),
            target: TargetKind::Aws,
            status: DeploymentStatus::Succeeded,
            started_at: now,
            finished_at: now,
            elapsed_ms: 1200,
            resources: vec![
                ResourceOutcome::Ready(ResourceHandle {
                    kind: ResourceKind::Cluster,
                    name: "prod".to_string(),
                    region: "us-east-1".to_string(),
                    uri: None,
                    created: true,
                }),
                ResourceOutcome::Manual(ResourceSpec::manual(ResourceKind::Cache, "redis", "create ElastiCache")),
            ],
            artifact: None,
            endpoint: None,
            failure: None,
            warnings: vec![],
            log_tails: vec![],
        };
        let steps = result.manual_steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, ResourceKind::Cache);
        assert_eq!(result.elapsed(), Duration::from_millis(1200));
    }
}
