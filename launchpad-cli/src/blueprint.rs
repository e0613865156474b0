//! Turns CLI arguments and configuration into a [`DeployPlan`]
//!
//! The application stack is fixed: an API backend built from the local
//! context, PostgreSQL and Redis, and an optional frontend. On the local
//! target database and cache run as containers; on cloud targets they are
//! manual resources reached through platform secrets.

use crate::cli::DeployArgs;
use crate::config::Config;
use anyhow::{bail, Result};
use launchpad_models::{
    CredentialContext, DeployTarget, EnvBinding, HealthCheckPolicy, PortMapping, ResourceKind, ResourceSpec,
    ServiceSpec, ServiceTopology, TargetKind, VolumeMount,
};
use launchpad_orchestrations::{BackendSettings, DeployPlan, InitPlan, InitStep, PublishRequest, SeedCredentials};
use secrecy::{ExposeSecret, SecretString};

pub const BACKEND_PORT: u16 = 8000;
pub const FRONTEND_PORT: u16 = 8501;
const DB_NAME: &str = "resume_ai";
const DB_USER: &str = "resume_ai";

pub struct Blueprint {
    pub plan: DeployPlan,
    pub settings: BackendSettings,
}

/// `local_db_password` is only read for the local target
pub fn resolve(args: &DeployArgs, config: &Config, local_db_password: Option<&SecretString>) -> Result<Blueprint> {
    let app = config.app_name.as_str();
    let region = args
        .region
        .clone()
        .or_else(|| config.region.clone())
        .unwrap_or_else(|| default_region(args.target).to_string());
    let cluster = args
        .cluster
        .clone()
        .or_else(|| config.cluster.clone())
        .unwrap_or_else(|| app.to_string());
    let registry = args
        .registry
        .clone()
        .or_else(|| config.registry.clone())
        .unwrap_or_else(|| default_registry(args.target, app));
    let domain = args.domain.clone().or_else(|| config.domain.clone());

    let target = DeployTarget {
        kind: args.target,
        region: region.clone(),
        credentials: credentials(args.target, config),
    };

    // An ECR repository is the image repository itself
    let repository = match args.target {
        TargetKind::Aws => registry.clone(),
        _ => "backend".to_string(),
    };

    let mut resources = Vec::new();
    if args.target != TargetKind::Local {
        resources.push(ResourceSpec::managed(ResourceKind::Registry, &registry, &region));
    } else {
        resources.push(ResourceSpec::managed(ResourceKind::Registry, "local", "local"));
    }
    resources.push(ResourceSpec::managed(ResourceKind::Cluster, &cluster, &region));
    resources.push(ResourceSpec::managed(ResourceKind::Database, database_resource(args.target, app), &region));
    resources.extend(manual_resources(args.target, app, domain.as_deref()));

    let topology = match args.target {
        TargetKind::Local => {
            let Some(password) = local_db_password else {
                bail!("the local target needs a database password");
            };
            local_topology(app, password, config.frontend_image.as_deref())
        }
        _ => cloud_topology(app, config.frontend_image.as_deref()),
    };

    let policy = HealthCheckPolicy {
        endpoint: args.health_path.clone(),
        interval: args.health_interval,
        timeout: args.health_timeout,
        ..HealthCheckPolicy::default()
    };
    if policy.interval.is_zero() || policy.timeout < policy.interval {
        bail!("--health-timeout must be at least --health-interval, and the interval must be positive");
    }

    let plan = DeployPlan {
        target,
        resources,
        image: PublishRequest {
            context: args.context.clone(),
            dockerfile: args.dockerfile.clone(),
            repository,
            tag: args.tag.clone(),
        },
        topology,
        policy,
        init: init_plan(args),
        log_tail_lines: config.log_tail_lines,
        endpoint_override: args.endpoint.clone(),
    };

    let settings = BackendSettings {
        cluster,
        namespace: config.namespace.clone(),
        work_dir: config.work_dir.clone(),
        registry_name: (args.target == TargetKind::Azure).then_some(registry),
        subnets: config.ecs_subnets.clone(),
        security_groups: config.ecs_security_groups.clone(),
        execution_role_arn: config.ecs_execution_role_arn.clone(),
        public_url: config.public_url.clone(),
    };

    Ok(Blueprint { plan, settings })
}

fn default_region(target: TargetKind) -> &'static str {
    match target {
        TargetKind::Local => "local",
        TargetKind::Aws => "us-east-1",
        TargetKind::Gcp => "us-central1",
        TargetKind::Azure => "eastus",
    }
}

fn default_registry(target: TargetKind, app: &str) -> String {
    match target {
        // ACR names are alphanumeric only
        TargetKind::Azure => app.chars().filter(char::is_ascii_alphanumeric).collect(),
        TargetKind::Aws => format!("{}-backend", app),
        _ => app.to_string(),
    }
}

fn credentials(target: TargetKind, config: &Config) -> CredentialContext {
    match target {
        TargetKind::Local => CredentialContext::None,
        TargetKind::Aws => CredentialContext::Aws {
            profile: config.aws_profile.clone(),
            account_id: config.aws_account_id.clone(),
        },
        TargetKind::Gcp => match &config.gcp_project {
            Some(project) => CredentialContext::Gcp {
                project: project.clone(),
            },
            None => CredentialContext::None,
        },
        TargetKind::Azure => CredentialContext::Azure {
            subscription: config.azure_subscription.clone(),
            resource_group: config
                .azure_resource_group
                .clone()
                .unwrap_or_else(|| format!("{}-rg", config.app_name)),
        },
    }
}

/// Local: the postgres volume. Cloud: the secret store the app reads its
/// connection string from.
fn database_resource(target: TargetKind, app: &str) -> String {
    match target {
        TargetKind::Local => format!("{}-pgdata", app),
        TargetKind::Azure => format!("{}-kv", app),
        _ => format!("{}-db", app),
    }
}

fn manual_resources(target: TargetKind, app: &str, domain: Option<&str>) -> Vec<ResourceSpec> {
    let (database, cache, dns, certificate) = match target {
        TargetKind::Local => return Vec::new(),
        TargetKind::Aws => (
            format!("Create an RDS PostgreSQL 15 instance and store its URL as key 'url' in secret {}-db", app),
            format!("Create an ElastiCache Redis 7 cluster and store its URL as key 'url' in secret {}-cache", app),
            "Point the domain at the load balancer in front of the ECS service (Route 53 alias)",
            "Request an ACM certificate for the domain and attach it to the load balancer listener",
        ),
        TargetKind::Gcp => (
            format!(
                "Create a Cloud SQL PostgreSQL 15 instance, then: kubectl create secret generic {}-db --from-literal=url=<connection-url>",
                app
            ),
            format!(
                "Create a Memorystore Redis 7 instance, then: kubectl create secret generic {}-cache --from-literal=url=<redis-url>",
                app
            ),
            "Add an A record for the domain pointing at the service's external IP (Cloud DNS)",
            "Create a Google-managed certificate for the domain",
        ),
        TargetKind::Azure => (
            format!(
                "Create an Azure Database for PostgreSQL flexible server, then: kubectl create secret generic {}-db --from-literal=url=<connection-url>",
                app
            ),
            format!(
                "Create an Azure Cache for Redis instance, then: kubectl create secret generic {}-cache --from-literal=url=<redis-url>",
                app
            ),
            "Add an A record for the domain pointing at the service's external IP (Azure DNS)",
            "Issue a certificate for the domain (cert-manager or App Gateway)",
        ),
    };

    let mut specs = vec![
        ResourceSpec::manual(ResourceKind::Database, format!("{}-postgres", app), database),
        ResourceSpec::manual(ResourceKind::Cache, format!("{}-redis", app), cache),
    ];
    if let Some(domain) = domain {
        specs.push(ResourceSpec::manual(ResourceKind::Dns, domain, format!("{}: {}", domain, dns)));
        specs.push(ResourceSpec::manual(
            ResourceKind::Certificate,
            domain,
            format!("{}: {}", domain, certificate),
        ));
    }
    specs
}

fn local_topology(app: &str, db_password: &SecretString, frontend_image: Option<&str>) -> ServiceTopology {
    let mut backend = ServiceSpec::new("backend", None);
    backend.ports = vec![PortMapping::same(BACKEND_PORT)];
    backend.env = vec![
        EnvBinding::literal(
            "DATABASE_URL",
            format!(
                "postgresql://{}:{}@postgres:5432/{}",
                DB_USER,
                db_password.expose_secret(),
                DB_NAME
            ),
        ),
        EnvBinding::literal("REDIS_URL", "redis://redis:6379/0"),
        EnvBinding::literal("ENVIRONMENT", "development"),
    ];

    let mut postgres = ServiceSpec::new("postgres", Some("postgres:15-alpine".to_string()));
    postgres.ports = vec![PortMapping::same(5432)];
    postgres.env = vec![
        EnvBinding::literal("POSTGRES_DB", DB_NAME),
        EnvBinding::literal("POSTGRES_USER", DB_USER),
        EnvBinding::literal("POSTGRES_PASSWORD", db_password.expose_secret()),
    ];
    postgres.volumes = vec![VolumeMount {
        volume: format!("{}-pgdata", app),
        path: "/var/lib/postgresql/data".to_string(),
    }];

    let mut redis = ServiceSpec::new("redis", Some("redis:7-alpine".to_string()));
    redis.ports = vec![PortMapping::same(6379)];

    let mut services = vec![backend, postgres, redis];
    services.extend(frontend(frontend_image, "http://backend:8000"));

    ServiceTopology {
        name: app.to_string(),
        services,
    }
}

fn cloud_topology(app: &str, frontend_image: Option<&str>) -> ServiceTopology {
    let mut backend = ServiceSpec::new("backend", None);
    backend.ports = vec![PortMapping::same(BACKEND_PORT)];
    backend.replicas = 2;
    backend.env = vec![
        EnvBinding::secret("DATABASE_URL", format!("{}-db", app), "url"),
        EnvBinding::secret("REDIS_URL", format!("{}-cache", app), "url"),
        EnvBinding::literal("ENVIRONMENT", "production"),
    ];

    let mut services = vec![backend];
    services.extend(frontend(frontend_image, "http://backend:8000"));

    ServiceTopology {
        name: app.to_string(),
        services,
    }
}

fn frontend(image: Option<&str>, api_url: &str) -> Option<ServiceSpec> {
    let mut frontend = ServiceSpec::new("frontend", Some(image?.to_string()));
    frontend.ports = vec![PortMapping::same(FRONTEND_PORT)];
    frontend.env = vec![EnvBinding::literal("API_BASE_URL", api_url)];
    Some(frontend)
}

fn init_plan(args: &DeployArgs) -> InitPlan {
    if args.skip_init {
        return InitPlan::default();
    }

    let mut steps = vec![InitStep::new("backend", ["python", "scripts/setup_database.py"])];
    if args.sample_data {
        steps.push(InitStep::new("backend", ["python", "scripts/populate_sample_data.py"]));
    }

    let seed = match (&args.seed_admin_user, &args.seed_admin_password) {
        (Some(user), Some(password)) => Some(SeedCredentials::new(user.clone(), password.clone())),
        _ => None,
    };

    InitPlan { steps, seed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use clap::Parser;
    use launchpad_models::{EnvValue, ResourceMode};

    fn deploy_args(argv: &[&str]) -> DeployArgs {
        let mut full = vec!["launchpad", "deploy"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Command::Deploy(args) => args,
            _ => unreachable!(),
        }
    }

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "LAUNCHPAD_GCP_PROJECT" => Some("acme-prod".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn password() -> SecretString {
        SecretString::from("generated-for-test".to_string())
    }

    #[test]
    fn test_local_defaults() {
        let blueprint = resolve(&deploy_args(&["local"]), &config(), Some(&password())).unwrap();
        let plan = &blueprint.plan;

        assert_eq!(plan.target, DeployTarget::local());
        assert_eq!(plan.image.repository, "backend");
        assert_eq!(plan.image.tag, "latest");
        assert!(plan.resources.iter().all(|r| r.mode == ResourceMode::Managed));
        let names: Vec<_> = plan.topology.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["backend", "postgres", "redis"]);
        assert_eq!(plan.topology.service("postgres").unwrap().volumes[0].volume, "resume-ai-pgdata");
        assert_eq!(plan.policy, HealthCheckPolicy::default());
        assert_eq!(blueprint.settings.cluster, "resume-ai");
    }

    #[test]
    fn test_local_requires_password() {
        assert!(resolve(&deploy_args(&["local"]), &config(), None).is_err());
    }

    #[test]
    fn test_no_seed_without_flags() {
        let blueprint = resolve(&deploy_args(&["local"]), &config(), Some(&password())).unwrap();
        assert!(blueprint.plan.init.seed.is_none());
        assert_eq!(blueprint.plan.init.steps.len(), 1);
    }

    #[test]
    fn test_seed_and_sample_data_are_opt_in() {
        let args = deploy_args(&[
            "local",
            "--seed-admin-user",
            "ops-admin",
            "--seed-admin-password",
            "a-long-operator-password",
            "--sample-data",
        ]);
        let blueprint = resolve(&args, &config(), Some(&password())).unwrap();
        assert_eq!(blueprint.plan.init.seed.as_ref().unwrap().username, "ops-admin");
        assert_eq!(blueprint.plan.init.steps.len(), 2);
    }

    #[test]
    fn test_skip_init() {
        let blueprint = resolve(&deploy_args(&["local", "--skip-init"]), &config(), Some(&password())).unwrap();
        assert!(blueprint.plan.init.is_empty());
    }

    #[test]
    fn test_aws_repository_is_the_registry() {
        let blueprint = resolve(&deploy_args(&["aws", "prod", "eu-west-1"]), &config(), None).unwrap();
        let plan = &blueprint.plan;

        assert_eq!(plan.target.region, "eu-west-1");
        assert_eq!(plan.image.repository, "resume-ai-backend");
        assert_eq!(plan.resources[0].name, "resume-ai-backend");
        assert_eq!(blueprint.settings.cluster, "prod");
    }

    #[test]
    fn test_cloud_uses_secret_refs_and_manual_steps() {
        let blueprint = resolve(
            &deploy_args(&["gcp", "resume-ai", "us-central1", "resume-ai", "resume.example.com"]),
            &config(),
            None,
        )
        .unwrap();
        let plan = &blueprint.plan;

        assert_eq!(
            plan.target.credentials,
            CredentialContext::Gcp {
                project: "acme-prod".to_string()
            }
        );
        let backend = plan.topology.service("backend").unwrap();
        assert_eq!(backend.replicas, 2);
        assert!(matches!(&backend.env[0].value, EnvValue::SecretRef { secret, key } if secret == "resume-ai-db" && key == "url"));

        let manual: Vec<_> = plan.resources.iter().filter(|r| r.is_manual()).map(|r| r.kind).collect();
        assert_eq!(
            manual,
            vec![
                ResourceKind::Database,
                ResourceKind::Cache,
                ResourceKind::Dns,
                ResourceKind::Certificate
            ]
        );
    }

    #[test]
    fn test_azure_defaults() {
        let blueprint = resolve(&deploy_args(&["azure"]), &config(), None).unwrap();
        assert_eq!(blueprint.settings.registry_name.as_deref(), Some("resumeai"));
        assert_eq!(blueprint.plan.resources[2].name, "resume-ai-kv");
        assert!(matches!(
            &blueprint.plan.target.credentials,
            CredentialContext::Azure { resource_group, .. } if resource_group == "resume-ai-rg"
        ));
    }

    #[test]
    fn test_timeout_shorter_than_interval_is_rejected() {
        let args = deploy_args(&["local", "--health-interval", "30s", "--health-timeout", "10s"]);
        assert!(resolve(&args, &config(), Some(&password())).is_err());
    }
}
