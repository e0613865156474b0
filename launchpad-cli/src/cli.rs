use clap::{Parser, Subcommand, ValueEnum};
use launchpad_models::TargetKind;
use std::path::PathBuf;
use std::time::Duration;

/// Launchpad - deploy the resume matching stack to local docker, AWS, GCP or Azure
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision, publish, deploy and verify the application
    Deploy(DeployArgs),

    /// Print the resolved deployment plan without running anything
    Plan(DeployArgs),

    /// Run a staged load profile against a deployed instance
    Loadtest(LoadtestArgs),

    /// Print the effective configuration (secrets hidden)
    Config,
}

impl Command {
    pub fn json_output(&self) -> bool {
        match self {
            Command::Deploy(args) | Command::Plan(args) => args.output == OutputFormat::Json,
            Command::Loadtest(args) => args.output == OutputFormat::Json,
            Command::Config => false,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct DeployArgs {
    /// Target platform: local, aws, gcp or azure
    #[arg(env = "LAUNCHPAD_TARGET", default_value = "local")]
    pub target: TargetKind,

    /// Cluster name (ECS/GKE/AKS), or the docker network for local
    #[arg(env = "LAUNCHPAD_CLUSTER")]
    pub cluster: Option<String>,

    /// Region or location
    #[arg(env = "LAUNCHPAD_REGION")]
    pub region: Option<String>,

    /// Registry name (ECR repository, Artifact Registry repository or ACR)
    #[arg(env = "LAUNCHPAD_REGISTRY")]
    pub registry: Option<String>,

    /// Public domain; adds DNS and certificate follow-up steps
    #[arg(env = "LAUNCHPAD_DOMAIN")]
    pub domain: Option<String>,

    /// Image tag to publish
    #[arg(long, env = "LAUNCHPAD_IMAGE_TAG", default_value = "latest")]
    pub tag: String,

    /// Docker build context
    #[arg(long, default_value = ".")]
    pub context: PathBuf,

    /// Dockerfile (default: <context>/Dockerfile)
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Pause between health probes (e.g. 10s)
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub health_interval: Duration,

    /// Give up on the health check after this long (e.g. 5m)
    #[arg(long, default_value = "300s", value_parser = parse_duration)]
    pub health_timeout: Duration,

    /// Health endpoint path, or an absolute URL
    #[arg(long, default_value = "/health")]
    pub health_path: String,

    /// Base URL to probe instead of the one the platform reports
    #[arg(long, env = "LAUNCHPAD_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Admin user to seed during initialization (requires --seed-admin-password)
    #[arg(long, env = "LAUNCHPAD_SEED_ADMIN_USER", requires = "seed_admin_password")]
    pub seed_admin_user: Option<String>,

    /// Admin password to seed during initialization
    #[arg(long, env = "LAUNCHPAD_SEED_ADMIN_PASSWORD", hide_env_values = true, requires = "seed_admin_user")]
    pub seed_admin_password: Option<String>,

    /// Also load the sample resumes and job descriptions
    #[arg(long)]
    pub sample_data: bool,

    /// Skip the post-deploy initialization
    #[arg(long)]
    pub skip_init: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LoadtestArgs {
    /// Base URL of the deployed API (e.g. http://localhost:8000)
    pub base_url: String,

    /// Stages as duration:users pairs
    #[arg(long, default_value = "1m:10,3m:10,1m:20,3m:20,1m:0")]
    pub profile: String,

    /// Pause between requests of one virtual user
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub think_time: Duration,

    /// user:password; repeatable. Falls back to LAUNCHPAD_LOAD_CREDENTIALS
    #[arg(long = "credential")]
    pub credentials: Vec<String>,

    /// Maximum allowed p95 latency of evaluate calls
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub p95_evaluate: Duration,

    /// Maximum allowed fraction of failed checks
    #[arg(long, default_value = "0.1")]
    pub max_error_rate: f64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    launchpad_loadtest::profile::parse_duration(text)
        .ok_or_else(|| format!("invalid duration '{}' (try 500ms, 10s, 5m)", text))
}
