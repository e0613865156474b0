//! Local target: docker compose

use super::{entry_service, render_error, run_apply, run_init_command, tail_lines, DeployHandle, TopologyDeployer};
use crate::error::{ApplyError, InitError};
use crate::initialize::{InitEnv, InitStep};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{EnvValue, ImageArtifact, LogTail, ServiceTopology};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tera::{Context as TeraContext, Tera};
use tracing::{info, warn};

const COMPOSE_FILE: &str = "docker-compose.launchpad.yml";

#[derive(Serialize)]
struct ComposeService {
    name: String,
    image: String,
    command: Option<Vec<String>>,
    replicas: u32,
    ports: Vec<ComposePort>,
    env: Vec<ComposeEnv>,
    volumes: Vec<ComposeMount>,
}

#[derive(Serialize)]
struct ComposePort {
    container_port: u16,
    published: u16,
}

#[derive(Serialize)]
struct ComposeEnv {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct ComposeMount {
    volume: String,
    path: String,
}

/// Renders the compose file for a topology.
///
/// Secret references become `${NAME}` interpolations so compose resolves them
/// from the invoking environment or `.env`. Literal values and commands are
/// escaped so compose passes them through verbatim.
pub fn render_compose(
    topology: &ServiceTopology,
    artifact: &ImageArtifact,
    network: Option<&str>,
) -> Result<String, ApplyError> {
    let mut tera = Tera::default();
    tera.add_raw_template("compose", include_str!("templates/compose.yaml"))
        .map_err(|e| render_error("compose template", e))?;

    let services: Vec<ComposeService> = topology
        .services
        .iter()
        .map(|service| ComposeService {
            name: service.name.clone(),
            image: service.resolved_image(artifact).to_string(),
            command: service
                .command
                .as_ref()
                .map(|args| args.iter().map(|a| escape_interpolation(a)).collect()),
            replicas: service.replicas,
            ports: service
                .ports
                .iter()
                .map(|p| ComposePort {
                    container_port: p.container_port,
                    published: p.published(),
                })
                .collect(),
            env: service
                .env
                .iter()
                .map(|binding| ComposeEnv {
                    name: binding.name.clone(),
                    value: match &binding.value {
                        EnvValue::Literal { value } => escape_interpolation(value),
                        EnvValue::SecretRef { .. } => format!("${{{}}}", binding.name),
                    },
                })
                .collect(),
            volumes: service
                .volumes
                .iter()
                .map(|m| ComposeMount {
                    volume: m.volume.clone(),
                    path: m.path.clone(),
                })
                .collect(),
        })
        .collect();

    let volumes: BTreeSet<&str> = topology
        .services
        .iter()
        .flat_map(|s| s.volumes.iter().map(|m| m.volume.as_str()))
        .collect();

    let mut ctx = TeraContext::new();
    ctx.insert("project", &topology.name);
    ctx.insert("services", &services);
    ctx.insert("volumes", &volumes);
    ctx.insert("network", &network);

    tera.render("compose", &ctx)
        .map_err(|e| render_error("compose file", e))
}

/// Compose expands `$NAME` and `${NAME}` everywhere; `$$` is a literal `$`
fn escape_interpolation(value: &str) -> String {
    value.replace('$', "$$")
}

pub struct ComposeDeployer {
    runner: Arc<dyn CommandRunner>,
    work_dir: PathBuf,
    /// Pre-created docker network the stack joins
    network: Option<String>,
}

impl ComposeDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, work_dir: impl Into<PathBuf>, network: Option<String>) -> Self {
        Self {
            runner,
            work_dir: work_dir.into(),
            network,
        }
    }

    pub fn compose_file(&self) -> PathBuf {
        self.work_dir.join(COMPOSE_FILE)
    }

    fn compose(&self, project: &str) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["compose", "-p", project, "-f"])
            .arg(self.compose_file().display().to_string())
    }
}

#[async_trait]
impl TopologyDeployer for ComposeDeployer {
    async fn apply(
        &self,
        topology: &ServiceTopology,
        artifact: &ImageArtifact,
    ) -> Result<DeployHandle, ApplyError> {
        let rendered = render_compose(topology, artifact, self.network.as_deref())?;
        let path = self.compose_file();
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ApplyError::new(format!("failed to create {}: {}", self.work_dir.display(), e)))?;
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| ApplyError::new(format!("failed to write {}: {}", path.display(), e)))?;
        info!("Compose file written to {}", path.display());

        // compose leaves containers whose configuration did not change alone
        let up = self.compose(&topology.name).args(["up", "-d", "--remove-orphans"]);
        run_apply(self.runner.as_ref(), up).await?;
        info!("✓ Compose stack '{}' is up", topology.name);

        let endpoint = entry_service(topology)
            .and_then(|s| s.ports.first())
            .map(|p| format!("http://localhost:{}", p.published()));

        Ok(DeployHandle {
            topology: topology.name.clone(),
            services: topology.services.iter().map(|s| s.name.clone()).collect(),
            endpoint,
            revision: artifact.digest.clone(),
        })
    }

    async fn recent_logs(&self, handle: &DeployHandle, lines: usize) -> Vec<LogTail> {
        let mut tails = Vec::new();
        for service in &handle.services {
            let command = self
                .compose(&handle.topology)
                .args(["logs", "--no-color", "--tail"])
                .arg(lines.to_string())
                .arg(service.clone());
            match self.runner.run(&command).await {
                Ok(output) if output.is_success() => tails.push(LogTail {
                    service: service.clone(),
                    lines: tail_lines(&output.stdout, lines),
                }),
                Ok(output) => warn!(service = %service, "Could not read logs: {}", output.failure_detail()),
                Err(e) => warn!(service = %service, "Could not read logs: {}", e),
            }
        }
        tails
    }

    async fn run_init(
        &self,
        handle: &DeployHandle,
        step: &InitStep,
        env: &InitEnv,
    ) -> Result<(), InitError> {
        let mut command = self.compose(&handle.topology).args(["exec", "-T"]);
        // values travel through the process environment, only names on the command line
        for (name, value) in env {
            command = command.args(["-e", name.as_str()]).env(name.clone(), value.expose_secret());
        }
        let command = command.arg(step.service.clone()).args(step.command.iter().cloned());
        run_init_command(self.runner.as_ref(), step, command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::fixtures;
    use crate::process::CommandOutput;
    use crate::testing::ScriptedRunner;
    use launchpad_models::EnvBinding;
    use secrecy::SecretString;

    #[test]
    fn test_render_compose_is_valid_yaml() {
        let rendered = render_compose(&fixtures::topology(), &fixtures::artifact(), Some("resume-ai")).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(doc["name"].as_str(), Some("resume-ai"));
        let backend = &doc["services"]["backend"];
        assert_eq!(backend["image"].as_str(), Some("resumeai.azurecr.io/backend:latest"));
        assert_eq!(backend["ports"][0].as_str(), Some("8000:8000"));
        assert_eq!(backend["deploy"]["replicas"].as_u64(), Some(2));
        assert_eq!(backend["environment"]["LOG_LEVEL"].as_str(), Some("info"));
        assert_eq!(backend["environment"]["DATABASE_URL"].as_str(), Some("${DATABASE_URL}"));

        let postgres = &doc["services"]["postgres"];
        assert_eq!(postgres["image"].as_str(), Some("postgres:15-alpine"));
        assert!(postgres.get("deploy").is_none());
        assert_eq!(postgres["volumes"][0].as_str(), Some("resume-ai-pgdata:/var/lib/postgresql/data"));
        assert_eq!(doc["volumes"]["resume-ai-pgdata"]["external"].as_bool(), Some(true));
        assert_eq!(doc["networks"]["default"]["name"].as_str(), Some("resume-ai"));
    }

    #[test]
    fn test_literal_dollars_are_not_interpolated() {
        let mut topology = fixtures::topology();
        topology.services[0]
            .env
            .push(EnvBinding::literal("DATABASE_PASSWORD", "pa$word${HOME}"));
        topology.services[0].command = Some(vec!["sh".to_string(), "-c".to_string(), "echo $PORT".to_string()]);

        let rendered = render_compose(&topology, &fixtures::artifact(), None).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let backend = &doc["services"]["backend"];

        assert_eq!(backend["environment"]["DATABASE_PASSWORD"].as_str(), Some("pa$$word$${HOME}"));
        assert_eq!(backend["environment"]["DATABASE_URL"].as_str(), Some("${DATABASE_URL}"));
        assert_eq!(backend["command"][2].as_str(), Some("echo $$PORT"));
    }

    #[tokio::test]
    async fn test_apply_writes_file_and_runs_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let deployer = ComposeDeployer::new(runner.clone(), dir.path(), None);

        let handle = deployer.apply(&fixtures::topology(), &fixtures::artifact()).await.unwrap();

        assert!(deployer.compose_file().exists());
        assert_eq!(handle.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(handle.services, vec!["backend", "postgres"]);
        assert_eq!(runner.count("up -d --remove-orphans"), 1);
    }

    #[tokio::test]
    async fn test_apply_rejection_keeps_reason() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on(
            "compose",
            CommandOutput::failure(1, "Bind for 0.0.0.0:8000 failed: port is already allocated"),
        ));
        let deployer = ComposeDeployer::new(runner, dir.path(), None);

        let err = deployer.apply(&fixtures::topology(), &fixtures::artifact()).await.unwrap_err();
        assert!(err.reason.contains("port is already allocated"));
    }

    #[tokio::test]
    async fn test_init_passes_secrets_through_environment() {
        let runner = Arc::new(ScriptedRunner::new());
        let deployer = ComposeDeployer::new(runner.clone(), "/tmp/launchpad", None);
        let handle = DeployHandle {
            topology: "resume-ai".to_string(),
            services: vec!["backend".to_string()],
            endpoint: None,
            revision: None,
        };
        let env = vec![("SEED_ADMIN_PASSWORD".to_string(), SecretString::from("pw-123".to_string()))];

        deployer
            .run_init(&handle, &InitStep::new("backend", ["python", "setup.py"]), &env)
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert!(call.command_line().ends_with("exec -T -e SEED_ADMIN_PASSWORD backend python setup.py"));
        assert!(!call.command_line().contains("pw-123"));
        assert_eq!(call.env, vec![("SEED_ADMIN_PASSWORD".to_string(), "pw-123".to_string())]);
    }
}
