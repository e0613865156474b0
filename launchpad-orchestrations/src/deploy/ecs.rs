//! AWS: one Fargate task definition per topology, one ECS service

use super::{run_apply, run_init_command, tail_lines, DeployHandle, TopologyDeployer};
use crate::error::{ApplyError, InitError};
use crate::initialize::{InitEnv, InitStep};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use launchpad_models::{EnvValue, ImageArtifact, LogTail, ServiceTopology};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EcsSettings {
    pub cluster: String,
    pub region: String,
    pub profile: Option<String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub execution_role_arn: Option<String>,
    pub cpu: String,
    pub memory: String,
    /// Load balancer URL in front of the service; ECS itself has no endpoint
    pub public_url: Option<String>,
}

impl EcsSettings {
    pub fn new(cluster: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            region: region.into(),
            profile: None,
            subnets: Vec::new(),
            security_groups: Vec::new(),
            execution_role_arn: None,
            cpu: "512".to_string(),
            memory: "1024".to_string(),
            public_url: None,
        }
    }

    fn network_configuration(&self) -> String {
        format!(
            "awsvpcConfiguration={{subnets=[{}],securityGroups=[{}],assignPublicIp=ENABLED}}",
            self.subnets.join(","),
            self.security_groups.join(",")
        )
    }
}

pub fn log_group(family: &str) -> String {
    format!("/ecs/{}", family)
}

/// Secrets Manager JSON keys need the full ARN; plain names reference the whole secret
fn secret_value_from(secret: &str, key: &str) -> String {
    if secret.starts_with("arn:") {
        format!("{}:{}::", secret, key)
    } else {
        secret.to_string()
    }
}

/// Task definition input for `aws ecs register-task-definition --cli-input-json`
pub fn render_task_definition(
    topology: &ServiceTopology,
    artifact: &ImageArtifact,
    settings: &EcsSettings,
) -> Value {
    let containers: Vec<Value> = topology
        .services
        .iter()
        .map(|service| {
            let mut environment = Vec::new();
            let mut secrets = Vec::new();
            for binding in &service.env {
                match &binding.value {
                    EnvValue::Literal { value } => {
                        environment.push(json!({ "name": binding.name, "value": value }))
                    }
                    EnvValue::SecretRef { secret, key } => secrets.push(json!({
                        "name": binding.name,
                        "valueFrom": secret_value_from(secret, key),
                    })),
                }
            }

            let mut container = json!({
                "name": service.name,
                "image": service.resolved_image(artifact),
                "essential": service.uses_artifact(),
                "portMappings": service.ports.iter().map(|p| json!({
                    "containerPort": p.container_port,
                    "protocol": "tcp",
                })).collect::<Vec<_>>(),
                "environment": environment,
                "secrets": secrets,
                "logConfiguration": {
                    "logDriver": "awslogs",
                    "options": {
                        "awslogs-group": log_group(&topology.name),
                        "awslogs-region": settings.region,
                        "awslogs-stream-prefix": "ecs",
                        "awslogs-create-group": "true",
                    }
                },
            });
            if let Some(command) = &service.command {
                container["command"] = json!(command);
            }
            container
        })
        .collect();

    let mut definition = json!({
        "family": topology.name,
        "networkMode": "awsvpc",
        "requiresCompatibilities": ["FARGATE"],
        "cpu": settings.cpu,
        "memory": settings.memory,
        "containerDefinitions": containers,
    });
    if let Some(role) = &settings.execution_role_arn {
        definition["executionRoleArn"] = json!(role);
    }
    definition
}

pub struct EcsDeployer {
    runner: Arc<dyn CommandRunner>,
    settings: EcsSettings,
}

impl EcsDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: EcsSettings) -> Self {
        Self { runner, settings }
    }

    fn aws<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = CommandSpec::new("aws")
            .args(args)
            .args(["--region", self.settings.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.settings.profile {
            command = command.args(["--profile", profile.as_str()]);
        }
        command
    }

    async fn aws_json<T>(&self, command: CommandSpec, on_error: impl Fn(String) -> T) -> Result<Value, T> {
        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| on_error(format!("failed to run aws: {}", e)))?;
        if !output.is_success() {
            return Err(on_error(output.failure_detail()));
        }
        serde_json::from_str(&output.stdout).map_err(|e| on_error(format!("unexpected aws output: {}", e)))
    }

    async fn service_is_active(&self, name: &str) -> Result<bool, ApplyError> {
        let command = self.aws([
            "ecs",
            "describe-services",
            "--cluster",
            self.settings.cluster.as_str(),
            "--services",
            name,
        ]);
        let json = self.aws_json(command, ApplyError::new).await?;
        Ok(json["services"]
            .as_array()
            .map(|services| services.iter().any(|s| s["status"].as_str() == Some("ACTIVE")))
            .unwrap_or(false))
    }
}

#[async_trait]
impl TopologyDeployer for EcsDeployer {
    async fn apply(
        &self,
        topology: &ServiceTopology,
        artifact: &ImageArtifact,
    ) -> Result<DeployHandle, ApplyError> {
        for service in topology.services.iter().filter(|s| !s.volumes.is_empty()) {
            warn!(service = %service.name, "Volume mounts are ignored on ECS targets");
        }
        let definition = render_task_definition(topology, artifact, &self.settings);
        let register = self.aws(["ecs", "register-task-definition", "--cli-input-json"]).arg(definition.to_string());
        let registered = self.aws_json(register, ApplyError::new).await?;
        let task_definition = registered["taskDefinition"]["taskDefinitionArn"]
            .as_str()
            .ok_or_else(|| ApplyError::new("register-task-definition returned no ARN"))?
            .to_string();
        info!("✓ Task definition {}", task_definition);

        let desired = topology.services.iter().map(|s| s.replicas).max().unwrap_or(1).to_string();
        let cluster = self.settings.cluster.as_str();
        let name = topology.name.as_str();

        let command = if self.service_is_active(name).await? {
            info!("Updating ECS service {} (rolling)", name);
            self.aws([
                "ecs",
                "update-service",
                "--cluster",
                cluster,
                "--service",
                name,
                "--task-definition",
                task_definition.as_str(),
                "--desired-count",
                desired.as_str(),
            ])
        } else {
            info!("Creating ECS service {}", name);
            self.aws([
                "ecs",
                "create-service",
                "--cluster",
                cluster,
                "--service-name",
                name,
                "--task-definition",
                task_definition.as_str(),
                "--desired-count",
                desired.as_str(),
                "--launch-type",
                "FARGATE",
                "--network-configuration",
            ])
            .arg(self.settings.network_configuration())
        };
        run_apply(self.runner.as_ref(), command).await?;
        info!("✓ ECS service {}", name);

        Ok(DeployHandle {
            topology: topology.name.clone(),
            services: topology.services.iter().map(|s| s.name.clone()).collect(),
            endpoint: self.settings.public_url.clone(),
            revision: Some(task_definition),
        })
    }

    async fn recent_logs(&self, handle: &DeployHandle, lines: usize) -> Vec<LogTail> {
        let group = log_group(&handle.topology);
        let mut tails = Vec::new();
        for service in &handle.services {
            let command = CommandSpec::new("aws")
                .args(["logs", "tail", group.as_str(), "--since", "30m", "--format", "short"])
                .arg("--log-stream-name-prefix")
                .arg(format!("ecs/{}", service))
                .args(["--region", self.settings.region.as_str()]);
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

    /// Runs the step as a one-off task and waits for it to stop
    async fn run_init(
        &self,
        handle: &DeployHandle,
        step: &InitStep,
        env: &InitEnv,
    ) -> Result<(), InitError> {
        let init_error = |detail: String| InitError {
            step: step.describe(),
            detail,
        };
        let task_definition = handle
            .revision
            .as_deref()
            .ok_or_else(|| init_error("no task definition to run".to_string()))?;

        let overrides = json!({
            "containerOverrides": [{
                "name": step.service,
                "command": step.command,
                "environment": env.iter().map(|(name, value)| json!({
                    "name": name,
                    "value": value.expose_secret(),
                })).collect::<Vec<_>>(),
            }]
        });
        // the AWS CLI reads the parameter from stdin, keeping env values off the command line
        let run = self
            .aws([
                "ecs",
                "run-task",
                "--cluster",
                self.settings.cluster.as_str(),
                "--task-definition",
                task_definition,
                "--launch-type",
                "FARGATE",
                "--network-configuration",
            ])
            .arg(self.settings.network_configuration())
            .args(["--overrides", "file:///dev/stdin"])
            .stdin(overrides.to_string());
        let started = self.aws_json(run, init_error).await?;
        let task_arn = started["tasks"][0]["taskArn"]
            .as_str()
            .ok_or_else(|| init_error("run-task started no task".to_string()))?
            .to_string();
        info!("Init task {} started", task_arn);

        let wait = self.aws([
            "ecs",
            "wait",
            "tasks-stopped",
            "--cluster",
            self.settings.cluster.as_str(),
            "--tasks",
            task_arn.as_str(),
        ]);
        run_init_command(self.runner.as_ref(), step, wait).await?;

        let describe = self.aws([
            "ecs",
            "describe-tasks",
            "--cluster",
            self.settings.cluster.as_str(),
            "--tasks",
            task_arn.as_str(),
        ]);
        let described = self.aws_json(describe, init_error).await?;
        let exit_code = described["tasks"][0]["containers"]
            .as_array()
            .and_then(|containers| containers.iter().find(|c| c["name"].as_str() == Some(step.service.as_str())))
            .and_then(|c| c["exitCode"].as_i64());

        match exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(init_error(format!("task exited with status {}", code))),
            None => Err(init_error(format!(
                "task stopped without an exit code: {}",
                described["tasks"][0]["stoppedReason"].as_str().unwrap_or("unknown reason")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::fixtures;
    use crate::process::CommandOutput;
    use crate::testing::ScriptedRunner;
    use secrecy::SecretString;

    fn settings() -> EcsSettings {
        EcsSettings {
            subnets: vec!["subnet-1".into(), "subnet-2".into()],
            security_groups: vec!["sg-1".into()],
            public_url: Some("http://resume-ai-alb.example.com".into()),
            ..EcsSettings::new("resume-ai", "us-east-1")
        }
    }

    #[test]
    fn test_task_definition_secrets_and_logs() {
        let mut topology = fixtures::topology();
        topology.services[0].env.push(launchpad_models::EnvBinding::secret(
            "JWT_SECRET",
            "arn:aws:secretsmanager:us-east-1:1:secret:resume-ai-jwt",
            "value",
        ));
        let definition = render_task_definition(&topology, &fixtures::artifact(), &settings());

        assert_eq!(definition["family"], "resume-ai");
        assert_eq!(definition["requiresCompatibilities"][0], "FARGATE");
        let backend = &definition["containerDefinitions"][0];
        assert_eq!(backend["image"], "resumeai.azurecr.io/backend:latest");
        assert_eq!(backend["essential"], true);
        assert_eq!(backend["environment"][0]["name"], "LOG_LEVEL");
        assert_eq!(backend["secrets"][0]["valueFrom"], "resume-ai-db");
        assert_eq!(
            backend["secrets"][1]["valueFrom"],
            "arn:aws:secretsmanager:us-east-1:1:secret:resume-ai-jwt:value::"
        );
        assert_eq!(backend["logConfiguration"]["options"]["awslogs-group"], "/ecs/resume-ai");
        assert_eq!(definition["containerDefinitions"][1]["essential"], false);
    }

    #[tokio::test]
    async fn test_existing_service_is_updated_not_recreated() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "register-task-definition",
                    CommandOutput::success(r#"{"taskDefinition":{"taskDefinitionArn":"arn:aws:ecs:us-east-1:1:task-definition/resume-ai:7"}}"#),
                )
                .on("describe-services", CommandOutput::success(r#"{"services":[{"status":"ACTIVE"}]}"#)),
        );
        let deployer = EcsDeployer::new(runner.clone(), settings());

        let handle = deployer.apply(&fixtures::topology(), &fixtures::artifact()).await.unwrap();

        assert_eq!(runner.count("update-service"), 1);
        assert_eq!(runner.count("create-service"), 0);
        assert_eq!(runner.count("--desired-count 2"), 1);
        assert_eq!(handle.revision.as_deref(), Some("arn:aws:ecs:us-east-1:1:task-definition/resume-ai:7"));
        assert_eq!(handle.endpoint.as_deref(), Some("http://resume-ai-alb.example.com"));
    }

    #[tokio::test]
    async fn test_new_service_gets_network_configuration() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "register-task-definition",
                    CommandOutput::success(r#"{"taskDefinition":{"taskDefinitionArn":"arn:td:1"}}"#),
                )
                .on("describe-services", CommandOutput::success(r#"{"services":[],"failures":[{"reason":"MISSING"}]}"#)),
        );
        let deployer = EcsDeployer::new(runner.clone(), settings());

        deployer.apply(&fixtures::topology(), &fixtures::artifact()).await.unwrap();

        assert_eq!(runner.count(
            "awsvpcConfiguration={subnets=[subnet-1,subnet-2],securityGroups=[sg-1],assignPublicIp=ENABLED}"
        ), 1);
    }

    #[tokio::test]
    async fn test_init_task_nonzero_exit_fails() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("run-task", CommandOutput::success(r#"{"tasks":[{"taskArn":"arn:task:1"}]}"#))
                .on(
                    "describe-tasks",
                    CommandOutput::success(r#"{"tasks":[{"containers":[{"name":"backend","exitCode":1}]}]}"#),
                ),
        );
        let deployer = EcsDeployer::new(runner.clone(), settings());
        let handle = DeployHandle {
            topology: "resume-ai".into(),
            services: vec!["backend".into()],
            endpoint: None,
            revision: Some("arn:td:1".into()),
        };

        let err = deployer
            .run_init(&handle, &InitStep::new("backend", ["python", "scripts/setup_database.py"]), &Vec::new())
            .await
            .unwrap_err();

        assert!(err.detail.contains("status 1"));
        assert_eq!(runner.count("wait tasks-stopped"), 1);
    }

    #[tokio::test]
    async fn test_init_overrides_travel_on_stdin() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("run-task", CommandOutput::success(r#"{"tasks":[{"taskArn":"arn:task:1"}]}"#))
                .on(
                    "describe-tasks",
                    CommandOutput::success(r#"{"tasks":[{"containers":[{"name":"backend","exitCode":0}]}]}"#),
                ),
        );
        let deployer = EcsDeployer::new(runner.clone(), settings());
        let handle = DeployHandle {
            topology: "resume-ai".into(),
            services: vec!["backend".into()],
            endpoint: None,
            revision: Some("arn:td:1".into()),
        };
        let env = vec![("SEED_ADMIN_PASSWORD".to_string(), SecretString::from("pw-123".to_string()))];

        deployer
            .run_init(&handle, &InitStep::new("backend", ["python", "scripts/setup_database.py"]), &env)
            .await
            .unwrap();

        let run = runner
            .calls()
            .into_iter()
            .find(|c| c.command_line().contains("run-task"))
            .unwrap();
        assert!(run.command_line().contains("--overrides file:///dev/stdin"));
        assert!(!run.command_line().contains("pw-123"));
        let overrides: Value = serde_json::from_str(run.stdin.as_deref().unwrap()).unwrap();
        let container = &overrides["containerOverrides"][0];
        assert_eq!(container["name"], "backend");
        assert_eq!(container["environment"][0]["value"], "pw-123");
    }
}
