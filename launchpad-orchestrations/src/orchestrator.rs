//! Deployment orchestration
//!
//! Runs the stages strictly in order: provision, publish, deploy, health
//! gate, initialize. The first failing stage ends the run; its error and any
//! collected log tails are recorded on the returned [`DeploymentResult`].
//!
//! Cancellation is observed between stages. A stage that has started runs to
//! completion; only the health gate's polling wait is interruptible.

use crate::backend::Backend;
use crate::error::{HealthTimeout, IntoStageFailure};
use crate::health::{HealthGate, HealthOutcome, Probe};
use crate::initialize::{run_plan, InitPlan};
use crate::provision::ensure;
use crate::publish::PublishRequest;
use chrono::Utc;
use launchpad_models::{
    DeployTarget, DeploymentResult, DeploymentStatus, HealthCheckPolicy, ImageArtifact, LogTail,
    RegistryHandle, ResourceKind, ResourceOutcome, ResourceSpec, ServiceTopology, Stage,
    StageFailure, TargetKind,
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything one run needs, resolved up front
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub target: DeployTarget,
    pub resources: Vec<ResourceSpec>,
    pub image: PublishRequest,
    pub topology: ServiceTopology,
    pub policy: HealthCheckPolicy,
    pub init: InitPlan,
    /// Lines per service collected when the health gate times out
    pub log_tail_lines: usize,
    /// Replaces the endpoint reported by the deployer
    pub endpoint_override: Option<String>,
}

pub struct Orchestrator {
    backend: Backend,
    probe: Arc<dyn Probe>,
    cancel: CancellationToken,
}

/// Accumulates what a run produced until it is frozen into a result
struct RunState {
    run_id: Uuid,
    target: TargetKind,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
    resources: Vec<ResourceOutcome>,
    artifact: Option<ImageArtifact>,
    endpoint: Option<String>,
    warnings: Vec<String>,
    log_tails: Vec<LogTail>,
}

impl RunState {
    fn new(target: TargetKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            started_at: Utc::now(),
            started: Instant::now(),
            resources: Vec::new(),
            artifact: None,
            endpoint: None,
            warnings: Vec::new(),
            log_tails: Vec::new(),
        }
    }

    fn finish(self, status: DeploymentStatus, failure: Option<StageFailure>) -> DeploymentResult {
        let elapsed = self.started.elapsed();
        DeploymentResult {
            run_id: self.run_id,
            target: self.target,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            resources: self.resources,
            artifact: self.artifact,
            endpoint: self.endpoint,
            failure,
            warnings: self.warnings,
            log_tails: self.log_tails,
        }
    }

    fn fail(self, failure: StageFailure) -> DeploymentResult {
        error!(stage = %failure.stage, kind = %failure.kind, "✗ {}", failure.message);
        self.finish(DeploymentStatus::Failed, Some(failure))
    }

    fn cancel(self, stage: Stage) -> DeploymentResult {
        warn!(stage = %stage, "Run cancelled");
        self.finish(
            DeploymentStatus::Cancelled,
            Some(StageFailure {
                stage,
                kind: "cancelled".to_string(),
                message: format!("cancelled during {}", stage),
                retryable: true,
                resource: None,
            }),
        )
    }
}

fn stage_failure(stage: Stage, kind: &str, message: impl Into<String>, retryable: bool) -> StageFailure {
    StageFailure {
        stage,
        kind: kind.to_string(),
        message: message.into(),
        retryable,
        resource: None,
    }
}

impl Orchestrator {
    pub fn new(backend: Backend, probe: Arc<dyn Probe>, cancel: CancellationToken) -> Self {
        Self { backend, probe, cancel }
    }

    pub async fn run(&self, plan: &DeployPlan) -> DeploymentResult {
        let mut state = RunState::new(plan.target.kind);
        info!(
            "=== Deploying '{}' to {} ({}) ===",
            plan.topology.name, plan.target.kind, plan.target.region
        );

        // Step 1: provision
        info!("Step 1: Provisioning {} resource(s)", plan.resources.len());
        for spec in &plan.resources {
            if spec.is_manual() {
                info!("{} '{}' is manual, recording follow-up", spec.kind, spec.name);
                state.resources.push(ResourceOutcome::Manual(spec.clone()));
                continue;
            }
            if self.cancel.is_cancelled() {
                return state.cancel(Stage::Provision);
            }
            match ensure(self.backend.provisioner.as_ref(), spec).await {
                Ok(handle) => state.resources.push(ResourceOutcome::Ready(handle)),
                Err(e) => return state.fail(e.into_stage_failure()),
            }
        }

        // Step 2: publish
        let Some(registry) = self.select_registry(&state.resources) else {
            return state.fail(stage_failure(
                Stage::Publish,
                "configuration",
                format!("no registry resource declared for target {}", plan.target.kind),
                false,
            ));
        };
        if self.cancel.is_cancelled() {
            return state.cancel(Stage::Publish);
        }
        info!("Step 2: Publishing image to {}", registry.uri);
        let artifact = match self.backend.publisher.publish(&plan.image, &registry).await {
            Ok(artifact) => artifact,
            Err(e) => return state.fail(e.into_stage_failure()),
        };
        state.artifact = Some(artifact.clone());

        // Step 3: deploy
        if self.cancel.is_cancelled() {
            return state.cancel(Stage::Deploy);
        }
        info!("Step 3: Applying topology '{}' ({} services)", plan.topology.name, plan.topology.services.len());
        let handle = match self.backend.deployer.apply(&plan.topology, &artifact).await {
            Ok(handle) => handle,
            Err(e) => return state.fail(e.into_stage_failure()),
        };
        state.endpoint = plan.endpoint_override.clone().or_else(|| handle.endpoint.clone());

        // Step 4: health gate
        let Some(url) = plan.policy.url(state.endpoint.as_deref()) else {
            return state.fail(stage_failure(
                Stage::HealthGate,
                "no_endpoint",
                "deployment reported no endpoint to probe; pass one explicitly",
                false,
            ));
        };
        info!(
            "Step 4: Waiting for {} (every {}s, up to {}s)",
            url,
            plan.policy.interval.as_secs(),
            plan.policy.timeout.as_secs()
        );
        let gate = HealthGate::new(self.probe.clone(), self.cancel.clone());
        match gate.await_ready(&plan.policy, &url).await {
            HealthOutcome::Ready { .. } => {}
            HealthOutcome::Cancelled => return state.cancel(Stage::HealthGate),
            HealthOutcome::TimedOut {
                attempts,
                elapsed,
                last_observation,
            } => {
                info!("Collecting the last {} log lines per service", plan.log_tail_lines);
                state.log_tails = self.backend.deployer.recent_logs(&handle, plan.log_tail_lines).await;
                let timeout = HealthTimeout {
                    attempts,
                    elapsed_secs: elapsed.as_secs(),
                    last_observation,
                };
                return state.fail(timeout.into_stage_failure());
            }
        }

        // Step 5: initialize
        if plan.init.is_empty() {
            info!("Step 5: No initialization steps");
        } else {
            if self.cancel.is_cancelled() {
                return state.cancel(Stage::Initialize);
            }
            info!("Step 5: Running {} initialization step(s)", plan.init.steps.len());
            match run_plan(self.backend.deployer.as_ref(), &handle, &plan.init).await {
                Ok(_) => {}
                // the deployment is healthy; a failed init does not undo that
                Err(e) => {
                    warn!("Initialization failed: {}", e);
                    state.warnings.push(e.to_string());
                }
            }
        }

        info!("=== ✓ Deployment complete ===");
        state.finish(DeploymentStatus::Succeeded, None)
    }

    fn select_registry(&self, resources: &[ResourceOutcome]) -> Option<RegistryHandle> {
        let declared = resources.iter().find_map(|r| match r {
            ResourceOutcome::Ready(handle) if handle.kind == ResourceKind::Registry => handle.as_registry(),
            _ => None,
        });
        declared.or_else(|| (self.backend.target.kind == TargetKind::Local).then(RegistryHandle::local))
    }
}
