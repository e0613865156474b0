use anyhow::{bail, Context, Result};
use launchpad_models::{DeploymentResult, DeploymentStatus, ResourceOutcome, TargetKind};
use launchpad_orchestrations::{Backend, HttpProbe, Orchestrator, TokioCommandRunner};
use rand::distr::{Alphanumeric, SampleString};
use secrecy::SecretString;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use crate::blueprint::{self, Blueprint};
use crate::cli::{DeployArgs, OutputFormat};
use crate::commands::cancel_on_ctrl_c;
use crate::config::Config;

const PASSWORD_FILE: &str = "postgres-password";

pub async fn run_deploy(args: DeployArgs) -> Result<()> {
    let config = Config::load()?;

    let db_password = match args.target {
        TargetKind::Local => Some(local_db_password(&config).await?),
        _ => None,
    };
    let Blueprint { plan, settings } = blueprint::resolve(&args, &config, db_password.as_ref())?;

    let backend = Backend::for_target(&plan.target, &settings, Arc::new(TokioCommandRunner))
        .context("Failed to set up the deployment backend")?;

    tracing::info!(
        "Deploying {} to {} ({})",
        plan.topology.name,
        plan.target.kind,
        plan.target.region
    );

    let orchestrator = Orchestrator::new(backend, Arc::new(HttpProbe::new()), cancel_on_ctrl_c());
    let result = orchestrator.run(&plan).await;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => print!("{}", render_result(&result)),
    }

    match result.status {
        DeploymentStatus::Succeeded => Ok(()),
        DeploymentStatus::Cancelled => bail!("Deployment cancelled"),
        DeploymentStatus::Failed => match &result.failure {
            Some(failure) => bail!("Deployment failed at stage {}: {}", failure.stage, failure.message),
            None => bail!("Deployment failed"),
        },
    }
}

/// The local postgres password: `LAUNCHPAD_POSTGRES_PASSWORD`, or one
/// generated on first use and kept under the work directory so the data
/// volume stays usable across runs
pub async fn local_db_password(config: &Config) -> Result<SecretString> {
    if let Some(password) = &config.postgres_password {
        return Ok(password.clone());
    }

    let dir = config.work_dir.join(".launchpad");
    let path = dir.join(PASSWORD_FILE);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        let stored = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(SecretString::from(stored.to_string()));
        }
    }

    let password = Alphanumeric.sample_string(&mut rand::rng(), 32);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::write(&path, &password)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    restrict_permissions(&path).await?;

    tracing::info!("Generated a local database password (stored in {})", path.display());
    Ok(SecretString::from(password))
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn render_result(result: &DeploymentResult) -> String {
    let mut out = String::new();
    let _ = write_result(&mut out, result);
    out
}

fn write_result(out: &mut String, result: &DeploymentResult) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "Deployment {} ({})", result.run_id, result.target)?;
    writeln!(out, "{}", "=".repeat(80))?;

    let marker = match result.status {
        DeploymentStatus::Succeeded => "✓ succeeded",
        DeploymentStatus::Failed => "✗ failed",
        DeploymentStatus::Cancelled => "✗ cancelled",
    };
    writeln!(out, "  Status:    {} in {:.1}s", marker, result.elapsed().as_secs_f64())?;
    if let Some(endpoint) = &result.endpoint {
        writeln!(out, "  Endpoint:  {}", endpoint)?;
    }
    if let Some(artifact) = &result.artifact {
        writeln!(out, "  Image:     {}", artifact.remote_uri)?;
        if let Some(digest) = &artifact.digest {
            writeln!(out, "  Digest:    {}", digest)?;
        }
    }

    if !result.resources.is_empty() {
        writeln!(out)?;
        writeln!(out, "Resources:")?;
        for resource in &result.resources {
            match resource {
                ResourceOutcome::Ready(handle) => writeln!(
                    out,
                    "  ✓ {:<12} {:<28} {:<9} {}",
                    handle.kind.to_string(),
                    handle.name,
                    if handle.created { "created" } else { "existing" },
                    handle.uri.as_deref().unwrap_or("-")
                )?,
                ResourceOutcome::Manual(spec) => {
                    writeln!(out, "  • {:<12} {:<28} manual", spec.kind.to_string(), spec.name)?
                }
            }
        }
    }

    for warning in &result.warnings {
        writeln!(out)?;
        writeln!(out, "⚠ {}", warning)?;
    }

    if let Some(failure) = &result.failure {
        writeln!(out)?;
        writeln!(out, "✗ Failed at stage: {}", failure.stage)?;
        writeln!(out, "  Error:     {}", failure.message)?;
        writeln!(out, "  Kind:      {}", failure.kind)?;
        if let Some(resource) = &failure.resource {
            writeln!(out, "  Resource:  {}", resource)?;
        }
        writeln!(
            out,
            "  Retryable: {}",
            if failure.retryable { "yes, re-run the same command" } else { "no, fix the cause first" }
        )?;
    }

    for tail in &result.log_tails {
        writeln!(out)?;
        writeln!(out, "--- logs: {} (last {} lines) ---", tail.service, tail.lines.len())?;
        for line in &tail.lines {
            writeln!(out, "  {}", line)?;
        }
    }

    if result.is_success() {
        let steps = result.manual_steps();
        writeln!(out)?;
        writeln!(out, "{}", "=".repeat(80))?;
        if steps.is_empty() {
            writeln!(out, "No manual follow-up steps.")?;
        } else {
            writeln!(out, "Manual follow-up steps:")?;
            for (i, spec) in steps.iter().enumerate() {
                writeln!(
                    out,
                    "  {}. [{}] {}: {}",
                    i + 1,
                    spec.kind,
                    spec.name,
                    spec.note.as_deref().unwrap_or("set up by hand")
                )?;
            }
        }
        writeln!(out, "{}", "=".repeat(80))?;
    }
    Ok(())
}
