use anyhow::Result;
use launchpad_models::{EnvValue, ImageArtifact, ResourceMode, ServiceSpec};
use launchpad_orchestrations::DeployPlan;
use secrecy::SecretString;
use serde_json::{json, Value};

use crate::blueprint::{self, Blueprint};
use crate::cli::{DeployArgs, OutputFormat};
use crate::config::Config;

/// Prints what `deploy` would do with the same arguments. Nothing is
/// provisioned and no password file is created.
pub async fn run_plan(args: DeployArgs) -> Result<()> {
    let config = Config::load()?;
    let placeholder = SecretString::from("unused".to_string());
    let Blueprint { plan, settings } = blueprint::resolve(&args, &config, Some(&placeholder))?;

    let view = plan_view(&plan);
    match args.output {
        OutputFormat::Json => {
            let mut view = view;
            view["settings"] = serde_json::to_value(&settings)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Table => {
            println!("Plan: {} → {} ({})", plan.topology.name, plan.target.kind, plan.target.region);
            println!("{}", "=".repeat(80));
            println!();
            println!("Resources:");
            for spec in &plan.resources {
                match spec.mode {
                    ResourceMode::Managed => println!("  {:<12} {:<28} ensure", spec.kind.to_string(), spec.name),
                    ResourceMode::Manual => println!("  {:<12} {:<28} manual", spec.kind.to_string(), spec.name),
                }
            }
            println!();
            println!("Image:");
            println!("  Build:     {}", ImageArtifact::local_reference(&plan.image.repository, &plan.image.tag));
            println!("  Context:   {}", plan.image.context.display());
            println!();
            println!("Services:");
            for service in &plan.topology.services {
                println!(
                    "  {:<10} {:<24} x{} ports [{}]",
                    service.name,
                    image_label(service),
                    service.replicas,
                    ports_label(service)
                );
                for line in env_lines(service) {
                    println!("      {}", line);
                }
            }
            println!();
            println!("Health:     {} every {:?}, give up after {:?}", plan.policy.endpoint, plan.policy.interval, plan.policy.timeout);
            if plan.init.is_empty() {
                println!("Init:       skipped");
            } else {
                for step in &plan.init.steps {
                    println!("Init:       {}", step.describe());
                }
                println!(
                    "Seeding:    {}",
                    if plan.init.seed.is_some() { "admin account from flags" } else { "off" }
                );
            }
        }
    }
    Ok(())
}

/// JSON form of the plan; literal env values are left out
pub fn plan_view(plan: &DeployPlan) -> Value {
    let services: Vec<Value> = plan
        .topology
        .services
        .iter()
        .map(|service| {
            json!({
                "name": service.name,
                "image": image_label(service),
                "replicas": service.replicas,
                "ports": service.ports,
                "env": env_lines(service),
                "volumes": service.volumes,
            })
        })
        .collect();

    json!({
        "target": plan.target,
        "resources": plan.resources,
        "image": {
            "repository": plan.image.repository,
            "tag": plan.image.tag,
            "context": plan.image.context,
        },
        "services": services,
        "health": plan.policy,
        "init": {
            "steps": plan.init.steps,
            "seed_admin": plan.init.seed.as_ref().map(|s| s.username.clone()),
        },
        "endpoint_override": plan.endpoint_override,
    })
}

fn image_label(service: &ServiceSpec) -> String {
    service
        .image
        .clone()
        .unwrap_or_else(|| "<published image>".to_string())
}

fn ports_label(service: &ServiceSpec) -> String {
    service
        .ports
        .iter()
        .map(|p| format!("{}:{}", p.published(), p.container_port))
        .collect::<Vec<_>>()
        .join(", ")
}

fn env_lines(service: &ServiceSpec) -> Vec<String> {
    service
        .env
        .iter()
        .map(|binding| match &binding.value {
            EnvValue::Literal { .. } => format!("{}=<literal>", binding.name),
            EnvValue::SecretRef { secret, key } => format!("{}=<secret {}/{}>", binding.name, secret, key),
        })
        .collect()
}
