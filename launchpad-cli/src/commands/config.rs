use anyhow::Result;
use secrecy::SecretString;

use crate::config::Config;

pub async fn run_config() -> Result<()> {
    let config = Config::load()?;
    for (key, value) in describe(&config) {
        println!("{:<32} {}", key, value);
    }
    Ok(())
}

/// Effective settings as display pairs; secrets only show whether they are set
pub fn describe(config: &Config) -> Vec<(&'static str, String)> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "(not set)".to_string());
    let secret = |v: &Option<SecretString>| if v.is_some() { "********" } else { "(not set)" }.to_string();
    let list = |v: &[String]| if v.is_empty() { "(not set)".to_string() } else { v.join(",") };

    vec![
        ("LAUNCHPAD_APP_NAME", config.app_name.clone()),
        ("LAUNCHPAD_CLUSTER", opt(&config.cluster)),
        ("LAUNCHPAD_REGION", opt(&config.region)),
        ("LAUNCHPAD_REGISTRY", opt(&config.registry)),
        ("LAUNCHPAD_DOMAIN", opt(&config.domain)),
        ("LAUNCHPAD_NAMESPACE", config.namespace.clone()),
        ("LAUNCHPAD_WORK_DIR", config.work_dir.display().to_string()),
        ("LAUNCHPAD_FRONTEND_IMAGE", opt(&config.frontend_image)),
        ("LAUNCHPAD_LOG_TAIL_LINES", config.log_tail_lines.to_string()),
        ("LAUNCHPAD_AWS_PROFILE", opt(&config.aws_profile)),
        ("LAUNCHPAD_AWS_ACCOUNT_ID", opt(&config.aws_account_id)),
        ("LAUNCHPAD_ECS_SUBNETS", list(config.ecs_subnets.as_slice())),
        ("LAUNCHPAD_ECS_SECURITY_GROUPS", list(config.ecs_security_groups.as_slice())),
        ("LAUNCHPAD_ECS_EXECUTION_ROLE_ARN", opt(&config.ecs_execution_role_arn)),
        ("LAUNCHPAD_PUBLIC_URL", opt(&config.public_url)),
        ("LAUNCHPAD_GCP_PROJECT", opt(&config.gcp_project)),
        ("LAUNCHPAD_AZURE_SUBSCRIPTION", opt(&config.azure_subscription)),
        ("LAUNCHPAD_AZURE_RESOURCE_GROUP", opt(&config.azure_resource_group)),
        ("LAUNCHPAD_POSTGRES_PASSWORD", secret(&config.postgres_password)),
        ("LAUNCHPAD_LOAD_CREDENTIALS", secret(&config.load_credentials)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_masked() {
        let config = Config::from_lookup(|key| match key {
            "LAUNCHPAD_POSTGRES_PASSWORD" => Some("pg-secret-value".to_string()),
            "LAUNCHPAD_LOAD_CREDENTIALS" => Some("user:load-secret".to_string()),
            _ => None,
        })
        .unwrap();

        let rendered = format!("{:?}", describe(&config));
        assert!(!rendered.contains("pg-secret-value"));
        assert!(!rendered.contains("load-secret"));
        assert!(rendered.contains("********"));
    }
}
