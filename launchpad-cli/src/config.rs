use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Settings read from `LAUNCHPAD_*` environment variables (and `.env`)
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub cluster: Option<String>,
    pub region: Option<String>,
    pub registry: Option<String>,
    pub domain: Option<String>,
    pub namespace: String,
    pub work_dir: PathBuf,
    pub frontend_image: Option<String>,
    pub log_tail_lines: usize,
    pub aws_profile: Option<String>,
    pub aws_account_id: Option<String>,
    pub ecs_subnets: Vec<String>,
    pub ecs_security_groups: Vec<String>,
    pub ecs_execution_role_arn: Option<String>,
    pub public_url: Option<String>,
    pub gcp_project: Option<String>,
    pub azure_subscription: Option<String>,
    pub azure_resource_group: Option<String>,
    pub postgres_password: Option<SecretString>,
    pub load_credentials: Option<SecretString>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let list = |key: &str| {
            get(key)
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            app_name: get("LAUNCHPAD_APP_NAME").unwrap_or_else(|| "resume-ai".to_string()),
            cluster: get("LAUNCHPAD_CLUSTER"),
            region: get("LAUNCHPAD_REGION"),
            registry: get("LAUNCHPAD_REGISTRY"),
            domain: get("LAUNCHPAD_DOMAIN"),
            namespace: get("LAUNCHPAD_NAMESPACE").unwrap_or_else(|| "launchpad".to_string()),
            work_dir: get("LAUNCHPAD_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            frontend_image: get("LAUNCHPAD_FRONTEND_IMAGE"),
            log_tail_lines: get("LAUNCHPAD_LOG_TAIL_LINES")
                .unwrap_or_else(|| "50".to_string())
                .parse()
                .context("LAUNCHPAD_LOG_TAIL_LINES must be a non-negative number")?,
            aws_profile: get("LAUNCHPAD_AWS_PROFILE").or_else(|| get("AWS_PROFILE")),
            aws_account_id: get("LAUNCHPAD_AWS_ACCOUNT_ID"),
            ecs_subnets: list("LAUNCHPAD_ECS_SUBNETS"),
            ecs_security_groups: list("LAUNCHPAD_ECS_SECURITY_GROUPS"),
            ecs_execution_role_arn: get("LAUNCHPAD_ECS_EXECUTION_ROLE_ARN"),
            public_url: get("LAUNCHPAD_PUBLIC_URL"),
            gcp_project: get("LAUNCHPAD_GCP_PROJECT").or_else(|| get("GOOGLE_CLOUD_PROJECT")),
            azure_subscription: get("LAUNCHPAD_AZURE_SUBSCRIPTION"),
            azure_resource_group: get("LAUNCHPAD_AZURE_RESOURCE_GROUP"),
            postgres_password: get("LAUNCHPAD_POSTGRES_PASSWORD").map(SecretString::from),
            load_credentials: get(launchpad_loadtest::CREDENTIALS_VAR).map(SecretString::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.app_name, "resume-ai");
        assert_eq!(config.namespace, "launchpad");
        assert_eq!(config.log_tail_lines, 50);
        assert!(config.postgres_password.is_none());
        assert!(config.load_credentials.is_none());
    }

    #[test]
    fn test_lists_and_fallbacks() {
        let config = config(&[
            ("LAUNCHPAD_ECS_SUBNETS", "subnet-a, subnet-b,"),
            ("AWS_PROFILE", "staging"),
            ("LAUNCHPAD_REGION", "  "),
        ])
        .unwrap();
        assert_eq!(config.ecs_subnets, vec!["subnet-a", "subnet-b"]);
        assert_eq!(config.aws_profile.as_deref(), Some("staging"));
        assert!(config.region.is_none());
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = config(&[("LAUNCHPAD_LOG_TAIL_LINES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("LAUNCHPAD_LOG_TAIL_LINES"));
    }
}
