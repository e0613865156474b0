//! One-shot post-deploy initialization (migrations, optional admin seeding)

use crate::deploy::{DeployHandle, TopologyDeployer};
use crate::error::InitError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

pub const SEED_USERNAME_VAR: &str = "SEED_ADMIN_USERNAME";
pub const SEED_PASSWORD_VAR: &str = "SEED_ADMIN_PASSWORD";

/// A command executed once inside a running service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitStep {
    pub service: String,
    pub command: Vec<String>,
}

impl InitStep {
    pub fn new<I, S>(service: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service: service.into(),
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn describe(&self) -> String {
        format!("{}: {}", self.service, self.command.join(" "))
    }
}

/// Operator-supplied administrator account; there is no built-in default
#[derive(Clone)]
pub struct SeedCredentials {
    pub username: String,
    pub password: SecretString,
}

impl SeedCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for SeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Environment handed to an init command; values never reach logs
pub type InitEnv = Vec<(String, SecretString)>;

#[derive(Debug, Clone, Default)]
pub struct InitPlan {
    pub steps: Vec<InitStep>,
    pub seed: Option<SeedCredentials>,
}

impl InitPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Seed variables are only present when credentials were supplied
    pub fn env(&self) -> InitEnv {
        match &self.seed {
            Some(seed) => vec![
                (SEED_USERNAME_VAR.to_string(), SecretString::from(seed.username.clone())),
                (SEED_PASSWORD_VAR.to_string(), seed.password.clone()),
            ],
            None => Vec::new(),
        }
    }
}

/// Runs every step in order, stopping at the first failure
pub async fn run_plan(
    deployer: &dyn TopologyDeployer,
    handle: &DeployHandle,
    plan: &InitPlan,
) -> Result<usize, InitError> {
    let env = plan.env();
    if plan.seed.is_some() {
        info!("Admin seeding enabled ({} and {} set)", SEED_USERNAME_VAR, SEED_PASSWORD_VAR);
    }

    for (i, step) in plan.steps.iter().enumerate() {
        info!("Init step {}/{}: {}", i + 1, plan.steps.len(), step.describe());
        deployer.run_init(handle, step, &env).await?;
        info!("✓ {}", step.describe());
    }
    Ok(plan.steps.len())
}

/// Renders env pairs as `NAME=value` lines, for commands that read them on stdin
pub(crate) fn env_lines(env: &InitEnv) -> String {
    env.iter()
        .map(|(name, value)| format!("{}={}\n", name, value.expose_secret()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_seed_means_no_credentials() {
        let plan = InitPlan {
            steps: vec![InitStep::new("backend", ["python", "scripts/setup_database.py"])],
            seed: None,
        };
        assert!(plan.env().is_empty());
    }

    #[test]
    fn test_seed_env_and_redacted_debug() {
        let plan = InitPlan {
            steps: vec![],
            seed: Some(SeedCredentials::new("ops-admin", "correct horse battery")),
        };
        let env = plan.env();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].0, SEED_USERNAME_VAR);
        assert_eq!(env[1].1.expose_secret(), "correct horse battery");

        let debug = format!("{:?}", plan);
        assert!(!debug.contains("correct horse battery"));
        assert!(debug.contains("ops-admin"));

        assert_eq!(
            env_lines(&env),
            "SEED_ADMIN_USERNAME=ops-admin\nSEED_ADMIN_PASSWORD=correct horse battery\n"
        );
    }
}
