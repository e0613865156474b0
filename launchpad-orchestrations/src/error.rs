//! Error taxonomy for the deployment stages

use launchpad_models::{Stage, StageFailure};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionErrorKind {
    /// Rate limiting, timeouts, dropped connections: safe for the caller to retry
    Transient,
    /// Bad credentials, quota, invalid input: needs operator action
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("failed to provision {resource}: {detail}")]
pub struct ProvisionError {
    pub kind: ProvisionErrorKind,
    pub resource: String,
    pub detail: String,
}

impl ProvisionError {
    pub fn transient(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ProvisionErrorKind::Transient,
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    pub fn permanent(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ProvisionErrorKind::Permanent,
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    /// Classifies a CLI failure from its stderr
    pub fn from_cli(resource: impl Into<String>, stderr: &str) -> Self {
        let detail = stderr.trim().to_string();
        if is_transient(&detail) {
            Self::transient(resource, detail)
        } else {
            Self::permanent(resource, detail)
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProvisionErrorKind::Transient
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "throttl",
    "rate exceeded",
    "rateexceeded",
    "too many requests",
    "toomanyrequests",
    "rate limit",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
    "service unavailable",
    "internal server error",
    "bad gateway",
    "gateway timeout",
];

/// Gateway status codes, only where a CLI reports them as a status:
/// `HTTP 503`, `status code: 502`, `HTTPError 504`, `(503)`
static GATEWAY_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:http|status|code|error)\W{0,3}50[234]\b|\(50[234]\)").ok());

/// Heuristic used for every provider CLI
pub fn is_transient(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
        || GATEWAY_STATUS.as_ref().is_some_and(|re| re.is_match(&lower))
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("image build failed: {0}")]
    Build(String),

    #[error("registry authentication failed: {0}")]
    Auth(String),

    #[error("image push failed: {0}")]
    Push(String),
}

#[derive(Debug, Clone, Error)]
#[error("topology apply rejected: {reason}")]
pub struct ApplyError {
    /// Platform rejection reason, verbatim
    pub reason: String,
}

impl ApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<kube::Error> for ApplyError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ApplyError::new(response.message),
            other => ApplyError::new(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("health check did not pass after {attempts} attempts in {elapsed_secs}s: {last_observation}")]
pub struct HealthTimeout {
    pub attempts: u32,
    pub elapsed_secs: u64,
    pub last_observation: String,
}

#[derive(Debug, Clone, Error)]
#[error("initialization step '{step}' failed: {detail}")]
pub struct InitError {
    pub step: String,
    pub detail: String,
}

/// Target configuration that cannot produce a backend
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("target {target} needs {setting}")]
    MissingSetting { target: String, setting: &'static str },

    #[error("credentials for {found} cannot be used with target {target}")]
    CredentialMismatch { target: String, found: String },
}

/// Converts a stage error into the failure recorded on the result
pub trait IntoStageFailure {
    fn into_stage_failure(self) -> StageFailure;
}

impl IntoStageFailure for ProvisionError {
    fn into_stage_failure(self) -> StageFailure {
        StageFailure {
            stage: Stage::Provision,
            kind: match self.kind {
                ProvisionErrorKind::Transient => "transient".to_string(),
                ProvisionErrorKind::Permanent => "permanent".to_string(),
            },
            retryable: self.is_transient(),
            message: self.to_string(),
            resource: Some(self.resource),
        }
    }
}

impl IntoStageFailure for PublishError {
    fn into_stage_failure(self) -> StageFailure {
        let (kind, retryable) = match &self {
            PublishError::Build(_) => ("build", false),
            PublishError::Auth(_) => ("auth", false),
            PublishError::Push(_) => ("push", true),
        };
        StageFailure {
            stage: Stage::Publish,
            kind: kind.to_string(),
            message: self.to_string(),
            retryable,
            resource: None,
        }
    }
}

impl IntoStageFailure for ApplyError {
    fn into_stage_failure(self) -> StageFailure {
        StageFailure {
            stage: Stage::Deploy,
            kind: "apply".to_string(),
            message: self.to_string(),
            retryable: false,
            resource: None,
        }
    }
}

impl IntoStageFailure for HealthTimeout {
    fn into_stage_failure(self) -> StageFailure {
        StageFailure {
            stage: Stage::HealthGate,
            kind: "health_timeout".to_string(),
            message: self.to_string(),
            retryable: true,
            resource: None,
        }
    }
}
