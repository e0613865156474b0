use thiserror::Error;

/// Problems with the load run's own configuration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("invalid load profile '{input}': {reason}")]
    InvalidProfile { input: String, reason: String },

    /// Carries the entry's position, never its content
    #[error("credential entry #{0} is not of the form user:password")]
    InvalidCredential(usize),

    #[error("no load test credentials configured; set LAUNCHPAD_LOAD_CREDENTIALS or pass --credential")]
    NoCredentials,
}

/// A single failed call against the application API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{route}: request failed: {source}")]
    Transport {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{route}: unexpected status {status}")]
    Status { route: String, status: u16 },

    #[error("{route}: unexpected response body: {detail}")]
    Shape { route: String, detail: String },
}

impl ApiError {
    pub fn route(&self) -> &str {
        match self {
            ApiError::Transport { route, .. } | ApiError::Status { route, .. } | ApiError::Shape { route, .. } => route,
        }
    }
}
