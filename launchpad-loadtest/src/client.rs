//! Thin client for the application API surface the load run exercises

use crate::error::{ApiError, LoadError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Paths relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRoutes {
    pub login: String,
    pub resumes: String,
    pub jobs: String,
    pub dashboard: String,
    pub evaluate: String,
}

impl Default for ApiRoutes {
    fn default() -> Self {
        Self {
            login: "/api/v1/auth/login".to_string(),
            resumes: "/api/v1/resumes/".to_string(),
            jobs: "/api/v1/jobs/".to_string(),
            dashboard: "/api/v1/analytics/dashboard".to_string(),
            evaluate: "/api/v1/matching/evaluate".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Parses `user:pass,user2:pass2`. Passwords may contain `:`.
    pub fn parse_list(input: &str) -> Result<Vec<Credential>, LoadError> {
        input
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .enumerate()
            .map(|(i, entry)| Self::parse_entry(entry).ok_or(LoadError::InvalidCredential(i + 1)))
            .collect()
    }

    fn parse_entry(entry: &str) -> Option<Credential> {
        let (user, pass) = entry.split_once(':')?;
        if user.is_empty() || pass.is_empty() {
            return None;
        }
        Some(Credential::new(user, pass))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Bearer token returned by login
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    routes: ApiRoutes,
}

impl ApiClient {
    pub fn new(base_url: &str, routes: ApiRoutes) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            routes,
        }
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    pub async fn login(&self, credential: &Credential) -> Result<AccessToken, ApiError> {
        let route = &self.routes.login;
        let body = json!({
            "email_or_username": credential.username,
            "password": credential.password.expose_secret(),
        });
        let response = self.send(route, self.http.post(self.url(route)).json(&body)).await?;

        response
            .get("access_token")
            .and_then(Value::as_str)
            .map(|token| AccessToken(SecretString::from(token.to_string())))
            .ok_or_else(|| shape(route, "missing access_token"))
    }

    pub async fn list_resumes(&self, token: &AccessToken) -> Result<Vec<Value>, ApiError> {
        self.list(token, &self.routes.resumes, "resumes").await
    }

    pub async fn list_jobs(&self, token: &AccessToken) -> Result<Vec<Value>, ApiError> {
        self.list(token, &self.routes.jobs, "jobs").await
    }

    pub async fn dashboard(&self, token: &AccessToken) -> Result<(), ApiError> {
        let route = &self.routes.dashboard;
        self.send(route, self.authorized(self.http.get(self.url(route)), token))
            .await
            .map(|_| ())
    }

    /// Returns the evaluation's `overall_score`
    pub async fn evaluate(&self, token: &AccessToken, resume_id: &Value, job_id: &Value) -> Result<f64, ApiError> {
        let route = &self.routes.evaluate;
        let body = json!({ "resume_id": resume_id, "job_id": job_id });
        let response = self
            .send(route, self.authorized(self.http.post(self.url(route)).json(&body), token))
            .await?;

        response
            .get("overall_score")
            .and_then(Value::as_f64)
            .ok_or_else(|| shape(route, "overall_score is missing or not a number"))
    }

    /// Collects the `id` of every element of `response[field]`
    async fn list(&self, token: &AccessToken, route: &str, field: &str) -> Result<Vec<Value>, ApiError> {
        let response = self
            .send(route, self.authorized(self.http.get(self.url(route)), token))
            .await?;

        let items = response
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| shape(route, &format!("missing '{}' array", field)))?;
        Ok(items.iter().filter_map(|item| item.get("id").cloned()).collect())
    }

    async fn send(&self, route: &str, request: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await.map_err(|source| ApiError::Transport {
            route: route.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                route: route.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| shape(route, &e.to_string()))
    }

    fn authorized(&self, request: reqwest::RequestBuilder, token: &AccessToken) -> reqwest::RequestBuilder {
        request.bearer_auth(token.0.expose_secret())
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }
}

fn shape(route: &str, detail: &str) -> ApiError {
    ApiError::Shape {
        route: route.to_string(),
        detail: detail.to_string(),
    }
}
