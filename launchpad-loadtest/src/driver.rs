//! Virtual-user scheduler
//!
//! The driver wakes every `tick`, computes the profile's target for the
//! elapsed time and starts or stops users to match. Stopping cancels the
//! most recently started users; each finishes its in-flight request and
//! exits at its next pause.

use crate::client::{AccessToken, ApiClient, ApiRoutes, Credential};
use crate::error::{ApiError, LoadError};
use crate::metrics::Metrics;
use crate::profile::LoadProfile;
use crate::report::{LoadReport, Thresholds};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub base_url: String,
    pub routes: ApiRoutes,
    pub profile: LoadProfile,
    pub credentials: Vec<Credential>,
    /// Pause between consecutive requests of one user
    pub think_time: Duration,
    /// How often the user count is reconciled with the profile
    pub tick: Duration,
    pub thresholds: Thresholds,
}

impl DriverConfig {
    pub fn new(base_url: impl Into<String>, credentials: Vec<Credential>) -> Self {
        Self {
            base_url: base_url.into(),
            routes: ApiRoutes::default(),
            profile: LoadProfile::default(),
            credentials,
            think_time: Duration::from_secs(1),
            tick: Duration::from_secs(1),
            thresholds: Thresholds::default(),
        }
    }
}

struct VirtualUser {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LoadDriver {
    config: DriverConfig,
    client: Arc<ApiClient>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl LoadDriver {
    pub fn new(config: DriverConfig, cancel: CancellationToken) -> Result<Self, LoadError> {
        if config.credentials.is_empty() {
            return Err(LoadError::NoCredentials);
        }
        let client = Arc::new(ApiClient::new(&config.base_url, config.routes.clone()));
        Ok(Self {
            config,
            client,
            metrics: Arc::new(Metrics::new()),
            cancel,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Runs the whole profile, or until the driver's token is cancelled
    pub async fn run(&self) -> LoadReport {
        let total = self.config.profile.total_duration();
        info!(
            "Load run against {} ({} stages, {:.0}s, up to {} users)",
            self.config.base_url,
            self.config.profile.stages.len(),
            total.as_secs_f64(),
            self.config.profile.peak()
        );

        let start = Instant::now();
        let mut active: Vec<VirtualUser> = Vec::new();
        let mut stopping: Vec<JoinHandle<()>> = Vec::new();
        let mut started = 0usize;
        let mut peak = 0u32;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let target = self.config.profile.target_at(elapsed) as usize;
            while active.len() < target {
                active.push(self.spawn_user(started));
                started += 1;
            }
            while active.len() > target {
                if let Some(user) = active.pop() {
                    user.cancel.cancel();
                    stopping.push(user.handle);
                }
            }
            peak = peak.max(active.len() as u32);
            debug!(elapsed_secs = elapsed.as_secs(), users = active.len(), "Reconciled virtual users");

            let pause = self.config.tick.min(total - elapsed);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("Load run cancelled after {:.1}s", elapsed.as_secs_f64());
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        for user in active.drain(..) {
            user.cancel.cancel();
            stopping.push(user.handle);
        }
        for handle in stopping {
            if let Err(e) = handle.await {
                warn!("Virtual user task failed: {}", e);
            }
        }

        let report = LoadReport::judge(self.metrics.snapshot(), &self.config.thresholds, start.elapsed(), peak);
        info!(
            "Load run finished: {} iterations, {} requests, error rate {:.2}%",
            report.metrics.iterations,
            report.metrics.requests,
            report.metrics.error_rate * 100.0
        );
        report
    }

    fn spawn_user(&self, index: usize) -> VirtualUser {
        let credential = self.config.credentials[index % self.config.credentials.len()].clone();
        let cancel = self.cancel.child_token();
        let user = UserLoop {
            id: index + 1,
            client: self.client.clone(),
            metrics: self.metrics.clone(),
            credential,
            think_time: self.config.think_time,
            cancel: cancel.clone(),
        };
        VirtualUser {
            cancel,
            handle: tokio::spawn(user.run()),
        }
    }
}

struct UserLoop {
    id: usize,
    client: Arc<ApiClient>,
    metrics: Arc<Metrics>,
    credential: Credential,
    think_time: Duration,
    cancel: CancellationToken,
}

impl UserLoop {
    async fn run(self) {
        debug!(user = self.id, "Virtual user started");
        let mut token: Option<AccessToken> = None;

        while !self.cancel.is_cancelled() {
            if token.is_none() {
                match self.checked(self.client.login(&self.credential)).await {
                    Some(t) => token = Some(t),
                    None => {
                        self.metrics.iteration();
                        if !self.pause().await {
                            break;
                        }
                        continue;
                    }
                }
            }
            let Some(access) = token.as_ref() else { break };

            if !self.iteration(access).await {
                break;
            }
            self.metrics.iteration();
        }
        debug!(user = self.id, "Virtual user stopped");
    }

    /// One pass over the read chain and an optional evaluate; false when
    /// the user was cancelled during a pause
    async fn iteration(&self, token: &AccessToken) -> bool {
        let resumes = self.checked(self.client.list_resumes(token)).await.unwrap_or_default();
        if !self.pause().await {
            return false;
        }

        let jobs = self.checked(self.client.list_jobs(token)).await.unwrap_or_default();
        if !self.pause().await {
            return false;
        }

        self.checked(self.client.dashboard(token)).await;
        if !self.pause().await {
            return false;
        }

        if let Some((resume_id, job_id)) = pick_pair(&resumes, &jobs) {
            let started = Instant::now();
            let result = self.client.evaluate(token, resume_id, job_id).await;
            self.metrics.evaluate.record(started.elapsed());
            self.record(result);
            if !self.pause().await {
                return false;
            }
        }
        true
    }

    async fn checked<T>(&self, call: impl std::future::Future<Output = Result<T, ApiError>>) -> Option<T> {
        let result = call.await;
        self.record(result)
    }

    fn record<T>(&self, result: Result<T, ApiError>) -> Option<T> {
        self.metrics.request();
        match result {
            Ok(value) => {
                self.metrics.check(true);
                Some(value)
            }
            Err(e) => {
                debug!(user = self.id, route = e.route(), error = %e, "Check failed");
                self.metrics.check(false);
                None
            }
        }
    }

    async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.think_time) => true,
        }
    }
}

fn pick_pair<'a>(resumes: &'a [Value], jobs: &'a [Value]) -> Option<(&'a Value, &'a Value)> {
    if resumes.is_empty() || jobs.is_empty() {
        return None;
    }
    let mut rng = rand::rng();
    let r = rng.random_range(0..resumes.len());
    let j = rng.random_range(0..jobs.len());
    Some((&resumes[r], &jobs[j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_driver_requires_credentials() {
        let config = DriverConfig::new("http://localhost:8000", Vec::new());
        let err = LoadDriver::new(config, CancellationToken::new()).err().unwrap();
        assert_eq!(err, LoadError::NoCredentials);
    }

    #[test]
    fn test_pick_pair_needs_both_lists() {
        let resumes = vec![json!(1), json!(2)];
        assert!(pick_pair(&resumes, &[]).is_none());
        assert!(pick_pair(&[], &resumes).is_none());

        let jobs = vec![json!("job-a")];
        let (r, j) = pick_pair(&resumes, &jobs).unwrap();
        assert!(resumes.contains(r));
        assert_eq!(j, &json!("job-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_driver_returns_promptly() {
        let cancel = CancellationToken::new();
        let mut config = DriverConfig::new("http://127.0.0.1:9", vec![Credential::new("u", "p")]);
        config.profile = "10m:0".parse().unwrap();
        let driver = LoadDriver::new(config, cancel.clone()).unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let report = driver.run().await;

        assert!(start.elapsed() < Duration::from_secs(7));
        assert_eq!(report.peak_users, 0);
        assert_eq!(report.metrics.requests, 0);
    }
}
