//! Bounded health gate

use async_trait::async_trait;
use launchpad_models::HealthCheckPolicy;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One probe result: the status code, or why there was none
pub type Observation = Result<u16, String>;

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> Observation;
}

#[async_trait]
impl<T: Probe + ?Sized> Probe for std::sync::Arc<T> {
    async fn probe(&self, url: &str) -> Observation {
        (**self).probe(url).await
    }
}

/// GET probe over reqwest
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Observation {
        match self.client.get(url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    Ready {
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_observation: String,
    },
    Cancelled,
}

pub struct HealthGate<P: Probe> {
    probe: P,
    cancel: CancellationToken,
}

impl<P: Probe> HealthGate<P> {
    pub fn new(probe: P, cancel: CancellationToken) -> Self {
        Self { probe, cancel }
    }

    /// Polls `url` at a constant interval until it answers with the expected
    /// status or the timeout elapses.
    ///
    /// The first poll happens immediately. A probe never runs longer than
    /// one interval and the last sleep is cut to the remaining budget, so the
    /// gate returns within `timeout + interval`.
    pub async fn await_ready(&self, policy: &HealthCheckPolicy, url: &str) -> HealthOutcome {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let observation = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return HealthOutcome::Cancelled,
                result = tokio::time::timeout(policy.interval, self.probe.probe(url)) => match result {
                    Ok(observation) => observation,
                    Err(_) => Err(format!("no response within {:?}", policy.interval)),
                },
            };

            let elapsed = start.elapsed();
            match &observation {
                Ok(status) if *status == policy.expected_status => {
                    info!("✓ Healthy after {} attempt(s) ({:.1}s)", attempts, elapsed.as_secs_f64());
                    return HealthOutcome::Ready { attempts, elapsed };
                }
                Ok(status) => debug!(attempt = attempts, status, "Not ready yet"),
                Err(e) => debug!(attempt = attempts, error = %e, "Not ready yet"),
            }

            if elapsed >= policy.timeout {
                return HealthOutcome::TimedOut {
                    attempts,
                    elapsed,
                    last_observation: describe(&observation),
                };
            }

            if attempts % 6 == 0 {
                info!(
                    "Waiting for {} ({}s of {}s)...",
                    url,
                    elapsed.as_secs(),
                    policy.timeout.as_secs()
                );
            }

            let pause = policy.interval.min(policy.timeout - elapsed);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return HealthOutcome::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn describe(observation: &Observation) -> String {
    match observation {
        Ok(status) => format!("HTTP {}", status),
        Err(e) => e.clone(),
    }
}
