use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Acceptance bounds for a load run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub p95_evaluate: Duration,
    pub max_error_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p95_evaluate: Duration::from_secs(2),
            max_error_rate: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "threshold", rename_all = "snake_case")]
pub enum Violation {
    P95Evaluate { observed_ms: u64, limit_ms: u64 },
    ErrorRate { observed: f64, limit: f64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::P95Evaluate { observed_ms, limit_ms } => {
                write!(f, "p95 evaluate latency {}ms exceeds {}ms", observed_ms, limit_ms)
            }
            Violation::ErrorRate { observed, limit } => {
                write!(f, "error rate {:.2}% exceeds {:.2}%", observed * 100.0, limit * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub metrics: MetricsSnapshot,
    pub duration_secs: f64,
    pub peak_users: u32,
    pub violations: Vec<Violation>,
}

impl LoadReport {
    /// A run without a single evaluate call has no latency to judge; only
    /// the error rate applies then.
    pub fn judge(metrics: MetricsSnapshot, thresholds: &Thresholds, duration: Duration, peak_users: u32) -> Self {
        let mut violations = Vec::new();

        let limit_ms = thresholds.p95_evaluate.as_millis() as u64;
        if let Some(observed_ms) = metrics.evaluate_p95_ms {
            if observed_ms > limit_ms {
                violations.push(Violation::P95Evaluate { observed_ms, limit_ms });
            }
        }
        if metrics.error_rate > thresholds.max_error_rate {
            violations.push(Violation::ErrorRate {
                observed: metrics.error_rate,
                limit: thresholds.max_error_rate,
            });
        }

        Self {
            metrics,
            duration_secs: duration.as_secs_f64(),
            peak_users,
            violations,
        }
    }

    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}
