//! Shared counters and the evaluate latency histogram
//!
//! Every virtual user writes into the same [`Metrics`]; all updates are
//! single atomic operations.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (inclusive, milliseconds) of the finite buckets
pub const BUCKET_BOUNDS_MS: [u64; 20] = [
    5, 10, 25, 50, 75, 100, 150, 200, 300, 400, 500, 750, 1000, 1500, 2000, 3000, 5000, 7500, 10000, 20000,
];

const BUCKETS: usize = BUCKET_BOUNDS_MS.len() + 1;

pub struct LatencyHistogram {
    counts: [AtomicU64; BUCKETS],
    total: AtomicU64,
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            total: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            max_ms: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    pub fn record(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let bucket = BUCKET_BOUNDS_MS.iter().position(|&bound| ms <= bound).unwrap_or(BUCKETS - 1);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> Option<Duration> {
        (self.count() > 0).then(|| Duration::from_millis(self.max_ms.load(Ordering::Relaxed)))
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = self.count();
        (count > 0).then(|| Duration::from_millis(self.sum_ms.load(Ordering::Relaxed) / count))
    }

    /// Estimate of the `q`-quantile, interpolated linearly inside the bucket
    /// that holds it and capped at the largest observed value. `None` until
    /// something was recorded.
    pub fn quantile(&self, q: f64) -> Option<Duration> {
        let total = self.count();
        if total == 0 {
            return None;
        }
        let rank = ((q.clamp(0.0, 1.0) * total as f64).ceil() as u64).max(1);
        let max = self.max_ms.load(Ordering::Relaxed);

        let mut seen = 0;
        for (i, count) in self.counts.iter().enumerate() {
            let in_bucket = count.load(Ordering::Relaxed);
            if in_bucket == 0 || seen + in_bucket < rank {
                seen += in_bucket;
                continue;
            }
            let lower = if i == 0 { 0 } else { BUCKET_BOUNDS_MS[i - 1] };
            let upper = BUCKET_BOUNDS_MS.get(i).copied().unwrap_or(max).max(lower);
            let fraction = (rank - seen) as f64 / in_bucket as f64;
            let estimate = lower as f64 + (upper - lower) as f64 * fraction;
            return Some(Duration::from_millis((estimate.round() as u64).min(max)));
        }
        Some(Duration::from_millis(max))
    }
}

#[derive(Default)]
pub struct Metrics {
    checks: AtomicU64,
    failed_checks: AtomicU64,
    requests: AtomicU64,
    iterations: AtomicU64,
    pub evaluate: LatencyHistogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, passed: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.failed_checks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of failed checks; zero before the first check
    pub fn error_rate(&self) -> f64 {
        let checks = self.checks.load(Ordering::Relaxed);
        if checks == 0 {
            return 0.0;
        }
        self.failed_checks.load(Ordering::Relaxed) as f64 / checks as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let ms = |d: Option<Duration>| d.map(|d| d.as_millis() as u64);
        MetricsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            failed_checks: self.failed_checks.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            error_rate: self.error_rate(),
            evaluate_count: self.evaluate.count(),
            evaluate_mean_ms: ms(self.evaluate.mean()),
            evaluate_p50_ms: ms(self.evaluate.quantile(0.50)),
            evaluate_p95_ms: ms(self.evaluate.quantile(0.95)),
            evaluate_p99_ms: ms(self.evaluate.quantile(0.99)),
            evaluate_max_ms: ms(self.evaluate.max()),
        }
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub checks: u64,
    pub failed_checks: u64,
    pub requests: u64,
    pub iterations: u64,
    pub error_rate: f64,
    pub evaluate_count: u64,
    pub evaluate_mean_ms: Option<u64>,
    pub evaluate_p50_ms: Option<u64>,
    pub evaluate_p95_ms: Option<u64>,
    pub evaluate_p99_ms: Option<u64>,
    pub evaluate_max_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_histogram() {
        let h = LatencyHistogram::default();
        assert_eq!(h.count(), 0);
        assert_eq!(h.quantile(0.95), None);
        assert_eq!(h.max(), None);
    }

    #[test]
    fn test_quantiles_interpolate_within_bucket() {
        let h = LatencyHistogram::default();
        for _ in 0..90 {
            h.record(ms(40));
        }
        for _ in 0..10 {
            h.record(ms(1800));
        }

        assert_eq!(h.count(), 100);
        assert_eq!(h.quantile(0.50), Some(ms(39)));
        assert_eq!(h.quantile(0.90), Some(ms(50)));
        assert_eq!(h.quantile(0.95), Some(ms(1750)));
        assert_eq!(h.quantile(0.99), Some(ms(1800)));
        assert_eq!(h.max(), Some(ms(1800)));
    }

    #[test]
    fn test_quantile_between_bounds_stays_under_custom_limit() {
        let h = LatencyHistogram::default();
        for i in 0..100 {
            h.record(ms(1510 + i));
        }
        let p95 = h.quantile(0.95).unwrap();
        assert!(p95 < ms(1800), "p95 was {:?}", p95);
        assert_eq!(p95, ms(1609));
    }

    #[test]
    fn test_overflow_bucket_reports_max() {
        let h = LatencyHistogram::default();
        h.record(ms(45_000));
        assert_eq!(h.quantile(0.95), Some(ms(45_000)));
    }

    #[test]
    fn test_error_rate() {
        let m = Metrics::new();
        assert_eq!(m.error_rate(), 0.0);
        m.check(true);
        m.check(true);
        m.check(true);
        m.check(false);
        assert_eq!(m.error_rate(), 0.25);
        assert_eq!(m.snapshot().failed_checks, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let metrics = Arc::new(Metrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let metrics = metrics.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..1000u64 {
                    metrics.request();
                    metrics.check(i % 10 != 0);
                    metrics.evaluate.record(Duration::from_millis(i % 300));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 8000);
        assert_eq!(snapshot.checks, 8000);
        assert_eq!(snapshot.failed_checks, 800);
        assert_eq!(snapshot.evaluate_count, 8000);
        assert_eq!(snapshot.evaluate_max_ms, Some(299));
    }
}
