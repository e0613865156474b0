//! Staged virtual-user profile
//!
//! A profile is an ordered list of `(duration, target)` stages. During a
//! stage the number of active users moves linearly from the previous
//! stage's target (zero before the first) to the stage's own target.

use crate::error::LoadError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStage {
    pub duration: Duration,
    pub target: u32,
}

impl LoadStage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    pub stages: Vec<LoadStage>,
}

impl Default for LoadProfile {
    /// Ramp to 10, hold, ramp to 20, hold, ramp down
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self {
            stages: vec![
                LoadStage::new(minutes(1), 10),
                LoadStage::new(minutes(3), 10),
                LoadStage::new(minutes(1), 20),
                LoadStage::new(minutes(3), 20),
                LoadStage::new(minutes(1), 0),
            ],
        }
    }
}

impl LoadProfile {
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn peak(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Number of users that should be active `elapsed` into the run
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let mut start = Duration::ZERO;
        let mut from = 0u32;

        for stage in &self.stages {
            let end = start + stage.duration;
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = f64::from(stage.target) - f64::from(from);
                return (f64::from(from) + delta * progress).round() as u32;
            }
            start = end;
            from = stage.target;
        }

        from
    }
}

impl FromStr for LoadProfile {
    type Err = LoadError;

    /// Parses `"30s:10,1m:10,30s:0"`
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| LoadError::InvalidProfile {
            input: input.to_string(),
            reason,
        };

        let mut stages = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (duration, target) = part
                .split_once(':')
                .ok_or_else(|| invalid(format!("stage '{}' is not duration:target", part)))?;
            let duration = parse_duration(duration.trim()).ok_or_else(|| invalid(format!("bad duration '{}'", duration)))?;
            let target = target
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid(format!("bad target '{}'", target)))?;
            stages.push(LoadStage::new(duration, target));
        }

        if stages.is_empty() {
            return Err(invalid("no stages".to_string()));
        }
        Ok(Self { stages })
    }
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|s| format!("{}:{}", format_duration(s.duration), s.target))
            .collect();
        write!(f, "{}", stages.join(","))
    }
}

/// `500ms`, `30s`, `2m`, `1h`; a bare number is seconds
pub fn parse_duration(text: &str) -> Option<Duration> {
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        format!("{}ms", millis)
    } else if millis % 60_000 != 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}m", millis / 60_000)
    }
}
