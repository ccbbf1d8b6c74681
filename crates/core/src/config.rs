//! Poll knobs as they appear in configuration, mapped onto [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PolicyError, RetryPolicy};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds to wait before the first observation.
    pub prepoll_delay: f64,
    /// Observation budget per wait.
    pub retries_total: u32,
    /// Seconds between observations.
    pub sleep_time: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { prepoll_delay: 1.0, retries_total: 150, sleep_time: 1.0 }
    }
}

impl PollConfig {
    /// Defaults overlaid with `STRAIN_PREPOLL_DELAY`, `STRAIN_RETRIES_TOTAL`, `STRAIN_SLEEP_TIME`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = std::env::var("STRAIN_PREPOLL_DELAY").ok().and_then(|s| s.parse().ok()) { cfg.prepoll_delay = v; }
        if let Some(v) = std::env::var("STRAIN_RETRIES_TOTAL").ok().and_then(|s| s.parse().ok()) { cfg.retries_total = v; }
        if let Some(v) = std::env::var("STRAIN_SLEEP_TIME").ok().and_then(|s| s.parse().ok()) { cfg.sleep_time = v; }
        cfg
    }

    pub fn policy(&self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::new(secs("prepoll_delay", self.prepoll_delay)?, secs("sleep_time", self.sleep_time)?, self.retries_total)
    }
}

impl TryFrom<PollConfig> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(cfg: PollConfig) -> Result<Self, Self::Error> { cfg.policy() }
}

impl From<RetryPolicy> for PollConfig {
    fn from(p: RetryPolicy) -> Self {
        Self { prepoll_delay: p.prepoll_delay().as_secs_f64(), retries_total: p.max_attempts(), sleep_time: p.interval().as_secs_f64() }
    }
}

fn secs(field: &'static str, v: f64) -> Result<Duration, PolicyError> {
    if !v.is_finite() || v < 0.0 {
        return Err(PolicyError::BadSeconds(field));
    }
    Ok(Duration::from_secs_f64(v))
}
