//! Strain core types shared by the lifecycle engine and its clients.

#![forbid(unsafe_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod kinds;

pub use config::PollConfig;
pub use error::{ClusterError, PolicyError};
pub use kinds::{KindMeta, ResourceKind};

pub mod prelude {
    pub use super::{
        ClusterError, Descriptor, ObservedStatus, Phase, PollConfig, PollOutcome, PollResult, ResourceHandle, ResourceKind, RetryPolicy,
        RolloutChange, ScaleSpec,
    };
}

/// Identifies one live or pending object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        let namespace = if kind.namespaced() { namespace.map(|s| s.to_string()) } else { None };
        Self { kind, namespace, name: name.to_string() }
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Governs every wait in one scenario run. Total wait is bounded by
/// `prepoll_delay + max_attempts * interval` plus accessor latency.
///
/// Only constructed through [`RetryPolicy::new`] or a [`PollConfig`], so
/// `max_attempts` is never zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "PollConfig", into = "PollConfig")]
pub struct RetryPolicy {
    prepoll_delay: Duration,
    interval: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(prepoll_delay: Duration, interval: Duration, max_attempts: u32) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        Ok(Self { prepoll_delay, interval, max_attempts })
    }

    pub fn prepoll_delay(&self) -> Duration { self.prepoll_delay }

    pub fn interval(&self) -> Duration { self.interval }

    pub fn max_attempts(&self) -> u32 { self.max_attempts }

    pub fn max_wait(&self) -> Duration {
        self.prepoll_delay + self.interval.saturating_mul(self.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { prepoll_delay: Duration::from_secs(1), interval: Duration::from_secs(1), max_attempts: 150 }
    }
}

/// Readiness verdict of a single observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
}

/// One observation, consumed by the poller within a single cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedStatus {
    pub phase: Phase,
    pub raw: Json,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PollResult {
    Ready,
    Failed,
    TimedOut,
}

impl std::fmt::Display for PollResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { PollResult::Ready => "ready", PollResult::Failed => "failed", PollResult::TimedOut => "timed_out" })
    }
}

/// Terminal result of one poller invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOutcome {
    pub result: PollResult,
    /// Observation calls made, counted from 1.
    pub attempts_used: u32,
    /// Diagnostic only; the attempt count bounds the loop.
    pub elapsed: Duration,
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool { self.result == PollResult::Ready }
}

/// Two-phase scale-then-revert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleSpec {
    pub original_replicas: i32,
    pub target_replicas: i32,
}

impl ScaleSpec {
    pub fn new(original_replicas: i32, target_replicas: i32) -> Result<Self, PolicyError> {
        if original_replicas < 0 || target_replicas < 0 {
            return Err(PolicyError::NegativeReplicas);
        }
        Ok(Self { original_replicas, target_replicas })
    }
}

/// Change applied to the first container of a pod template.
/// Deserializes from a single-key map: `{image: ...}`, `{env: [...]}` or `{resources: {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RolloutChange {
    Image(String),
    Env(Json),
    Resources(Json),
}

impl RolloutChange {
    pub fn field(&self) -> &'static str {
        match self { RolloutChange::Image(_) => "image", RolloutChange::Env(_) => "env", RolloutChange::Resources(_) => "resources" }
    }

    /// Strategic-merge fragment for one container, keyed by container name.
    pub fn container_patch(&self, container: &str) -> Json {
        let mut c = serde_json::Map::new();
        c.insert("name".into(), Json::String(container.to_string()));
        let value = match self {
            RolloutChange::Image(image) => Json::String(image.clone()),
            RolloutChange::Env(v) | RolloutChange::Resources(v) => v.clone(),
        };
        c.insert(self.field().into(), value);
        serde_json::json!({ "spec": { "template": { "spec": { "containers": [Json::Object(c)] } } } })
    }
}

/// A manifest ready to submit, plus the coordinates it will live at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descriptor {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub manifest: Json,
}

impl Descriptor {
    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle::new(self.kind, self.namespace.as_deref(), &self.name)
    }
}

/// DNS-1123 compatible generated name, e.g. `strain-3f9a0c1d-77b2`.
pub fn random_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, &id[..8], &id[8..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_scoped_handle_drops_namespace() {
        let h = ResourceHandle::new(ResourceKind::PersistentVolume, Some("ns"), "pv-1");
        assert_eq!(h.namespace, None);
        assert_eq!(h.to_string(), "PersistentVolume pv-1");
        let p = ResourceHandle::new(ResourceKind::Pod, Some("ns"), "p");
        assert_eq!(p.to_string(), "Pod ns/p");
    }

    #[test]
    fn policy_rejects_zero_attempts() {
        assert!(RetryPolicy::new(Duration::ZERO, Duration::from_secs(1), 0).is_err());
        let p = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(2), 3).unwrap();
        assert_eq!(p.max_wait(), Duration::from_secs(7));
    }

    #[test]
    fn deserialized_policy_keeps_attempt_floor() {
        let zero = serde_json::json!({ "prepoll_delay": 0.0, "retries_total": 0, "sleep_time": 1.0 });
        assert!(serde_json::from_value::<RetryPolicy>(zero).is_err());
        let p: RetryPolicy = serde_json::from_value(serde_json::json!({ "retries_total": 4, "sleep_time": 0.5 })).unwrap();
        assert_eq!(p.max_attempts(), 4);
        assert_eq!(p.interval(), Duration::from_millis(500));
        assert_eq!(serde_json::to_value(p).unwrap()["retries_total"], 4);
    }

    #[test]
    fn rollout_change_parses_single_key_map() {
        let c: RolloutChange = serde_json::from_value(serde_json::json!({"image": "nginx:1.25"})).unwrap();
        assert_eq!(c, RolloutChange::Image("nginx:1.25".into()));
        let patch = c.container_patch("web");
        assert_eq!(patch["spec"]["template"]["spec"]["containers"][0]["name"], "web");
        assert_eq!(patch["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.25");
        assert!(serde_json::from_value::<RolloutChange>(serde_json::json!({"image": "a", "env": []})).is_err());
    }

    #[test]
    fn random_names_are_dns_safe() {
        let n = random_name("strain");
        assert!(n.starts_with("strain-"));
        assert_eq!(n.len(), "strain-".len() + 13);
        assert!(n.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_ne!(n, random_name("strain"));
    }

    #[test]
    fn scale_spec_rejects_negative() {
        assert!(ScaleSpec::new(-1, 2).is_err());
        assert!(ScaleSpec::new(0, 0).is_ok());
    }
}
