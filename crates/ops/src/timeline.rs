//! Pod condition timeline: how long a pod spent between its condition transitions.

use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::Serialize;
use serde_json::Value as Json;

/// One stage bounded by two condition transitions.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stage {
    pub name: &'static str,
    pub seconds: f64,
}

/// (stage, opening condition, closing condition)
const STAGES: &[(&str, &str, &str)] = &[
    ("scheduled", "PodScheduled", "Initialized"),
    ("initialized", "Initialized", "Ready"),
    ("ready", "Ready", "ContainersReady"),
    ("total", "PodScheduled", "ContainersReady"),
];

fn transition(conditions: &[Json], kind: &str) -> Option<DateTime<Utc>> {
    let c = conditions.iter().find(|c| c["type"] == kind)?;
    let ts = c["lastTransitionTime"].as_str()?;
    DateTime::parse_from_rfc3339(ts).ok().map(|t| t.with_timezone(&Utc))
}

/// Stages whose both ends are present in `status.conditions`. Timestamps have
/// second resolution, so stages may be zero or slightly negative.
pub fn pod_timeline(raw: &Json) -> Vec<Stage> {
    let Some(conditions) = raw["status"]["conditions"].as_array() else { return Vec::new() };
    STAGES
        .iter()
        .filter_map(|&(name, from, to)| {
            let start = transition(conditions, from)?;
            let end = transition(conditions, to)?;
            Some(Stage { name, seconds: (end - start).num_milliseconds() as f64 / 1000.0 })
        })
        .collect()
}

pub fn record(stages: &[Stage]) {
    for s in stages {
        histogram!("strain_pod_condition_seconds", s.seconds, "stage" => s.name);
    }
}
