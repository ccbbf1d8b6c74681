//! Strain scenarios: fixed chains of lifecycle operations run against one
//! namespace, with every created resource torn down even when a step fails.
//!
//! A run reports exactly one [`Verdict`]; timing is left to the caller.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use strain_ops::LifecycleError;
use thiserror::Error;

pub mod catalogue;
pub mod sequence;
mod services;
mod storage;
mod workloads;

pub use catalogue::ScenarioSpec;
pub use sequence::{Sequence, SequenceState};

/// What the namespace provisioner hands a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunContext {
    pub namespace: String,
    #[serde(default)]
    pub service_account: Option<String>,
}

impl RunContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), service_account: None }
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A step failed; the original error, plus any errors hit while tearing down.
    #[error("{source} ({} cleanup errors)", .cleanup.len())]
    Aborted { source: LifecycleError, cleanup: Vec<LifecycleError> },
    /// Every step passed but leftover resources could not be deleted.
    #[error("cleanup failed for {} resources", .0.len())]
    Cleanup(Vec<LifecycleError>),
    #[error("invalid scenario arguments: {0}")]
    InvalidArgs(String),
}

impl ScenarioError {
    pub fn cleanup_errors(&self) -> &[LifecycleError] {
        match self {
            ScenarioError::Aborted { cleanup, .. } => cleanup,
            ScenarioError::Cleanup(errors) => errors,
            ScenarioError::InvalidArgs(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failed,
    TimedOut,
    Error,
}

impl Verdict {
    pub fn of(res: &Result<(), ScenarioError>) -> Self {
        match res {
            Ok(()) => Verdict::Success,
            Err(ScenarioError::Aborted { source: LifecycleError::Failed { .. } | LifecycleError::CheckFailed { .. }, .. }) => Verdict::Failed,
            Err(ScenarioError::Aborted { source: LifecycleError::TimedOut { .. }, .. }) => Verdict::TimedOut,
            Err(_) => Verdict::Error,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { Verdict::Success => "success", Verdict::Failed => "failed", Verdict::TimedOut => "timed_out", Verdict::Error => "error" })
    }
}
