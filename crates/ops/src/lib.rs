//! Strain Ops: the bounded poller, per-kind readiness predicates and the
//! lifecycle operations that pair one mutating call with a wait.

#![forbid(unsafe_code)]

use strain_core::{ClusterError, PollOutcome, PollResult, ResourceHandle};
use thiserror::Error;

pub mod lifecycle;
pub mod poller;
pub mod predicates;
pub mod timeline;

pub use lifecycle::{create, create_and_wait, delete_and_wait, exec_check, observe_pod_timeline, read, rollout_and_wait, scale_and_wait, wait_for};
pub use poller::poll;
pub use predicates::Predicate;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{handle} reported failure after {} observations", .outcome.attempts_used)]
    Failed { handle: ResourceHandle, outcome: PollOutcome },
    #[error("{handle} not ready after {} observations ({:?})", .outcome.attempts_used, .outcome.elapsed)]
    TimedOut { handle: ResourceHandle, outcome: PollOutcome },
    /// The object was created but observing it failed; the handle is kept so
    /// the caller can still delete it.
    #[error("waiting on {handle}: {source}")]
    WaitAborted { handle: ResourceHandle, source: ClusterError },
    #[error("{action}: {source}")]
    Cluster { action: &'static str, source: ClusterError },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("check in pod {pod} failed with exit code {exit_code}: {output}")]
    CheckFailed { pod: String, exit_code: i32, output: String },
}

impl LifecycleError {
    pub(crate) fn cluster(action: &'static str) -> impl FnOnce(ClusterError) -> Self {
        move |source| LifecycleError::Cluster { action, source }
    }

    /// Terminal poll outcome carried by the error, if it came from a wait.
    pub fn outcome(&self) -> Option<&PollOutcome> {
        match self {
            LifecycleError::Failed { outcome, .. } | LifecycleError::TimedOut { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// The object a failed wait was about.
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            LifecycleError::Failed { handle, .. } | LifecycleError::TimedOut { handle, .. } | LifecycleError::WaitAborted { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// Map a terminal outcome onto the error taxonomy: only Ready passes.
pub(crate) fn settle(handle: &ResourceHandle, outcome: PollOutcome) -> Result<PollOutcome, LifecycleError> {
    match outcome.result {
        PollResult::Ready => Ok(outcome),
        PollResult::Failed => Err(LifecycleError::Failed { handle: handle.clone(), outcome }),
        PollResult::TimedOut => Err(LifecycleError::TimedOut { handle: handle.clone(), outcome }),
    }
}
