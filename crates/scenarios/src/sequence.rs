//! Ordered lifecycle transitions over the resources of one run, with
//! best-effort teardown of everything created when a step fails.

use metrics::counter;
use serde::Serialize;
use serde_json::Value as Json;
use strain_core::{Descriptor, Phase, PollOutcome, ResourceHandle, RetryPolicy, RolloutChange, ScaleSpec};
use strain_kubehub::{ClusterApi, ExecOutput};
use strain_ops::{lifecycle, timeline::Stage, LifecycleError};
use tracing::{error, info, warn};

use crate::ScenarioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    /// Nothing created yet.
    Started,
    Created,
    Scaled,
    RolledOut,
    Cleaned,
    Aborted,
}

/// Tracks every handle the run created until it is confirmed deleted.
pub struct Sequence<'a> {
    client: &'a dyn ClusterApi,
    policy: RetryPolicy,
    created: Vec<ResourceHandle>,
    state: SequenceState,
}

impl<'a> Sequence<'a> {
    pub fn new(client: &'a dyn ClusterApi, policy: RetryPolicy) -> Self {
        Self { client, policy, created: Vec::new(), state: SequenceState::Started }
    }

    pub fn state(&self) -> SequenceState { self.state }

    /// Handles created and not yet deleted, oldest first.
    pub fn owned(&self) -> &[ResourceHandle] { &self.created }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }

    /// Create and wait. The handle is owned from the moment the create call
    /// succeeds, so a failed wait still gets it deleted.
    pub async fn create<P>(&mut self, descriptor: &Descriptor, predicate: P) -> Result<ResourceHandle, LifecycleError>
    where
        P: Fn(&Json) -> Phase,
    {
        let handle = self.create_only(descriptor).await?;
        lifecycle::wait_for(self.client, &handle, predicate, &self.policy).await?;
        Ok(handle)
    }

    /// Create without waiting, for objects that only settle once something consumes them.
    pub async fn create_only(&mut self, descriptor: &Descriptor) -> Result<ResourceHandle, LifecycleError> {
        let handle = lifecycle::create(self.client, descriptor).await?;
        self.created.push(handle.clone());
        self.state = SequenceState::Created;
        Ok(handle)
    }

    pub async fn wait_for<P>(&self, handle: &ResourceHandle, predicate: P) -> Result<PollOutcome, LifecycleError>
    where
        P: Fn(&Json) -> Phase,
    {
        lifecycle::wait_for(self.client, handle, predicate, &self.policy).await
    }

    pub async fn scale(&mut self, handle: &ResourceHandle, replicas: i32) -> Result<PollOutcome, LifecycleError> {
        let outcome = lifecycle::scale_and_wait(self.client, handle, replicas, &self.policy).await?;
        self.state = SequenceState::Scaled;
        Ok(outcome)
    }

    /// Scale to the target, then back to the original count.
    pub async fn scale_and_revert(&mut self, handle: &ResourceHandle, spec: ScaleSpec) -> Result<(), LifecycleError> {
        self.scale(handle, spec.target_replicas).await?;
        self.scale(handle, spec.original_replicas).await?;
        Ok(())
    }

    pub async fn rollout(&mut self, handle: &ResourceHandle, change: &RolloutChange) -> Result<PollOutcome, LifecycleError> {
        let outcome = lifecycle::rollout_and_wait(self.client, handle, change, &self.policy).await?;
        self.state = SequenceState::RolledOut;
        Ok(outcome)
    }

    pub async fn exec_check(&self, handle: &ResourceHandle, command: &[String]) -> Result<ExecOutput, LifecycleError> {
        lifecycle::exec_check(self.client, handle, command).await
    }

    /// Current state of an object the run relies on, owned or not.
    pub async fn read(&self, handle: &ResourceHandle) -> Result<Json, LifecycleError> {
        lifecycle::read(self.client, handle).await
    }

    pub async fn pod_timeline(&self, handle: &ResourceHandle) -> Result<Vec<Stage>, LifecycleError> {
        lifecycle::observe_pod_timeline(self.client, handle).await
    }

    /// Delete and wait; the handle is released once its absence is confirmed.
    pub async fn delete(&mut self, handle: &ResourceHandle) -> Result<PollOutcome, LifecycleError> {
        let outcome = lifecycle::delete_and_wait(self.client, handle, &self.policy).await?;
        self.created.retain(|h| h != handle);
        Ok(outcome)
    }

    /// Finish the run. Whatever is still owned is deleted newest first; on
    /// failure every deletion is attempted and the original error is returned
    /// with the cleanup errors attached.
    pub async fn conclude(&mut self, res: Result<(), LifecycleError>) -> Result<(), ScenarioError> {
        if let Err(e) = &res {
            warn!(error = %e, owned = self.created.len(), "step failed; cleaning up");
        }
        let cleanup = self.teardown().await;
        match res {
            Ok(()) if cleanup.is_empty() => {
                self.state = SequenceState::Cleaned;
                info!("sequence finished");
                Ok(())
            }
            Ok(()) => {
                self.state = SequenceState::Aborted;
                Err(ScenarioError::Cleanup(cleanup))
            }
            Err(source) => {
                self.state = SequenceState::Aborted;
                Err(ScenarioError::Aborted { source, cleanup })
            }
        }
    }

    async fn teardown(&mut self) -> Vec<LifecycleError> {
        let mut errors = Vec::new();
        while let Some(handle) = self.created.pop() {
            match lifecycle::delete_and_wait(self.client, &handle, &self.policy).await {
                Ok(_) => info!(%handle, "cleaned up"),
                Err(e) => {
                    error!(%handle, error = %e, "cleanup failed");
                    counter!("strain_cleanup_errors_total", 1u64);
                    errors.push(e);
                }
            }
        }
        errors
    }
}
