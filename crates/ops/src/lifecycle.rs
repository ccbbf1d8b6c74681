//! Named transitions: one mutating call followed by a bounded wait.
//!
//! Every function takes the cluster as `&dyn ClusterApi` and the caller's
//! [`RetryPolicy`]; none keeps state between calls. A Failed or TimedOut wait
//! is returned as an error carrying the handle, so callers can still clean up.

use std::time::Instant;

use metrics::histogram;
use serde_json::{json, Value as Json};
use strain_core::{ClusterError, Descriptor, Phase, PollOutcome, ResourceHandle, ResourceKind, RetryPolicy, RolloutChange};
use strain_kubehub::{ClusterApi, ExecOutput};
use tracing::{debug, info};

use crate::{poller::poll, predicates, settle, timeline, LifecycleError};

fn record_action(action: &'static str, started: Instant) {
    histogram!("strain_action_ms", started.elapsed().as_secs_f64() * 1000.0, "action" => action);
}

/// Submit a descriptor without waiting. A name collision is propagated, never retried.
pub async fn create(client: &dyn ClusterApi, descriptor: &Descriptor) -> Result<ResourceHandle, LifecycleError> {
    let started = Instant::now();
    info!(kind = %descriptor.kind, ns = ?descriptor.namespace, name = %descriptor.name, "create");
    let handle = client.create(descriptor).await.map_err(LifecycleError::cluster("create"))?;
    record_action("create", started);
    Ok(handle)
}

/// Poll `handle` until `predicate` holds.
pub async fn wait_for<P>(client: &dyn ClusterApi, handle: &ResourceHandle, predicate: P, policy: &RetryPolicy) -> Result<PollOutcome, LifecycleError>
where
    P: Fn(&Json) -> Phase,
{
    debug!(%handle, max_attempts = policy.max_attempts(), "waiting");
    let outcome = poll(|| client.get(handle), predicate, policy, false)
        .await
        .map_err(|source| LifecycleError::WaitAborted { handle: handle.clone(), source })?;
    settle(handle, outcome)
}

/// Current state of an object that must exist.
pub async fn read(client: &dyn ClusterApi, handle: &ResourceHandle) -> Result<Json, LifecycleError> {
    client
        .get(handle)
        .await
        .map_err(LifecycleError::cluster("read"))?
        .ok_or_else(|| LifecycleError::Cluster { action: "read", source: ClusterError::NotFound(handle.to_string()) })
}

/// Create, then wait. Every error past the create call carries the handle
/// (see [`LifecycleError::handle`]).
pub async fn create_and_wait<P>(
    client: &dyn ClusterApi,
    descriptor: &Descriptor,
    predicate: P,
    policy: &RetryPolicy,
) -> Result<(ResourceHandle, PollOutcome), LifecycleError>
where
    P: Fn(&Json) -> Phase,
{
    let started = Instant::now();
    let handle = create(client, descriptor).await?;
    let res = wait_for(client, &handle, predicate, policy).await;
    record_action("create_and_wait", started);
    res.map(|outcome| (handle, outcome))
}

/// Patch the replica count and wait until the observed count matches and every replica is ready.
pub async fn scale_and_wait(client: &dyn ClusterApi, handle: &ResourceHandle, target: i32, policy: &RetryPolicy) -> Result<PollOutcome, LifecycleError> {
    if !handle.kind.scalable() {
        return Err(LifecycleError::InvalidArgument(format!("{} has no replica count", handle.kind)));
    }
    if target < 0 {
        return Err(LifecycleError::InvalidArgument(format!("negative replica count {}", target)));
    }
    let started = Instant::now();
    info!(%handle, replicas = target, "scale");
    client.patch(handle, &json!({ "spec": { "replicas": target } })).await.map_err(LifecycleError::cluster("scale"))?;
    let res = wait_for(client, handle, predicates::scaled_to(target), policy).await;
    record_action("scale_and_wait", started);
    res
}

/// Apply `change` to the first container of the pod template and wait until
/// the generation it produced is fully rolled out.
pub async fn rollout_and_wait(client: &dyn ClusterApi, handle: &ResourceHandle, change: &RolloutChange, policy: &RetryPolicy) -> Result<PollOutcome, LifecycleError> {
    if !handle.kind.scalable() {
        return Err(LifecycleError::InvalidArgument(format!("{} has no rolling pod template", handle.kind)));
    }
    let started = Instant::now();
    let current = read(client, handle).await?;
    let container = current["spec"]["template"]["spec"]["containers"][0]["name"]
        .as_str()
        .ok_or_else(|| LifecycleError::InvalidArgument(format!("{} has no containers in its template", handle)))?;
    info!(%handle, field = change.field(), container, "rollout");
    let patched = client.patch(handle, &change.container_patch(container)).await.map_err(LifecycleError::cluster("rollout"))?;
    let applied_generation = patched["metadata"]["generation"].as_i64().ok_or_else(|| LifecycleError::Cluster {
        action: "rollout",
        source: ClusterError::Invalid(format!("patch response for {} carries no metadata.generation", handle)),
    })?;
    debug!(%handle, applied_generation, "rollout patch accepted");
    let res = wait_for(client, handle, predicates::rolled_out(applied_generation), policy).await;
    record_action("rollout_and_wait", started);
    res
}

/// Delete and wait until the object is gone. Deleting an absent object is success.
pub async fn delete_and_wait(client: &dyn ClusterApi, handle: &ResourceHandle, policy: &RetryPolicy) -> Result<PollOutcome, LifecycleError> {
    let started = Instant::now();
    info!(%handle, "delete");
    match client.delete(handle).await {
        Ok(()) => {}
        Err(ClusterError::NotFound(_)) => debug!(%handle, "already absent"),
        Err(e) => return Err(LifecycleError::Cluster { action: "delete", source: e }),
    }
    let outcome = poll(|| client.get(handle), |_| Phase::Pending, policy, true).await.map_err(LifecycleError::cluster("delete"))?;
    record_action("delete_and_wait", started);
    settle(handle, outcome)
}

/// Run `command` in a pod. A non-zero exit code or an "exec failed" message is a failed check.
pub async fn exec_check(client: &dyn ClusterApi, handle: &ResourceHandle, command: &[String]) -> Result<ExecOutput, LifecycleError> {
    let Some(namespace) = handle.namespace.as_deref().filter(|_| handle.kind == ResourceKind::Pod) else {
        return Err(LifecycleError::InvalidArgument(format!("exec needs a namespaced pod, got {}", handle)));
    };
    if command.is_empty() {
        return Err(LifecycleError::InvalidArgument("empty check command".into()));
    }
    let started = Instant::now();
    info!(%handle, ?command, "exec check");
    let out = client.exec(namespace, &handle.name, command).await.map_err(LifecycleError::cluster("exec"))?;
    record_action("exec_check", started);
    if out.exit_code != 0 || out.stdout.contains("exec failed") || out.stderr.contains("exec failed") {
        let output = if out.stderr.is_empty() { out.stdout.clone() } else { out.stderr.clone() };
        return Err(LifecycleError::CheckFailed { pod: handle.to_string(), exit_code: out.exit_code, output });
    }
    Ok(out)
}

/// Read a ready pod's condition transitions and report them as stage durations.
pub async fn observe_pod_timeline(client: &dyn ClusterApi, handle: &ResourceHandle) -> Result<Vec<timeline::Stage>, LifecycleError> {
    let raw = read(client, handle).await?;
    let stages = timeline::pod_timeline(&raw);
    timeline::record(&stages);
    Ok(stages)
}
