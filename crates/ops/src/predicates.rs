//! Per-kind readiness predicates: pure mappings from a raw object to a [`Phase`].
//!
//! Only explicit failure states terminate early. Anything unrecognised or
//! transitional is Pending and left to the attempt budget. Replica-count kinds
//! never report Failed; lack of progress there surfaces as a timeout.

use serde_json::Value as Json;
use strain_core::{Phase, ResourceKind};

pub type Predicate = fn(&Json) -> Phase;

/// Container waiting reasons that will not resolve on their own.
const FATAL_WAITING: &[&str] = &["CrashLoopBackOff", "CreateContainerError", "CreateContainerConfigError", "InvalidImageName"];

/// Creation readiness for each kind.
pub fn for_kind(kind: ResourceKind) -> Predicate {
    match kind {
        ResourceKind::Namespace => namespace,
        ResourceKind::Pod => pod,
        ResourceKind::ReplicationController | ResourceKind::ReplicaSet | ResourceKind::Deployment | ResourceKind::StatefulSet => replicas,
        ResourceKind::DaemonSet => daemon_set,
        ResourceKind::Job => job,
        ResourceKind::PersistentVolume => persistent_volume,
        ResourceKind::PersistentVolumeClaim => persistent_volume_claim,
        ResourceKind::Endpoints => endpoints,
        ResourceKind::StorageClass | ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::ServiceAccount | ResourceKind::Service => exists,
    }
}

fn phase_str(raw: &Json) -> Option<&str> { raw["status"]["phase"].as_str() }

fn int(v: &Json) -> Option<i64> { v.as_i64() }

pub fn exists(_raw: &Json) -> Phase { Phase::Ready }

pub fn namespace(raw: &Json) -> Phase {
    match phase_str(raw) {
        Some("Active") => Phase::Ready,
        _ => Phase::Pending,
    }
}

pub fn pod(raw: &Json) -> Phase {
    let status = &raw["status"];
    if status["phase"] == "Failed" {
        return Phase::Failed;
    }
    let containers = status["containerStatuses"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let fatal = containers.iter().any(|c| c["state"]["waiting"]["reason"].as_str().map(|r| FATAL_WAITING.contains(&r)).unwrap_or(false));
    if fatal {
        return Phase::Failed;
    }
    if status["phase"] == "Running" && !containers.is_empty() && containers.iter().all(|c| c["ready"] == true) {
        Phase::Ready
    } else {
        Phase::Pending
    }
}

/// True once the controller has seen the latest spec. Missing
/// `observedGeneration` means it has not reported yet.
fn generation_observed(raw: &Json, at_least: i64) -> bool {
    int(&raw["status"]["observedGeneration"]).map(|g| g >= at_least).unwrap_or(false)
}

fn desired_replicas(raw: &Json) -> i64 { int(&raw["spec"]["replicas"]).unwrap_or(1) }

/// Zero counts are omitted by the API server.
fn count(raw: &Json, field: &str) -> i64 { int(&raw["status"][field]).unwrap_or(0) }

fn replicas_match(raw: &Json, target: i64) -> bool {
    desired_replicas(raw) == target && count(raw, "readyReplicas") == target && count(raw, "replicas") == target
}

/// Replica-count readiness against the object's own `spec.replicas`.
pub fn replicas(raw: &Json) -> Phase {
    scaled_to(desired_replicas(raw) as i32)(raw)
}

/// Replica-count readiness against an explicit target, for scale waits.
pub fn scaled_to(target: i32) -> impl Fn(&Json) -> Phase {
    move |raw: &Json| {
        let generation = int(&raw["metadata"]["generation"]).unwrap_or(1);
        if generation_observed(raw, generation) && replicas_match(raw, target as i64) {
            Phase::Ready
        } else {
            Phase::Pending
        }
    }
}

/// The generation produced by a template patch is fully rolled out.
pub fn rolled_out(applied_generation: i64) -> impl Fn(&Json) -> Phase {
    move |raw: &Json| {
        let desired = desired_replicas(raw);
        let updated_ok = !tracks_updates(raw) || count(raw, "updatedReplicas") == desired;
        if generation_observed(raw, applied_generation) && replicas_match(raw, desired) && updated_ok {
            Phase::Ready
        } else {
            Phase::Pending
        }
    }
}

/// Deployments and StatefulSets report `updatedReplicas`; older controllers do not.
fn tracks_updates(raw: &Json) -> bool {
    matches!(raw["kind"].as_str(), Some("Deployment") | Some("StatefulSet"))
}

pub fn daemon_set(raw: &Json) -> Phase {
    let status = &raw["status"];
    let generation = int(&raw["metadata"]["generation"]).unwrap_or(1);
    let Some(desired) = int(&status["desiredNumberScheduled"]) else { return Phase::Pending };
    let ready = int(&status["numberReady"]).unwrap_or(0);
    let updated = int(&status["updatedNumberScheduled"]).unwrap_or(0);
    if generation_observed(raw, generation) && ready == desired && updated == desired {
        Phase::Ready
    } else {
        Phase::Pending
    }
}

pub fn job(raw: &Json) -> Phase {
    let failed = raw["status"]["conditions"]
        .as_array()
        .map(|cs| cs.iter().any(|c| c["type"] == "Failed" && c["status"] == "True"))
        .unwrap_or(false);
    if failed {
        return Phase::Failed;
    }
    let completions = int(&raw["spec"]["completions"]).unwrap_or(1);
    if count(raw, "succeeded") >= completions {
        Phase::Ready
    } else {
        Phase::Pending
    }
}

pub fn persistent_volume(raw: &Json) -> Phase {
    match phase_str(raw) {
        Some("Bound") => Phase::Ready,
        Some("Failed") => Phase::Failed,
        _ => Phase::Pending,
    }
}

/// A fresh PV is usable once it is Available; it only binds when a claim consumes it.
pub fn persistent_volume_available(raw: &Json) -> Phase {
    match phase_str(raw) {
        Some("Available") | Some("Bound") => Phase::Ready,
        Some("Failed") => Phase::Failed,
        _ => Phase::Pending,
    }
}

pub fn persistent_volume_claim(raw: &Json) -> Phase {
    match phase_str(raw) {
        Some("Bound") => Phase::Ready,
        Some("Failed") => Phase::Failed,
        _ => Phase::Pending,
    }
}

/// At least one address is published. Endpoints never fail on their own.
pub fn endpoints(raw: &Json) -> Phase {
    let published = raw["subsets"]
        .as_array()
        .map(|ss| ss.iter().any(|s| s["addresses"].as_array().map(|a| !a.is_empty()).unwrap_or(false)))
        .unwrap_or(false);
    if published { Phase::Ready } else { Phase::Pending }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_pod(ready: bool) -> Json {
        json!({ "status": { "phase": "Running", "containerStatuses": [{ "name": "c", "ready": ready }] } })
    }

    #[test]
    fn pod_ready_requires_all_containers() {
        assert_eq!(pod(&running_pod(true)), Phase::Ready);
        assert_eq!(pod(&running_pod(false)), Phase::Pending);
        let mixed = json!({ "status": { "phase": "Running", "containerStatuses": [{ "ready": true }, { "ready": false }] } });
        assert_eq!(pod(&mixed), Phase::Pending);
        assert_eq!(pod(&json!({ "status": { "phase": "Running" } })), Phase::Pending);
        assert_eq!(pod(&json!({})), Phase::Pending);
    }

    #[test]
    fn pod_failure_states() {
        assert_eq!(pod(&json!({ "status": { "phase": "Failed" } })), Phase::Failed);
        let crash = json!({ "status": { "phase": "Running", "containerStatuses": [{ "ready": false, "state": { "waiting": { "reason": "CrashLoopBackOff" } } }] } });
        assert_eq!(pod(&crash), Phase::Failed);
        let pulling = json!({ "status": { "phase": "Pending", "containerStatuses": [{ "ready": false, "state": { "waiting": { "reason": "ImagePullBackOff" } } }] } });
        assert_eq!(pod(&pulling), Phase::Pending);
        assert_eq!(pod(&json!({ "status": { "phase": "Unknown" } })), Phase::Pending);
    }

    #[test]
    fn replicas_wait_for_observed_generation() {
        let stale = json!({ "metadata": { "generation": 2 }, "spec": { "replicas": 3 }, "status": { "observedGeneration": 1, "replicas": 3, "readyReplicas": 3 } });
        assert_eq!(replicas(&stale), Phase::Pending);
        let fresh = json!({ "metadata": { "generation": 2 }, "spec": { "replicas": 3 }, "status": { "observedGeneration": 2, "replicas": 3, "readyReplicas": 3 } });
        assert_eq!(replicas(&fresh), Phase::Ready);
        let unreported = json!({ "metadata": { "generation": 1 }, "spec": { "replicas": 3 }, "status": {} });
        assert_eq!(replicas(&unreported), Phase::Pending);
    }

    #[test]
    fn scaled_to_zero_accepts_omitted_counts() {
        let zero = json!({ "metadata": { "generation": 3 }, "spec": { "replicas": 0 }, "status": { "observedGeneration": 3, "replicas": 0 } });
        assert_eq!(scaled_to(0)(&zero), Phase::Ready);
        assert_eq!(scaled_to(2)(&zero), Phase::Pending);
        let draining = json!({ "metadata": { "generation": 3 }, "spec": { "replicas": 1 }, "status": { "observedGeneration": 3, "replicas": 2, "readyReplicas": 1 } });
        assert_eq!(scaled_to(1)(&draining), Phase::Pending);
    }

    #[test]
    fn replica_kinds_never_fail() {
        let stuck = json!({ "metadata": { "generation": 1 }, "spec": { "replicas": 2 }, "status": { "observedGeneration": 1, "replicas": 2, "readyReplicas": 0, "conditions": [{ "type": "ReplicaFailure", "status": "True" }] } });
        for kind in [ResourceKind::ReplicationController, ResourceKind::ReplicaSet, ResourceKind::Deployment, ResourceKind::StatefulSet] {
            assert_eq!(for_kind(kind)(&stuck), Phase::Pending);
        }
    }

    #[test]
    fn rollout_needs_applied_generation_and_updated_replicas() {
        let check = rolled_out(4);
        let old = json!({ "kind": "Deployment", "spec": { "replicas": 2 }, "status": { "observedGeneration": 3, "replicas": 2, "readyReplicas": 2, "updatedReplicas": 2 } });
        assert_eq!(check(&old), Phase::Pending);
        let surging = json!({ "kind": "Deployment", "spec": { "replicas": 2 }, "status": { "observedGeneration": 4, "replicas": 3, "readyReplicas": 2, "updatedReplicas": 1 } });
        assert_eq!(check(&surging), Phase::Pending);
        let partial = json!({ "kind": "Deployment", "spec": { "replicas": 2 }, "status": { "observedGeneration": 4, "replicas": 2, "readyReplicas": 2, "updatedReplicas": 1 } });
        assert_eq!(check(&partial), Phase::Pending);
        let unreported = json!({ "kind": "Deployment", "spec": { "replicas": 2 }, "status": { "observedGeneration": 4, "replicas": 2, "readyReplicas": 2 } });
        assert_eq!(check(&unreported), Phase::Pending);
        let done = json!({ "kind": "Deployment", "spec": { "replicas": 2 }, "status": { "observedGeneration": 4, "replicas": 2, "readyReplicas": 2, "updatedReplicas": 2 } });
        assert_eq!(check(&done), Phase::Ready);
        let rc = json!({ "kind": "ReplicationController", "spec": { "replicas": 2 }, "status": { "observedGeneration": 4, "replicas": 2, "readyReplicas": 2 } });
        assert_eq!(check(&rc), Phase::Ready);
    }

    #[test]
    fn daemon_set_and_job() {
        let ds = json!({ "metadata": { "generation": 1 }, "status": { "observedGeneration": 1, "desiredNumberScheduled": 2, "numberReady": 2, "updatedNumberScheduled": 2 } });
        assert_eq!(daemon_set(&ds), Phase::Ready);
        let behind = json!({ "metadata": { "generation": 1 }, "status": { "observedGeneration": 1, "desiredNumberScheduled": 2, "numberReady": 1, "updatedNumberScheduled": 2 } });
        assert_eq!(daemon_set(&behind), Phase::Pending);
        assert_eq!(daemon_set(&json!({ "status": {} })), Phase::Pending);

        assert_eq!(job(&json!({ "spec": { "completions": 2 }, "status": { "succeeded": 1 } })), Phase::Pending);
        assert_eq!(job(&json!({ "spec": { "completions": 2 }, "status": { "succeeded": 2 } })), Phase::Ready);
        assert_eq!(job(&json!({ "spec": {}, "status": { "succeeded": 1 } })), Phase::Ready);
        let failed = json!({ "spec": {}, "status": { "conditions": [{ "type": "Failed", "status": "True" }] } });
        assert_eq!(job(&failed), Phase::Failed);
    }

    #[test]
    fn phase_based_kinds() {
        assert_eq!(namespace(&json!({ "status": { "phase": "Active" } })), Phase::Ready);
        assert_eq!(namespace(&json!({ "status": { "phase": "Terminating" } })), Phase::Pending);

        let available = json!({ "status": { "phase": "Available" } });
        assert_eq!(persistent_volume(&available), Phase::Pending);
        assert_eq!(persistent_volume_available(&available), Phase::Ready);
        assert_eq!(persistent_volume(&json!({ "status": { "phase": "Bound" } })), Phase::Ready);
        assert_eq!(persistent_volume(&json!({ "status": { "phase": "Failed" } })), Phase::Failed);
        assert_eq!(persistent_volume(&json!({ "status": { "phase": "Released" } })), Phase::Pending);

        assert_eq!(persistent_volume_claim(&json!({ "status": { "phase": "Pending" } })), Phase::Pending);
        assert_eq!(persistent_volume_claim(&json!({ "status": { "phase": "Bound" } })), Phase::Ready);
        assert_eq!(persistent_volume_claim(&json!({ "status": { "phase": "Failed" } })), Phase::Failed);
    }

    #[test]
    fn existence_kinds_are_ready_when_observed() {
        for kind in [ResourceKind::ConfigMap, ResourceKind::Secret, ResourceKind::ServiceAccount, ResourceKind::StorageClass, ResourceKind::Service] {
            assert_eq!(for_kind(kind)(&json!({})), Phase::Ready);
        }
    }

    #[test]
    fn endpoints_need_an_address() {
        assert_eq!(endpoints(&json!({})), Phase::Pending);
        assert_eq!(endpoints(&json!({ "subsets": [] })), Phase::Pending);
        assert_eq!(endpoints(&json!({ "subsets": [{ "notReadyAddresses": [{ "ip": "10.0.0.1" }] }] })), Phase::Pending);
        let ready = json!({ "subsets": [{ "addresses": [{ "ip": "10.0.0.1" }], "ports": [{ "port": 80 }] }] });
        assert_eq!(for_kind(ResourceKind::Endpoints)(&ready), Phase::Ready);
    }
}
