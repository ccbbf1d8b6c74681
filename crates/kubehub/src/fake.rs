//! In-memory API server for tests.
//!
//! Objects converge to a ready status after a configurable number of stale
//! reads, the way controllers catch up after a write. Individual objects can be
//! told to stall, crash or fail, and mutations can be rejected, so every
//! terminal path of the poller can be driven deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value as Json};
use strain_core::{ClusterError, Descriptor, ResourceHandle, ResourceKind};
use uuid::Uuid;

use crate::{ClusterApi, ExecOutput};

/// Per-object fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    /// Status never converges.
    Stall,
    /// Pod container waits in `CrashLoopBackOff`.
    Crash,
    /// Status reports the kind's explicit failure (`phase: Failed`, Job `Failed` condition).
    Fail,
    /// Patch calls return a 422.
    RejectPatch,
    /// Delete calls return a 500.
    RejectDelete,
    /// Get calls return a 500.
    RejectRead,
}

/// Journal entry for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ResourceHandle),
    Get(ResourceHandle),
    Patch(ResourceHandle),
    Delete(ResourceHandle),
    Exec { namespace: String, pod: String, command: Vec<String> },
}

struct FakeObject {
    raw: Json,
    stale_reads: u32,
    deleting: bool,
    /// Creation order; seeds the addresses handed out to pods and services.
    ordinal: u64,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<ResourceHandle, FakeObject>,
    lag: u32,
    behaviors: HashSet<(ResourceKind, String, Behavior)>,
    exec_results: VecDeque<ExecOutput>,
    journal: Vec<Call>,
    next_rv: u64,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self { Self::default() }

    /// Number of stale reads after every create/patch/delete before the change is observed.
    pub fn with_lag(self, lag: u32) -> Self {
        self.lock().lag = lag;
        self
    }

    pub fn with_behavior(self, kind: ResourceKind, name: &str, behavior: Behavior) -> Self {
        self.lock().behaviors.insert((kind, name.to_string(), behavior));
        self
    }

    /// Queue the output of the next exec call; without one, exec succeeds with empty output.
    pub fn with_exec_result(self, out: ExecOutput) -> Self {
        self.lock().exec_results.push_back(out);
        self
    }

    pub fn set_behavior(&self, kind: ResourceKind, name: &str, behavior: Behavior) {
        self.lock().behaviors.insert((kind, name.to_string(), behavior));
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().journal.clone() }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().journal.iter().filter(|c| pred(c)).count()
    }

    pub fn exists(&self, handle: &ResourceHandle) -> bool { self.lock().objects.contains_key(handle) }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.lock().objects.is_empty() }

    /// Raw stored object without advancing convergence.
    pub fn peek(&self, handle: &ResourceHandle) -> Option<Json> { self.lock().objects.get(handle).map(|o| o.raw.clone()) }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FakeState {
    fn has(&self, handle: &ResourceHandle, b: Behavior) -> bool {
        self.behaviors.contains(&(handle.kind, handle.name.clone(), b))
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    /// A PVC binds once some pod in its namespace mounts it.
    fn claim_consumed(&self, handle: &ResourceHandle) -> bool {
        self.objects.iter().any(|(h, o)| {
            h.kind == ResourceKind::Pod
                && h.namespace == handle.namespace
                && o.raw["spec"]["volumes"]
                    .as_array()
                    .map(|vs| vs.iter().any(|v| v["persistentVolumeClaim"]["claimName"] == handle.name.as_str()))
                    .unwrap_or(false)
        })
    }

    fn class_bound(&self, storage_class: &Json) -> bool {
        self.objects.iter().any(|(h, o)| {
            h.kind == ResourceKind::PersistentVolumeClaim && o.raw["spec"]["storageClassName"] == *storage_class && o.raw["status"]["phase"] == "Bound"
        })
    }

    /// Ready pods matching the selector of the same-named service. `None`
    /// when there is no such service or it has no selector.
    fn endpoint_subsets(&self, handle: &ResourceHandle) -> Option<Json> {
        let svc = self.objects.get(&ResourceHandle::new(ResourceKind::Service, handle.namespace.as_deref(), &handle.name))?;
        let selector = svc.raw["spec"]["selector"].as_object()?;
        let addresses: Vec<Json> = self
            .objects
            .iter()
            .filter(|(h, o)| {
                h.kind == ResourceKind::Pod
                    && h.namespace == handle.namespace
                    && !o.deleting
                    && o.raw["status"]["phase"] == "Running"
                    && selector.iter().all(|(k, v)| o.raw["metadata"]["labels"][k] == *v)
            })
            .filter_map(|(_, o)| o.raw["status"]["podIP"].as_str().map(|ip| json!({ "ip": ip })))
            .collect();
        if addresses.is_empty() {
            return Some(json!([]));
        }
        let ports: Vec<Json> = svc.raw["spec"]["ports"]
            .as_array()
            .map(|ps| ps.iter().map(|p| json!({ "name": p["name"], "port": p.get("targetPort").unwrap_or(&p["port"]), "protocol": p["protocol"] })).collect())
            .unwrap_or_default();
        Some(json!([{ "addresses": addresses, "ports": ports }]))
    }

    fn converged_status(&self, handle: &ResourceHandle, raw: &Json, ordinal: u64) -> Option<Json> {
        let generation = raw["metadata"]["generation"].as_i64().unwrap_or(1);
        let failing = self.has(handle, Behavior::Fail);
        let status = match handle.kind {
            ResourceKind::Namespace => json!({ "phase": "Active" }),
            ResourceKind::Pod => {
                let containers = raw["spec"]["containers"].as_array().cloned().unwrap_or_default();
                if failing {
                    json!({ "phase": "Failed" })
                } else if self.has(handle, Behavior::Crash) {
                    let statuses: Vec<Json> = containers
                        .iter()
                        .map(|c| json!({ "name": c["name"], "ready": false, "restartCount": 3, "state": { "waiting": { "reason": "CrashLoopBackOff" } } }))
                        .collect();
                    json!({ "phase": "Running", "containerStatuses": statuses })
                } else {
                    let now = chrono::Utc::now().to_rfc3339();
                    let statuses: Vec<Json> =
                        containers.iter().map(|c| json!({ "name": c["name"], "ready": true, "state": { "running": { "startedAt": now } } })).collect();
                    let conditions: Vec<Json> = ["PodScheduled", "Initialized", "ContainersReady", "Ready"]
                        .iter()
                        .map(|t| json!({ "type": t, "status": "True", "lastTransitionTime": now }))
                        .collect();
                    json!({
                        "phase": "Running",
                        "containerStatuses": statuses,
                        "conditions": conditions,
                        "podIP": format!("10.244.{}.{}", ordinal / 250, ordinal % 250 + 1),
                        "hostIP": "172.18.0.2",
                    })
                }
            }
            ResourceKind::ReplicationController | ResourceKind::ReplicaSet | ResourceKind::Deployment | ResourceKind::StatefulSet => {
                let r = raw["spec"]["replicas"].as_i64().unwrap_or(1);
                let mut s = json!({ "replicas": r, "observedGeneration": generation });
                // The API server omits zero counts.
                if r > 0 {
                    s["readyReplicas"] = json!(r);
                    s["availableReplicas"] = json!(r);
                    s["updatedReplicas"] = json!(r);
                }
                s
            }
            ResourceKind::DaemonSet => json!({
                "desiredNumberScheduled": 1, "currentNumberScheduled": 1, "numberReady": 1, "updatedNumberScheduled": 1, "observedGeneration": generation,
            }),
            ResourceKind::Job => {
                if failing {
                    json!({ "failed": 1, "conditions": [{ "type": "Failed", "status": "True", "reason": "BackoffLimitExceeded" }] })
                } else {
                    let c = raw["spec"]["completions"].as_i64().unwrap_or(1);
                    json!({ "succeeded": c, "conditions": [{ "type": "Complete", "status": "True" }] })
                }
            }
            ResourceKind::PersistentVolumeClaim => {
                if failing { json!({ "phase": "Failed" }) } else if self.claim_consumed(handle) { json!({ "phase": "Bound" }) } else { json!({ "phase": "Pending" }) }
            }
            ResourceKind::PersistentVolume => {
                if failing {
                    json!({ "phase": "Failed" })
                } else if self.class_bound(&raw["spec"]["storageClassName"]) {
                    json!({ "phase": "Bound" })
                } else {
                    json!({ "phase": "Available" })
                }
            }
            ResourceKind::Service => json!({ "loadBalancer": {} }),
            ResourceKind::StorageClass | ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::ServiceAccount | ResourceKind::Endpoints => return None,
        };
        Some(status)
    }
}

/// Cluster IP and, for `NodePort` services, a node port per service port.
fn allocate_service(raw: &mut Json, ordinal: u64) {
    raw["spec"]["clusterIP"] = Json::String(format!("10.96.{}.{}", ordinal / 250, ordinal % 250 + 1));
    if raw["spec"]["type"] != "NodePort" {
        return;
    }
    if let Some(ports) = raw["spec"]["ports"].as_array_mut() {
        for (i, p) in ports.iter_mut().enumerate() {
            p["nodePort"] = json!(30000 + (ordinal * 8 + i as u64) % 2768);
        }
    }
}

/// Strategic-merge approximation: lists of named objects merge by `name`, other lists replace.
fn merge(dst: &mut Json, patch: &Json) {
    match (dst, patch) {
        (Json::Object(d), Json::Object(p)) => {
            for (k, pv) in p {
                if pv.is_null() {
                    d.remove(k);
                } else {
                    merge(d.entry(k.clone()).or_insert(Json::Null), pv);
                }
            }
        }
        (Json::Array(d), Json::Array(p)) if p.iter().all(|v| v.get("name").is_some()) => {
            for pv in p {
                match d.iter_mut().find(|dv| dv.get("name") == pv.get("name")) {
                    Some(dv) => merge(dv, pv),
                    None => d.push(pv.clone()),
                }
            }
        }
        (d, p) => *d = p.clone(),
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn create(&self, descriptor: &Descriptor) -> Result<ResourceHandle, ClusterError> {
        let handle = descriptor.handle();
        let mut st = self.lock();
        st.journal.push(Call::Create(handle.clone()));
        if st.objects.contains_key(&handle) {
            return Err(ClusterError::AlreadyExists(handle.to_string()));
        }
        if let Some(ns) = &handle.namespace {
            let ns_handle = ResourceHandle::new(ResourceKind::Namespace, None, ns);
            let ns_live = st.objects.get(&ns_handle).map(|o| !o.deleting);
            // Namespaces are only enforced once the test created one.
            if ns_live == Some(false) {
                return Err(ClusterError::Api { code: 403, reason: "Forbidden".into(), message: format!("namespace {} is being terminated", ns) });
            }
        }
        let mut raw = descriptor.manifest.clone();
        let rv = st.bump_rv();
        let ordinal = st.next_rv;
        if let Some(meta) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert("uid".into(), Json::String(Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), json!(1));
            meta.insert("creationTimestamp".into(), Json::String(chrono::Utc::now().to_rfc3339()));
        }
        let lag = st.lag;
        if handle.kind == ResourceKind::Service {
            allocate_service(&mut raw, ordinal);
            if raw["spec"]["selector"].is_object() {
                let ep = ResourceHandle::new(ResourceKind::Endpoints, handle.namespace.as_deref(), &handle.name);
                let ep_raw = json!({ "apiVersion": "v1", "kind": "Endpoints", "metadata": { "name": handle.name, "namespace": handle.namespace } });
                st.objects.entry(ep).or_insert(FakeObject { raw: ep_raw, stale_reads: lag, deleting: false, ordinal });
            }
        }
        st.objects.insert(handle.clone(), FakeObject { raw, stale_reads: lag, deleting: false, ordinal });
        Ok(handle)
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Option<Json>, ClusterError> {
        let mut st = self.lock();
        st.journal.push(Call::Get(handle.clone()));
        if st.has(handle, Behavior::RejectRead) {
            return Err(ClusterError::Api { code: 500, reason: "InternalError".into(), message: format!("read failed for {}", handle) });
        }
        let Some(obj) = st.objects.get_mut(handle) else { return Ok(None) };
        if obj.stale_reads > 0 {
            obj.stale_reads -= 1;
            return Ok(Some(obj.raw.clone()));
        }
        if obj.deleting {
            let removed = st.objects.remove(handle);
            match handle.kind {
                ResourceKind::Namespace => st.objects.retain(|h, _| h.namespace.as_deref() != Some(handle.name.as_str())),
                ResourceKind::Service if removed.as_ref().map(|o| o.raw["spec"]["selector"].is_object()).unwrap_or(false) => {
                    st.objects.remove(&ResourceHandle::new(ResourceKind::Endpoints, handle.namespace.as_deref(), &handle.name));
                }
                _ => {}
            }
            return Ok(None);
        }
        let raw = obj.raw.clone();
        let ordinal = obj.ordinal;
        if st.has(handle, Behavior::Stall) {
            return Ok(Some(raw));
        }
        let status = st.converged_status(handle, &raw, ordinal);
        let subsets = if handle.kind == ResourceKind::Endpoints { st.endpoint_subsets(handle) } else { None };
        let Some(obj) = st.objects.get_mut(handle) else { return Ok(None) };
        if let Some(status) = status {
            obj.raw["status"] = status;
        }
        if let Some(subsets) = subsets {
            obj.raw["subsets"] = subsets;
        }
        Ok(Some(obj.raw.clone()))
    }

    async fn patch(&self, handle: &ResourceHandle, delta: &Json) -> Result<Json, ClusterError> {
        let mut st = self.lock();
        st.journal.push(Call::Patch(handle.clone()));
        if st.has(handle, Behavior::RejectPatch) {
            return Err(ClusterError::Api { code: 422, reason: "Invalid".into(), message: format!("patch rejected for {}", handle) });
        }
        let rv = st.bump_rv();
        let lag = st.lag;
        let Some(obj) = st.objects.get_mut(handle) else { return Err(ClusterError::NotFound(handle.to_string())) };
        merge(&mut obj.raw, delta);
        if delta.get("spec").is_some() {
            let g = obj.raw["metadata"]["generation"].as_i64().unwrap_or(1);
            obj.raw["metadata"]["generation"] = json!(g + 1);
        }
        obj.raw["metadata"]["resourceVersion"] = Json::String(rv);
        obj.stale_reads = lag;
        Ok(obj.raw.clone())
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ClusterError> {
        let mut st = self.lock();
        st.journal.push(Call::Delete(handle.clone()));
        if st.has(handle, Behavior::RejectDelete) {
            return Err(ClusterError::Api { code: 500, reason: "InternalError".into(), message: format!("delete failed for {}", handle) });
        }
        let lag = st.lag;
        let Some(obj) = st.objects.get_mut(handle) else { return Err(ClusterError::NotFound(handle.to_string())) };
        if !obj.deleting {
            obj.deleting = true;
            obj.stale_reads = lag;
            obj.raw["metadata"]["deletionTimestamp"] = Json::String(chrono::Utc::now().to_rfc3339());
        }
        Ok(())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput, ClusterError> {
        let mut st = self.lock();
        st.journal.push(Call::Exec { namespace: namespace.to_string(), pod: pod.to_string(), command: command.to_vec() });
        let handle = ResourceHandle::new(ResourceKind::Pod, Some(namespace), pod);
        if !st.objects.contains_key(&handle) {
            return Err(ClusterError::NotFound(handle.to_string()));
        }
        Ok(st.exec_results.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_descriptor(ns: &str, name: &str) -> Descriptor {
        Descriptor {
            kind: ResourceKind::Pod,
            namespace: Some(ns.into()),
            name: name.into(),
            manifest: json!({ "apiVersion": "v1", "kind": "Pod", "metadata": { "name": name, "namespace": ns }, "spec": { "containers": [{ "name": name, "image": "pause" }] } }),
        }
    }

    #[tokio::test]
    async fn create_collision_is_already_exists() {
        let c = FakeCluster::new();
        let d = pod_descriptor("ns", "p");
        c.create(&d).await.unwrap();
        assert!(matches!(c.create(&d).await, Err(ClusterError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn status_converges_after_lag() {
        let c = FakeCluster::new().with_lag(2);
        let h = c.create(&pod_descriptor("ns", "p")).await.unwrap();
        for _ in 0..2 {
            let raw = c.get(&h).await.unwrap().unwrap();
            assert!(raw.get("status").is_none());
        }
        let raw = c.get(&h).await.unwrap().unwrap();
        assert_eq!(raw["status"]["phase"], "Running");
        assert_eq!(raw["status"]["containerStatuses"][0]["ready"], true);
    }

    #[tokio::test]
    async fn delete_then_absent_then_not_found() {
        let c = FakeCluster::new().with_lag(1);
        let h = c.create(&pod_descriptor("ns", "p")).await.unwrap();
        c.delete(&h).await.unwrap();
        assert!(c.get(&h).await.unwrap().is_some());
        assert!(c.get(&h).await.unwrap().is_none());
        assert!(matches!(c.delete(&h).await, Err(ClusterError::NotFound(_))));
    }

    #[tokio::test]
    async fn patch_merges_named_containers_and_bumps_generation() {
        let c = FakeCluster::new();
        let d = Descriptor {
            kind: ResourceKind::Deployment,
            namespace: Some("ns".into()),
            name: "web".into(),
            manifest: json!({ "metadata": { "name": "web" }, "spec": { "replicas": 1, "template": { "spec": { "containers": [{ "name": "web", "image": "a", "command": ["x"] }] } } } }),
        };
        let h = c.create(&d).await.unwrap();
        let out = c.patch(&h, &json!({ "spec": { "template": { "spec": { "containers": [{ "name": "web", "image": "b" }] } } } })).await.unwrap();
        let container = &out["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "b");
        assert_eq!(container["command"][0], "x");
        assert_eq!(out["metadata"]["generation"], 2);
        let raw = c.get(&h).await.unwrap().unwrap();
        assert_eq!(raw["status"]["observedGeneration"], 2);
    }

    #[tokio::test]
    async fn claim_binds_only_with_consumer() {
        let c = FakeCluster::new();
        let pvc = Descriptor {
            kind: ResourceKind::PersistentVolumeClaim,
            namespace: Some("ns".into()),
            name: "data".into(),
            manifest: json!({ "metadata": { "name": "data" }, "spec": { "storageClassName": "local" } }),
        };
        let h = c.create(&pvc).await.unwrap();
        assert_eq!(c.get(&h).await.unwrap().unwrap()["status"]["phase"], "Pending");
        let mut pod = pod_descriptor("ns", "user");
        pod.manifest["spec"]["volumes"] = json!([{ "name": "v", "persistentVolumeClaim": { "claimName": "data" } }]);
        c.create(&pod).await.unwrap();
        assert_eq!(c.get(&h).await.unwrap().unwrap()["status"]["phase"], "Bound");
    }

    #[tokio::test]
    async fn namespace_removal_takes_contents() {
        let c = FakeCluster::new();
        let ns = Descriptor { kind: ResourceKind::Namespace, namespace: None, name: "ns".into(), manifest: json!({ "metadata": { "name": "ns" } }) };
        let nsh = c.create(&ns).await.unwrap();
        c.create(&pod_descriptor("ns", "p")).await.unwrap();
        c.delete(&nsh).await.unwrap();
        assert!(matches!(c.create(&pod_descriptor("ns", "q")).await, Err(ClusterError::Api { code: 403, .. })));
        assert!(c.get(&nsh).await.unwrap().is_none());
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn injected_faults() {
        let c = FakeCluster::new().with_behavior(ResourceKind::Pod, "p", Behavior::Crash).with_behavior(ResourceKind::Pod, "p", Behavior::RejectPatch);
        let h = c.create(&pod_descriptor("ns", "p")).await.unwrap();
        let raw = c.get(&h).await.unwrap().unwrap();
        assert_eq!(raw["status"]["containerStatuses"][0]["state"]["waiting"]["reason"], "CrashLoopBackOff");
        assert!(matches!(c.patch(&h, &json!({})).await, Err(ClusterError::Api { code: 422, .. })));
        assert_eq!(c.count(|call| matches!(call, Call::Get(_))), 1);
    }

    fn service_descriptor(ns: &str, name: &str, kind: &str, selector: Option<Json>) -> Descriptor {
        let mut spec = json!({ "type": kind, "ports": [{ "name": "check", "port": 80, "targetPort": 8080, "protocol": "TCP" }] });
        if let Some(sel) = selector {
            spec["selector"] = sel;
        }
        Descriptor { kind: ResourceKind::Service, namespace: Some(ns.into()), name: name.into(), manifest: json!({ "metadata": { "name": name }, "spec": spec }) }
    }

    #[tokio::test]
    async fn selector_service_gets_endpoints_for_running_pods() {
        let c = FakeCluster::new();
        let mut pod = pod_descriptor("ns", "web");
        pod.manifest["metadata"]["labels"] = json!({ "app": "web" });
        let ph = c.create(&pod).await.unwrap();
        let sh = c.create(&service_descriptor("ns", "web", "NodePort", Some(json!({ "app": "web" })))).await.unwrap();
        let eh = ResourceHandle::new(ResourceKind::Endpoints, Some("ns"), "web");

        // Pod not observed running yet.
        assert_eq!(c.get(&eh).await.unwrap().unwrap()["subsets"], json!([]));
        let pod_ip = c.get(&ph).await.unwrap().unwrap()["status"]["podIP"].as_str().unwrap().to_string();
        let ep = c.get(&eh).await.unwrap().unwrap();
        assert_eq!(ep["subsets"][0]["addresses"][0]["ip"], pod_ip.as_str());
        assert_eq!(ep["subsets"][0]["ports"][0]["port"], 8080);

        let svc = c.get(&sh).await.unwrap().unwrap();
        assert!(svc["spec"]["clusterIP"].as_str().unwrap().starts_with("10.96."));
        assert!(svc["spec"]["ports"][0]["nodePort"].as_u64().unwrap() >= 30000);

        c.delete(&sh).await.unwrap();
        assert!(c.get(&sh).await.unwrap().is_none());
        assert!(!c.exists(&eh));
    }

    #[tokio::test]
    async fn selectorless_service_leaves_endpoints_to_the_caller() {
        let c = FakeCluster::new();
        let sh = c.create(&service_descriptor("ns", "bare", "ClusterIP", None)).await.unwrap();
        assert!(c.get(&sh).await.unwrap().unwrap()["spec"]["ports"][0].get("nodePort").is_none());
        assert!(!c.exists(&ResourceHandle::new(ResourceKind::Endpoints, Some("ns"), "bare")));
    }

    #[tokio::test]
    async fn rejected_reads_leave_the_object_in_place() {
        let c = FakeCluster::new().with_behavior(ResourceKind::Pod, "p", Behavior::RejectRead);
        let h = c.create(&pod_descriptor("ns", "p")).await.unwrap();
        assert!(matches!(c.get(&h).await, Err(ClusterError::Api { code: 500, .. })));
        assert!(c.exists(&h));
    }
}
