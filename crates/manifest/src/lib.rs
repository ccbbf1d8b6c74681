//! Strain descriptor builders: assemble manifests for each kind from typed
//! parameters. Pure functions, no I/O.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, ResourceRequirements, VolumeNodeAffinity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use strain_core::{Descriptor, ResourceKind};

/// Label stamped on everything strain creates.
pub const MANAGED_BY: (&str, &str) = ("app.kubernetes.io/managed-by", "strain");

/// First (and only) container of a pod or pod template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerParams {
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<Vec<EnvVar>>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub ports: Option<Vec<ContainerPort>>,
}

impl ContainerParams {
    pub fn image(image: impl Into<String>) -> Self {
        Self { image: image.into(), ..Default::default() }
    }
}

/// Volume attached to the pod and mounted into its container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSpec {
    EmptyDir,
    Secret { secret_name: String },
    ConfigMap { name: String },
    HostPath { path: String, #[serde(default)] host_path_type: Option<String> },
    PersistentVolumeClaim { claim_name: String },
}

impl VolumeSpec {
    fn source(&self) -> (&'static str, Json) {
        match self {
            VolumeSpec::EmptyDir => ("emptyDir", json!({})),
            VolumeSpec::Secret { secret_name } => ("secret", json!({ "secretName": secret_name })),
            VolumeSpec::ConfigMap { name } => ("configMap", json!({ "name": name })),
            VolumeSpec::HostPath { path, host_path_type } => {
                let mut v = json!({ "path": path });
                if let Some(t) = host_path_type { v["type"] = Json::String(t.clone()); }
                ("hostPath", v)
            }
            VolumeSpec::PersistentVolumeClaim { claim_name } => ("persistentVolumeClaim", json!({ "claimName": claim_name })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeMount {
    pub spec: VolumeSpec,
    pub mount_path: String,
}

/// Pod-level knobs shared by bare pods and templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodOptions {
    /// Set when the namespace provisioner created a service account for the run.
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub volume: Option<VolumeMount>,
}

/// Local PersistentVolume parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalPvParams {
    pub storage_class: String,
    pub size: String,
    #[serde(default = "default_volume_mode")]
    pub volume_mode: String,
    pub local_path: String,
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub node_affinity: Option<VolumeNodeAffinity>,
}

fn default_volume_mode() -> String { "Filesystem".into() }

fn labels(app: Option<&str>) -> Json {
    let mut m = serde_json::Map::new();
    m.insert(MANAGED_BY.0.into(), Json::String(MANAGED_BY.1.into()));
    if let Some(app) = app { m.insert("app".into(), Json::String(app.into())); }
    Json::Object(m)
}

fn descriptor(kind: ResourceKind, namespace: Option<&str>, name: &str, mut manifest: Json) -> Descriptor {
    let meta = kind.meta();
    let namespace = if meta.namespaced { namespace.map(|s| s.to_string()) } else { None };
    if let Some(obj) = manifest.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(meta.api_version()));
        obj.insert("kind".into(), Json::String(meta.kind.into()));
        let m = obj.entry("metadata").or_insert_with(|| json!({}));
        if let Some(m) = m.as_object_mut() {
            m.insert("name".into(), Json::String(name.into()));
            if let Some(ns) = &namespace { m.insert("namespace".into(), Json::String(ns.clone())); }
            m.entry("labels").or_insert_with(|| labels(None));
        }
    }
    Descriptor { kind, namespace, name: name.to_string(), manifest }
}

/// Container spec; the container takes the owning resource's name.
pub fn container(name: &str, c: &ContainerParams, mount: Option<&VolumeMount>) -> Json {
    let mut v = json!({ "name": name, "image": c.image });
    if let Some(p) = &c.image_pull_policy { v["imagePullPolicy"] = Json::String(p.clone()); }
    if let Some(cmd) = &c.command { v["command"] = json!(cmd); }
    if let Some(env) = &c.env { v["env"] = json!(env); }
    if let Some(r) = &c.resources { v["resources"] = json!(r); }
    if let Some(p) = &c.ports { v["ports"] = json!(p); }
    if let Some(m) = mount { v["volumeMounts"] = json!([{ "name": volume_name(name), "mountPath": m.mount_path }]); }
    v
}

fn volume_name(owner: &str) -> String { format!("{}-volume", owner) }

/// Pod spec with a single container.
pub fn pod_spec(name: &str, c: &ContainerParams, opts: &PodOptions, restart_policy: Option<&str>) -> Json {
    let mut spec = json!({ "containers": [container(name, c, opts.volume.as_ref())] });
    if let Some(sa) = &opts.service_account { spec["serviceAccountName"] = Json::String(sa.clone()); }
    if let Some(rp) = restart_policy { spec["restartPolicy"] = Json::String(rp.into()); }
    if let Some(m) = &opts.volume {
        let (key, source) = m.spec.source();
        let mut vol = serde_json::Map::new();
        vol.insert("name".into(), Json::String(volume_name(name)));
        vol.insert(key.into(), source);
        spec["volumes"] = json!([Json::Object(vol)]);
    }
    spec
}

fn template(name: &str, c: &ContainerParams, opts: &PodOptions, restart_policy: Option<&str>) -> Json {
    json!({
        "metadata": { "name": name, "labels": labels(Some(name)) },
        "spec": pod_spec(name, c, opts, restart_policy),
    })
}

pub fn namespace(name: &str) -> Descriptor {
    let mut l = labels(None);
    l["role"] = Json::String(name.into());
    descriptor(ResourceKind::Namespace, None, name, json!({ "metadata": { "labels": l } }))
}

pub fn service_account(namespace: &str, name: &str) -> Descriptor {
    descriptor(ResourceKind::ServiceAccount, Some(namespace), name, json!({}))
}

/// Long-lived token for `account`; the token controller fills in the data.
pub fn service_account_token(namespace: &str, account: &str) -> Descriptor {
    descriptor(ResourceKind::Secret, Some(namespace), account, json!({
        "type": "kubernetes.io/service-account-token",
        "metadata": { "annotations": { "kubernetes.io/service-account.name": account } },
    }))
}

pub fn secret(namespace: &str, name: &str, data: &BTreeMap<String, String>) -> Descriptor {
    descriptor(ResourceKind::Secret, Some(namespace), name, json!({ "type": "Opaque", "stringData": data }))
}

pub fn config_map(namespace: &str, name: &str, data: &BTreeMap<String, String>) -> Descriptor {
    descriptor(ResourceKind::ConfigMap, Some(namespace), name, json!({ "data": data }))
}

/// Local storage class: no provisioner, binding delayed until a consumer pod is scheduled.
pub fn local_storage_class(name: &str) -> Descriptor {
    descriptor(ResourceKind::StorageClass, None, name, json!({
        "provisioner": "kubernetes.io/no-provisioner",
        "volumeBindingMode": "WaitForFirstConsumer",
    }))
}

pub fn local_persistent_volume(name: &str, p: &LocalPvParams) -> Descriptor {
    let mut spec = json!({
        "capacity": { "storage": p.size },
        "volumeMode": p.volume_mode,
        "accessModes": p.access_modes,
        "persistentVolumeReclaimPolicy": "Retain",
        "storageClassName": p.storage_class,
        "local": { "path": p.local_path },
    });
    if let Some(na) = &p.node_affinity { spec["nodeAffinity"] = json!(na); }
    descriptor(ResourceKind::PersistentVolume, None, name, json!({ "spec": spec }))
}

pub fn persistent_volume_claim(namespace: &str, name: &str, storage_class: &str, access_modes: &[String], size: &str) -> Descriptor {
    descriptor(ResourceKind::PersistentVolumeClaim, Some(namespace), name, json!({
        "spec": {
            "resources": { "requests": { "storage": size } },
            "accessModes": access_modes,
            "storageClassName": storage_class,
        }
    }))
}

pub fn pod(namespace: &str, name: &str, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    descriptor(ResourceKind::Pod, Some(namespace), name, json!({
        "metadata": { "labels": labels(Some(name)) },
        "spec": pod_spec(name, c, opts, None),
    }))
}

/// How a [`service`] is exposed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIp,
    NodePort,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self { ServiceType::ClusterIp => "ClusterIP", ServiceType::NodePort => "NodePort" }
    }
}

/// Single-port service in front of the pods labelled `app: <name>`. Without a
/// selector no endpoints are managed for it and the caller supplies them.
pub fn service(namespace: &str, name: &str, service_type: ServiceType, port: i32, protocol: &str, selector: bool) -> Descriptor {
    let mut spec = json!({
        "type": service_type.as_str(),
        "ports": [{ "name": "check", "port": port, "targetPort": port, "protocol": protocol }],
    });
    if selector { spec["selector"] = json!({ "app": name }); }
    descriptor(ResourceKind::Service, Some(namespace), name, json!({ "spec": spec }))
}

/// Hand-written endpoints for a selectorless [`service`] of the same name.
pub fn endpoints(namespace: &str, name: &str, ip: &str, port: i32, protocol: &str) -> Descriptor {
    descriptor(ResourceKind::Endpoints, Some(namespace), name, json!({
        "subsets": [{
            "addresses": [{ "ip": ip }],
            "ports": [{ "name": "check", "port": port, "protocol": protocol }],
        }]
    }))
}

/// ReplicationController selects with a bare label map rather than `matchLabels`.
pub fn replication_controller(namespace: &str, name: &str, replicas: i32, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    descriptor(ResourceKind::ReplicationController, Some(namespace), name, json!({
        "spec": {
            "replicas": replicas,
            "selector": { "app": name },
            "template": template(name, c, opts, None),
        }
    }))
}

fn apps_workload(kind: ResourceKind, namespace: &str, name: &str, replicas: Option<i32>, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    let mut spec = json!({
        "selector": { "matchLabels": { "app": name } },
        "template": template(name, c, opts, None),
    });
    if let Some(r) = replicas { spec["replicas"] = json!(r); }
    if kind == ResourceKind::StatefulSet { spec["serviceName"] = Json::String(name.into()); }
    descriptor(kind, Some(namespace), name, json!({ "metadata": { "labels": labels(Some(name)) }, "spec": spec }))
}

pub fn replica_set(namespace: &str, name: &str, replicas: i32, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    apps_workload(ResourceKind::ReplicaSet, namespace, name, Some(replicas), c, opts)
}

pub fn deployment(namespace: &str, name: &str, replicas: i32, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    apps_workload(ResourceKind::Deployment, namespace, name, Some(replicas), c, opts)
}

pub fn stateful_set(namespace: &str, name: &str, replicas: i32, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    apps_workload(ResourceKind::StatefulSet, namespace, name, Some(replicas), c, opts)
}

pub fn daemon_set(namespace: &str, name: &str, c: &ContainerParams, opts: &PodOptions) -> Descriptor {
    apps_workload(ResourceKind::DaemonSet, namespace, name, None, c, opts)
}

/// Run-to-completion job; pods are never restarted in place.
pub fn job(namespace: &str, name: &str, c: &ContainerParams, opts: &PodOptions, completions: i32, backoff_limit: i32) -> Descriptor {
    descriptor(ResourceKind::Job, Some(namespace), name, json!({
        "metadata": { "labels": labels(Some(name)) },
        "spec": {
            "completions": completions,
            "backoffLimit": backoff_limit,
            "template": template(name, c, opts, Some("Never")),
        }
    }))
}
