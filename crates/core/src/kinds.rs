//! Static table of the resource kinds strain knows how to drive.

use serde::{Deserialize, Serialize};

/// API coordinates and delete behaviour for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMeta {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
    /// Delete with foreground propagation so owned pods go before the owner.
    pub cascade: bool,
    /// Carries `spec.replicas` and supports scale.
    pub scalable: bool,
}

impl KindMeta {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.to_string() } else { format!("{}/{}", self.group, self.version) }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Pod,
    ReplicationController,
    ReplicaSet,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    PersistentVolume,
    PersistentVolumeClaim,
    StorageClass,
    ConfigMap,
    Secret,
    ServiceAccount,
    Service,
    /// Normally maintained by the endpoints controller for services with a selector.
    Endpoints,
}

const fn meta(group: &'static str, version: &'static str, kind: &'static str, plural: &'static str, namespaced: bool, cascade: bool, scalable: bool) -> KindMeta {
    KindMeta { group, version, kind, plural, namespaced, cascade, scalable }
}

// Indexed by `ResourceKind as usize`; order must follow the enum.
static KINDS: [KindMeta; 16] = [
    meta("", "v1", "Namespace", "namespaces", false, false, false),
    meta("", "v1", "Pod", "pods", true, false, false),
    meta("", "v1", "ReplicationController", "replicationcontrollers", true, true, true),
    meta("apps", "v1", "ReplicaSet", "replicasets", true, true, true),
    meta("apps", "v1", "Deployment", "deployments", true, true, true),
    meta("apps", "v1", "StatefulSet", "statefulsets", true, true, true),
    meta("apps", "v1", "DaemonSet", "daemonsets", true, true, false),
    meta("batch", "v1", "Job", "jobs", true, true, false),
    meta("", "v1", "PersistentVolume", "persistentvolumes", false, false, false),
    meta("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true, false, false),
    meta("storage.k8s.io", "v1", "StorageClass", "storageclasses", false, false, false),
    meta("", "v1", "ConfigMap", "configmaps", true, false, false),
    meta("", "v1", "Secret", "secrets", true, false, false),
    meta("", "v1", "ServiceAccount", "serviceaccounts", true, false, false),
    meta("", "v1", "Service", "services", true, false, false),
    meta("", "v1", "Endpoints", "endpoints", true, false, false),
];

impl ResourceKind {
    pub const ALL: [ResourceKind; 16] = [
        ResourceKind::Namespace,
        ResourceKind::Pod,
        ResourceKind::ReplicationController,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::PersistentVolume,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::StorageClass,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::ServiceAccount,
        ResourceKind::Service,
        ResourceKind::Endpoints,
    ];

    pub fn meta(self) -> &'static KindMeta { &KINDS[self as usize] }

    pub fn namespaced(self) -> bool { self.meta().namespaced }

    pub fn scalable(self) -> bool { self.meta().scalable }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.meta().kind)
    }
}
