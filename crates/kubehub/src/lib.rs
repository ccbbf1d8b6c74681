//! Strain kubehub: the capability-typed cluster client the lifecycle core drives.
//!
//! [`ClusterApi`] is the only seam between the orchestration logic and the
//! cluster. [`KubeCluster`] implements it over kube-rs; `FakeCluster` (feature
//! `fake`) implements it in memory for tests.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use strain_core::{ClusterError, Descriptor, ResourceHandle};

mod kube_cluster;
#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use kube_cluster::KubeCluster;
#[cfg(any(test, feature = "fake"))]
pub use fake::FakeCluster;

/// Captured output of a command run inside a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Create/get/patch/delete by kind, plus exec. Implementations must be safe for
/// concurrent independent calls; no client-side locking is expected.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a manifest. A name collision is `ClusterError::AlreadyExists`.
    async fn create(&self, descriptor: &Descriptor) -> Result<ResourceHandle, ClusterError>;

    /// Current object, or `None` when the API server reports it absent.
    async fn get(&self, handle: &ResourceHandle) -> Result<Option<Json>, ClusterError>;

    /// Strategic-merge patch. Returns the object as stored after the patch.
    async fn patch(&self, handle: &ResourceHandle, delta: &Json) -> Result<Json, ClusterError>;

    /// Issue a delete. An absent object is `ClusterError::NotFound`.
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ClusterError>;

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput, ClusterError>;
}

/// Drop server-populated noise that only bloats observations.
pub(crate) fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}
