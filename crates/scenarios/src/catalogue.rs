//! The scenario catalogue and its typed arguments.
//!
//! Arguments deserialize from a map tagged by `scenario`, e.g.
//!
//! ```yaml
//! scenario: create_scale_and_delete_replicaset
//! image: registry.k8s.io/pause:3.9
//! replicas: 1
//! scale_replicas: 3
//! ```

use k8s_openapi::api::core::v1::VolumeNodeAffinity;
use serde::{Deserialize, Serialize};
use strain_core::{RetryPolicy, RolloutChange, ScaleSpec};
use strain_kubehub::ClusterApi;
use strain_manifest::ContainerParams;
use tracing::info;

use crate::{sequence::Sequence, services, storage, workloads, RunContext, ScenarioError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NamespaceArgs {
    #[serde(default)]
    pub name: Option<String>,
}

/// Single pod, or one pod per node for daemon sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicatedArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub replicas: i32,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub replicas: i32,
    pub scale_replicas: i32,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub replicas: i32,
    pub changes: RolloutChange,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    #[serde(default = "one")]
    pub completions: i32,
    #[serde(default)]
    pub backoff_limit: i32,
    #[serde(default)]
    pub name: Option<String>,
}

fn one() -> i32 { 1 }

/// Volume source for `create_and_delete_volume`. Secret and config map
/// sources are created alongside the pod and deleted after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    EmptyDir,
    Secret,
    ConfigMap,
    HostPath {
        path: String,
        #[serde(default)]
        host_path_type: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub mount_path: String,
    pub volume: VolumeSource,
    /// Run in the pod once it is ready; a non-zero exit fails the run.
    #[serde(default)]
    pub check_cmd: Option<Vec<String>>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalPvArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub mount_path: String,
    pub size: String,
    pub local_path: String,
    #[serde(default = "filesystem")]
    pub volume_mode: String,
    #[serde(default = "read_write_once")]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub node_affinity: Option<VolumeNodeAffinity>,
    #[serde(default)]
    pub check_cmd: Option<Vec<String>>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A pod serving on `port`, put behind a service and checked with curl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    /// Container port and service port.
    pub port: i32,
    #[serde(default = "tcp")]
    pub protocol: String,
    /// Image of the checking job; must provide `curl`.
    #[serde(default = "curl_image")]
    pub check_image: String,
    /// Per-request timeout for the check, in seconds.
    #[serde(default)]
    pub request_timeout: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
}

fn tcp() -> String { "TCP".into() }

fn curl_image() -> String { "appropriate/curl".into() }

/// Several pods in a namespace of their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiPodArgs {
    #[serde(flatten)]
    pub container: ContainerParams,
    pub pods_number: u32,
}

fn filesystem() -> String { "Filesystem".into() }

fn read_write_once() -> Vec<String> { vec!["ReadWriteOnce".into()] }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum ScenarioSpec {
    CreateAndDeleteNamespace(NamespaceArgs),
    CreateAndDeletePod(PodArgs),
    CreateAndDeleteReplicationController(ReplicatedArgs),
    CreateScaleAndDeleteReplicationController(ScaleArgs),
    CreateAndDeleteReplicaset(ReplicatedArgs),
    CreateScaleAndDeleteReplicaset(ScaleArgs),
    CreateAndDeleteDeployment(ReplicatedArgs),
    CreateRolloutAndDeleteDeployment(RolloutArgs),
    CreateAndDeleteStatefulset(ReplicatedArgs),
    CreateScaleAndDeleteStatefulset(ScaleArgs),
    CreateAndDeleteDaemonset(PodArgs),
    CreateAndDeleteJob(JobArgs),
    CreateAndDeleteVolume(VolumeArgs),
    CreateAndDeleteLocalPv(LocalPvArgs),
    CreateCheckAndDeletePodWithClusterIpService(ServiceArgs),
    CreateCheckAndDeletePodWithClusterIpServiceCustomEndpoints(ServiceArgs),
    CreateCheckAndDeletePodWithNodePortService(ServiceArgs),
    RunNamespacedPods(MultiPodArgs),
}

/// Every scenario name, in catalogue order.
pub const NAMES: &[&str] = &[
    "create_and_delete_namespace",
    "create_and_delete_pod",
    "create_and_delete_replication_controller",
    "create_scale_and_delete_replication_controller",
    "create_and_delete_replicaset",
    "create_scale_and_delete_replicaset",
    "create_and_delete_deployment",
    "create_rollout_and_delete_deployment",
    "create_and_delete_statefulset",
    "create_scale_and_delete_statefulset",
    "create_and_delete_daemonset",
    "create_and_delete_job",
    "create_and_delete_volume",
    "create_and_delete_local_pv",
    "create_check_and_delete_pod_with_cluster_ip_service",
    "create_check_and_delete_pod_with_cluster_ip_service_custom_endpoints",
    "create_check_and_delete_pod_with_node_port_service",
    "run_namespaced_pods",
];

impl ScenarioSpec {
    pub fn name(&self) -> &'static str {
        use ScenarioSpec::*;
        let i = match self {
            CreateAndDeleteNamespace(_) => 0,
            CreateAndDeletePod(_) => 1,
            CreateAndDeleteReplicationController(_) => 2,
            CreateScaleAndDeleteReplicationController(_) => 3,
            CreateAndDeleteReplicaset(_) => 4,
            CreateScaleAndDeleteReplicaset(_) => 5,
            CreateAndDeleteDeployment(_) => 6,
            CreateRolloutAndDeleteDeployment(_) => 7,
            CreateAndDeleteStatefulset(_) => 8,
            CreateScaleAndDeleteStatefulset(_) => 9,
            CreateAndDeleteDaemonset(_) => 10,
            CreateAndDeleteJob(_) => 11,
            CreateAndDeleteVolume(_) => 12,
            CreateAndDeleteLocalPv(_) => 13,
            CreateCheckAndDeletePodWithClusterIpService(_) => 14,
            CreateCheckAndDeletePodWithClusterIpServiceCustomEndpoints(_) => 15,
            CreateCheckAndDeletePodWithNodePortService(_) => 16,
            RunNamespacedPods(_) => 17,
        };
        NAMES[i]
    }

    /// Argument checks that need no cluster.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        use ScenarioSpec::*;
        let invalid = |m: String| Err(ScenarioError::InvalidArgs(m));
        match self {
            CreateAndDeleteReplicationController(a) | CreateAndDeleteReplicaset(a) | CreateAndDeleteDeployment(a) | CreateAndDeleteStatefulset(a)
                if a.replicas < 0 =>
            {
                invalid(format!("replicas must be >= 0, got {}", a.replicas))
            }
            CreateRolloutAndDeleteDeployment(a) if a.replicas < 0 => invalid(format!("replicas must be >= 0, got {}", a.replicas)),
            CreateScaleAndDeleteReplicationController(a) | CreateScaleAndDeleteReplicaset(a) | CreateScaleAndDeleteStatefulset(a) => {
                self.scale_spec(a).map(|_| ())
            }
            CreateAndDeleteJob(a) if a.completions < 1 || a.backoff_limit < 0 => {
                invalid(format!("completions must be >= 1 and backoff_limit >= 0, got {}/{}", a.completions, a.backoff_limit))
            }
            CreateAndDeleteVolume(VolumeArgs { check_cmd: Some(cmd), .. }) | CreateAndDeleteLocalPv(LocalPvArgs { check_cmd: Some(cmd), .. }) if cmd.is_empty() => {
                invalid("check_cmd must not be empty".into())
            }
            CreateCheckAndDeletePodWithClusterIpService(a) | CreateCheckAndDeletePodWithClusterIpServiceCustomEndpoints(a) | CreateCheckAndDeletePodWithNodePortService(a) => {
                validate_service(a)
            }
            RunNamespacedPods(a) if a.pods_number == 0 => invalid("pods_number must be >= 1".into()),
            _ => Ok(()),
        }
    }

    fn scale_spec(&self, a: &ScaleArgs) -> Result<ScaleSpec, ScenarioError> {
        ScaleSpec::new(a.replicas, a.scale_replicas).map_err(|e| ScenarioError::InvalidArgs(format!("{}: {}", self.name(), e)))
    }

    /// One invocation in `ctx.namespace`. Anything created is deleted before returning.
    pub async fn run(&self, client: &dyn ClusterApi, ctx: &RunContext, policy: &RetryPolicy) -> Result<(), ScenarioError> {
        use strain_core::ResourceKind as K;
        use ScenarioSpec::*;
        self.validate()?;
        info!(scenario = self.name(), ns = %ctx.namespace, "scenario starting");
        let mut seq = Sequence::new(client, *policy);
        let res = match self {
            CreateAndDeleteNamespace(a) => workloads::namespace(&mut seq, a).await,
            CreateAndDeletePod(a) => workloads::pod(&mut seq, ctx, a).await,
            CreateAndDeleteReplicationController(a) => workloads::replicated(&mut seq, ctx, K::ReplicationController, a).await,
            CreateAndDeleteReplicaset(a) => workloads::replicated(&mut seq, ctx, K::ReplicaSet, a).await,
            CreateAndDeleteDeployment(a) => workloads::replicated(&mut seq, ctx, K::Deployment, a).await,
            CreateAndDeleteStatefulset(a) => workloads::replicated(&mut seq, ctx, K::StatefulSet, a).await,
            CreateScaleAndDeleteReplicationController(a) => workloads::scaled(&mut seq, ctx, K::ReplicationController, a, self.scale_spec(a)?).await,
            CreateScaleAndDeleteReplicaset(a) => workloads::scaled(&mut seq, ctx, K::ReplicaSet, a, self.scale_spec(a)?).await,
            CreateScaleAndDeleteStatefulset(a) => workloads::scaled(&mut seq, ctx, K::StatefulSet, a, self.scale_spec(a)?).await,
            CreateRolloutAndDeleteDeployment(a) => workloads::rollout(&mut seq, ctx, a).await,
            CreateAndDeleteDaemonset(a) => workloads::daemon_set(&mut seq, ctx, a).await,
            CreateAndDeleteJob(a) => workloads::job(&mut seq, ctx, a).await,
            CreateAndDeleteVolume(a) => storage::volume(&mut seq, ctx, a).await,
            CreateAndDeleteLocalPv(a) => storage::local_pv(&mut seq, ctx, a).await,
            CreateCheckAndDeletePodWithClusterIpService(a) => services::cluster_ip(&mut seq, ctx, a).await,
            CreateCheckAndDeletePodWithClusterIpServiceCustomEndpoints(a) => services::cluster_ip_custom_endpoints(&mut seq, ctx, a).await,
            CreateCheckAndDeletePodWithNodePortService(a) => services::node_port(&mut seq, ctx, a).await,
            RunNamespacedPods(a) => workloads::namespaced_pods(&mut seq, a).await,
        };
        seq.conclude(res).await
    }
}

fn validate_service(a: &ServiceArgs) -> Result<(), ScenarioError> {
    if !(1..=65535).contains(&a.port) {
        return Err(ScenarioError::InvalidArgs(format!("port must be in 1..=65535, got {}", a.port)));
    }
    if !["TCP", "UDP", "SCTP"].contains(&a.protocol.as_str()) {
        return Err(ScenarioError::InvalidArgs(format!("protocol must be TCP, UDP or SCTP, got {}", a.protocol)));
    }
    match a.request_timeout {
        Some(t) if !(t.is_finite() && t > 0.0) => Err(ScenarioError::InvalidArgs(format!("request_timeout must be positive, got {}", t))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_serde_tags() {
        let specs = vec![
            ScenarioSpec::CreateAndDeleteNamespace(NamespaceArgs::default()),
            ScenarioSpec::CreateAndDeleteLocalPv(LocalPvArgs {
                container: ContainerParams::image("busybox"),
                mount_path: "/data".into(),
                size: "1Gi".into(),
                local_path: "/mnt/disks/a".into(),
                volume_mode: filesystem(),
                access_modes: read_write_once(),
                node_affinity: None,
                check_cmd: None,
                name: None,
            }),
        ];
        for s in specs {
            let v = serde_json::to_value(&s).unwrap();
            assert_eq!(v["scenario"], s.name());
        }
        assert_eq!(NAMES.len(), 18);
    }

    #[test]
    fn parses_flattened_container_params() {
        let s: ScenarioSpec = serde_json::from_value(serde_json::json!({
            "scenario": "create_scale_and_delete_statefulset",
            "image": "nginx:1.25",
            "image_pull_policy": "IfNotPresent",
            "command": ["sleep", "inf"],
            "replicas": 1,
            "scale_replicas": 3,
        }))
        .unwrap();
        match &s {
            ScenarioSpec::CreateScaleAndDeleteStatefulset(a) => {
                assert_eq!(a.container.image, "nginx:1.25");
                assert_eq!(a.container.command.as_deref(), Some(&["sleep".to_string(), "inf".to_string()][..]));
                assert_eq!(a.scale_replicas, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_counts() {
        let scale = ScenarioSpec::CreateScaleAndDeleteReplicaset(ScaleArgs { container: ContainerParams::image("x"), replicas: 1, scale_replicas: -2, name: None });
        assert!(matches!(scale.validate(), Err(ScenarioError::InvalidArgs(_))));
        let job = ScenarioSpec::CreateAndDeleteJob(JobArgs { container: ContainerParams::image("x"), completions: 0, backoff_limit: 0, name: None });
        assert!(job.validate().is_err());
        let vol = ScenarioSpec::CreateAndDeleteVolume(VolumeArgs {
            container: ContainerParams::image("x"),
            mount_path: "/m".into(),
            volume: VolumeSource::EmptyDir,
            check_cmd: Some(vec![]),
            name: None,
        });
        assert!(vol.validate().is_err());
    }

    #[test]
    fn service_and_multi_pod_arguments() {
        let s: ScenarioSpec = serde_json::from_value(serde_json::json!({
            "scenario": "create_check_and_delete_pod_with_node_port_service",
            "image": "nginx:1.25",
            "port": 80,
        }))
        .unwrap();
        match &s {
            ScenarioSpec::CreateCheckAndDeletePodWithNodePortService(a) => {
                assert_eq!(a.protocol, "TCP");
                assert_eq!(a.check_image, "appropriate/curl");
                assert_eq!(a.request_timeout, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.name(), "create_check_and_delete_pod_with_node_port_service");
        assert!(s.validate().is_ok());

        let mut bad: ServiceArgs = serde_json::from_value(serde_json::json!({ "image": "x", "port": 70000 })).unwrap();
        assert!(ScenarioSpec::CreateCheckAndDeletePodWithClusterIpService(bad.clone()).validate().is_err());
        bad.port = 80;
        bad.protocol = "HTTP".into();
        assert!(ScenarioSpec::CreateCheckAndDeletePodWithClusterIpServiceCustomEndpoints(bad).validate().is_err());

        let none = ScenarioSpec::RunNamespacedPods(MultiPodArgs { container: ContainerParams::image("x"), pods_number: 0 });
        assert!(matches!(none.validate(), Err(ScenarioError::InvalidArgs(_))));
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        let r = serde_json::from_value::<ScenarioSpec>(serde_json::json!({ "scenario": "create_and_delete_service", "image": "x" }));
        assert!(r.is_err());
    }
}
