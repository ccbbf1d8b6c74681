use std::path::Path;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
    api::{Api, AttachParams, DeleteParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, Config,
};
use metrics::counter;
use serde_json::Value as Json;
use strain_core::{ClusterError, Descriptor, ResourceHandle, ResourceKind};
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::{strip_managed_fields, ClusterApi, ExecOutput};

/// [`ClusterApi`] over a kube-rs client. Cheap to clone; the client pools connections.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Explicit kubeconfig path and/or context; falls back to inference when both are absent.
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self, ClusterError> {
        let opts = KubeConfigOptions { context: context.map(|s| s.to_string()), ..Default::default() };
        let config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kc = Kubeconfig::read_from(path).map_err(|e| ClusterError::Invalid(format!("reading kubeconfig {}: {}", path.display(), e)))?;
                Config::from_custom_kubeconfig(kc, &opts).await.map_err(|e| ClusterError::Invalid(format!("loading kubeconfig: {}", e)))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&opts).await.map_err(|e| ClusterError::Invalid(format!("loading kubeconfig: {}", e)))?,
            (None, None) => Config::infer().await.map_err(|e| ClusterError::Invalid(format!("inferring config: {}", e)))?,
        };
        info!(cluster_url = %config.cluster_url, ns = %config.default_namespace, "kube client configured");
        let client = Client::try_from(config).map_err(transport)?;
        Ok(Self { client })
    }

    pub async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self.client.apiserver_version().await.map_err(transport)?;
        Ok(info.git_version)
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ClusterError> {
        let ar = api_resource(kind);
        if kind.namespaced() {
            match namespace {
                Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
                None => Err(ClusterError::Invalid(format!("namespace required for namespaced kind {}", kind))),
            }
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }
}

/// Static mapping from the kind table; no discovery round-trip.
pub(crate) fn api_resource(kind: ResourceKind) -> ApiResource {
    let m = kind.meta();
    let gvk = GroupVersionKind::gvk(m.group, m.version, m.kind);
    ApiResource::from_gvk_with_plural(&gvk, m.plural)
}

fn transport(e: kube::Error) -> ClusterError {
    ClusterError::Transport(e.to_string())
}

pub(crate) fn map_err(e: kube::Error, what: &str) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => ClusterError::AlreadyExists(what.to_string()),
        kube::Error::Api(ae) => ClusterError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        other => ClusterError::Transport(other.to_string()),
    }
}

/// Exit code from the exec status channel: `Success` is 0, otherwise the `ExitCode` cause.
pub(crate) fn exit_code(status: Option<&Status>) -> i32 {
    let Some(status) = status else { return -1 };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| causes.iter().find(|c| c.reason.as_deref() == Some("ExitCode")))
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.parse().ok())
        .unwrap_or(-1)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(reader) = reader else { return String::new() };
    let mut stream = tokio_util::io::ReaderStream::new(reader);
    let mut buf = Vec::new();
    while let Some(Ok(chunk)) = stream.next().await {
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn create(&self, descriptor: &Descriptor) -> Result<ResourceHandle, ClusterError> {
        let handle = descriptor.handle();
        counter!("strain_api_calls_total", 1u64, "verb" => "create", "kind" => handle.kind.meta().kind);
        let api = self.api(handle.kind, handle.namespace.as_deref())?;
        let obj: DynamicObject = serde_json::from_value(descriptor.manifest.clone())
            .map_err(|e| ClusterError::Invalid(format!("manifest for {}: {}", handle, e)))?;
        let created = api.create(&PostParams::default(), &obj).await.map_err(|e| map_err(e, &handle.to_string()))?;
        debug!(%handle, rv = ?created.metadata.resource_version, "created");
        Ok(handle)
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Option<Json>, ClusterError> {
        counter!("strain_api_calls_total", 1u64, "verb" => "get", "kind" => handle.kind.meta().kind);
        let api = self.api(handle.kind, handle.namespace.as_deref())?;
        match api.get_opt(&handle.name).await.map_err(|e| map_err(e, &handle.to_string()))? {
            Some(obj) => {
                let mut raw = serde_json::to_value(&obj).map_err(|e| ClusterError::Invalid(e.to_string()))?;
                strip_managed_fields(&mut raw);
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    async fn patch(&self, handle: &ResourceHandle, delta: &Json) -> Result<Json, ClusterError> {
        counter!("strain_api_calls_total", 1u64, "verb" => "patch", "kind" => handle.kind.meta().kind);
        let api = self.api(handle.kind, handle.namespace.as_deref())?;
        let obj = api
            .patch(&handle.name, &PatchParams::default(), &Patch::Strategic(delta))
            .await
            .map_err(|e| map_err(e, &handle.to_string()))?;
        let mut raw = serde_json::to_value(&obj).map_err(|e| ClusterError::Invalid(e.to_string()))?;
        strip_managed_fields(&mut raw);
        Ok(raw)
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ClusterError> {
        counter!("strain_api_calls_total", 1u64, "verb" => "delete", "kind" => handle.kind.meta().kind);
        let api = self.api(handle.kind, handle.namespace.as_deref())?;
        let dp = if handle.kind.meta().cascade { DeleteParams::foreground() } else { DeleteParams::default() };
        api.delete(&handle.name, &dp).await.map_err(|e| map_err(e, &handle.to_string()))?;
        Ok(())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput, ClusterError> {
        counter!("strain_api_calls_total", 1u64, "verb" => "exec", "kind" => "Pod");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let ap = AttachParams::default().stdin(false).stdout(true).stderr(true);
        let what = format!("Pod {}/{}", namespace, pod);
        let mut attached = api.exec(pod, command.to_vec(), &ap).await.map_err(|e| map_err(e, &what))?;
        let status = attached.take_status();
        let (stdout, stderr) = tokio::join!(read_all(attached.stdout()), read_all(attached.stderr()));
        let status = match status { Some(fut) => fut.await, None => None };
        attached.join().await.map_err(|e| ClusterError::Exec(e.to_string()))?;
        let exit_code = exit_code(status.as_ref());
        debug!(pod = %what, exit_code, "exec finished");
        Ok(ExecOutput { stdout, stderr, exit_code })
    }
}
