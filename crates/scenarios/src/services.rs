//! Service scenarios: a labelled pod behind a service, checked from inside the
//! cluster by a curl job that must complete.

use k8s_openapi::api::core::v1::ContainerPort;
use serde_json::Value as Json;
use strain_core::{ClusterError, ResourceHandle, ResourceKind};
use strain_manifest::{self as manifest, ContainerParams, ServiceType};
use strain_ops::{predicates, LifecycleError};
use tracing::debug;

use crate::catalogue::ServiceArgs;
use crate::workloads::{name_or_random, pod_options};
use crate::{RunContext, Sequence};

/// The scenario container, exposing the service port.
fn serving_container(args: &ServiceArgs) -> ContainerParams {
    let mut c = args.container.clone();
    let ports = c.ports.get_or_insert_with(Vec::new);
    if !ports.iter().any(|p| p.container_port == args.port) {
        ports.push(ContainerPort { container_port: args.port, protocol: Some(args.protocol.clone()), ..Default::default() });
    }
    c
}

/// `ip:port` for every published address and port.
pub(crate) fn endpoint_targets(raw: &Json) -> Vec<String> {
    let mut targets = Vec::new();
    for subset in raw["subsets"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        let ports: Vec<i64> = subset["ports"].as_array().map(|ps| ps.iter().filter_map(|p| p["port"].as_i64()).collect()).unwrap_or_default();
        for ip in subset["addresses"].as_array().map(Vec::as_slice).unwrap_or(&[]).iter().filter_map(|a| a["ip"].as_str()) {
            targets.extend(ports.iter().map(|port| format!("{}:{}", ip, port)));
        }
    }
    targets
}

fn field<'a>(raw: &'a Json, handle: &ResourceHandle, path: &[&str]) -> Result<&'a Json, LifecycleError> {
    let v = path.iter().fold(raw, |v, key| match key.parse::<usize>() {
        Ok(i) => &v[i],
        Err(_) => &v[*key],
    });
    if v.is_null() {
        return Err(LifecycleError::Cluster { action: "read", source: ClusterError::Invalid(format!("{} has no {}", handle, path.join("."))) });
    }
    Ok(v)
}

/// Run `curl` in a job until it completes, then delete the job. The job gets
/// its own name so its pod is never selected by the service under test.
async fn curl_check(seq: &mut Sequence<'_>, ctx: &RunContext, name: &str, args: &ServiceArgs, targets: Vec<String>) -> Result<(), LifecycleError> {
    let mut command = vec!["curl".to_string(), "--silent".to_string(), "--show-error".to_string()];
    if let Some(t) = args.request_timeout {
        command.extend(["--max-time".to_string(), t.to_string()]);
    }
    command.extend(targets);
    debug!(service = name, ?command, "service check");
    let c = ContainerParams { command: Some(command), ..ContainerParams::image(args.check_image.clone()) };
    let job = manifest::job(&ctx.namespace, &format!("{}-check", name), &c, &pod_options(ctx), 1, 0);
    let job = seq.create(&job, predicates::job).await?;
    seq.delete(&job).await?;
    Ok(())
}

/// Pod, ClusterIP service selecting it, curl against the managed endpoints.
pub(crate) async fn cluster_ip(seq: &mut Sequence<'_>, ctx: &RunContext, args: &ServiceArgs) -> Result<(), LifecycleError> {
    let ns = ctx.namespace.as_str();
    let name = name_or_random(&args.name);
    let pod = seq.create(&manifest::pod(ns, &name, &serving_container(args), &pod_options(ctx)), predicates::pod).await?;
    let svc = seq.create(&manifest::service(ns, &name, ServiceType::ClusterIp, args.port, &args.protocol, true), predicates::exists).await?;

    let ep = ResourceHandle::new(ResourceKind::Endpoints, Some(ns), &name);
    seq.wait_for(&ep, predicates::endpoints).await?;
    let targets = endpoint_targets(&seq.read(&ep).await?);
    curl_check(seq, ctx, &name, args, targets).await?;

    seq.delete(&svc).await?;
    seq.delete(&pod).await?;
    Ok(())
}

/// Pod, selectorless ClusterIP service and hand-written endpoints pointing at the pod.
pub(crate) async fn cluster_ip_custom_endpoints(seq: &mut Sequence<'_>, ctx: &RunContext, args: &ServiceArgs) -> Result<(), LifecycleError> {
    let ns = ctx.namespace.as_str();
    let name = name_or_random(&args.name);
    let pod = seq.create(&manifest::pod(ns, &name, &serving_container(args), &pod_options(ctx)), predicates::pod).await?;
    let svc = seq.create(&manifest::service(ns, &name, ServiceType::ClusterIp, args.port, &args.protocol, false), predicates::exists).await?;

    let raw = seq.read(&pod).await?;
    let ip = field(&raw, &pod, &["status", "podIP"])?.as_str().unwrap_or_default().to_string();
    let ep = seq.create(&manifest::endpoints(ns, &name, &ip, args.port, &args.protocol), predicates::endpoints).await?;
    curl_check(seq, ctx, &name, args, vec![format!("{}:{}", ip, args.port)]).await?;

    seq.delete(&ep).await?;
    seq.delete(&svc).await?;
    seq.delete(&pod).await?;
    Ok(())
}

/// Pod and NodePort service, requested through the node the pod runs on.
/// curl retries with the run's poll budget while the port is being wired up.
pub(crate) async fn node_port(seq: &mut Sequence<'_>, ctx: &RunContext, args: &ServiceArgs) -> Result<(), LifecycleError> {
    let ns = ctx.namespace.as_str();
    let name = name_or_random(&args.name);
    let pod = seq.create(&manifest::pod(ns, &name, &serving_container(args), &pod_options(ctx)), predicates::pod).await?;
    let svc = seq.create(&manifest::service(ns, &name, ServiceType::NodePort, args.port, &args.protocol, true), predicates::exists).await?;

    let raw = seq.read(&svc).await?;
    let node_port = field(&raw, &svc, &["spec", "ports", "0", "nodePort"])?.clone();
    let raw = seq.read(&pod).await?;
    let host = field(&raw, &pod, &["status", "hostIP"])?.as_str().unwrap_or_default().to_string();
    seq.wait_for(&ResourceHandle::new(ResourceKind::Endpoints, Some(ns), &name), predicates::endpoints).await?;

    let policy = *seq.policy();
    let curl_args = vec![
        "--retry".to_string(),
        policy.max_attempts().to_string(),
        "--retry-delay".to_string(),
        policy.interval().as_secs().max(1).to_string(),
        "--retry-connrefused".to_string(),
        format!("http://{}:{}/", host, node_port),
    ];
    curl_check(seq, ctx, &name, args, curl_args).await?;

    seq.delete(&svc).await?;
    seq.delete(&pod).await?;
    Ok(())
}
