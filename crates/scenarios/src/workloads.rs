use strain_core::{random_name, Descriptor, ResourceKind, ScaleSpec};
use strain_manifest::{self as manifest, ContainerParams, PodOptions};
use strain_ops::{predicates, LifecycleError};
use tracing::debug;

use crate::catalogue::{JobArgs, MultiPodArgs, NamespaceArgs, PodArgs, ReplicatedArgs, RolloutArgs, ScaleArgs};
use crate::{RunContext, Sequence};

pub(crate) fn pod_options(ctx: &RunContext) -> PodOptions {
    PodOptions { service_account: ctx.service_account.clone(), volume: None }
}

pub(crate) fn name_or_random(name: &Option<String>) -> String {
    name.clone().unwrap_or_else(|| random_name("strain"))
}

fn replicated_descriptor(kind: ResourceKind, ctx: &RunContext, name: &str, replicas: i32, c: &ContainerParams) -> Result<Descriptor, LifecycleError> {
    let ns = ctx.namespace.as_str();
    let opts = pod_options(ctx);
    match kind {
        ResourceKind::ReplicationController => Ok(manifest::replication_controller(ns, name, replicas, c, &opts)),
        ResourceKind::ReplicaSet => Ok(manifest::replica_set(ns, name, replicas, c, &opts)),
        ResourceKind::Deployment => Ok(manifest::deployment(ns, name, replicas, c, &opts)),
        ResourceKind::StatefulSet => Ok(manifest::stateful_set(ns, name, replicas, c, &opts)),
        other => Err(LifecycleError::InvalidArgument(format!("{} is not a replicated kind", other))),
    }
}

pub(crate) async fn namespace(seq: &mut Sequence<'_>, args: &NamespaceArgs) -> Result<(), LifecycleError> {
    let d = manifest::namespace(&name_or_random(&args.name));
    let h = seq.create(&d, predicates::namespace).await?;
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn pod(seq: &mut Sequence<'_>, ctx: &RunContext, args: &PodArgs) -> Result<(), LifecycleError> {
    let d = manifest::pod(&ctx.namespace, &name_or_random(&args.name), &args.container, &pod_options(ctx));
    let h = seq.create(&d, predicates::pod).await?;
    let stages = seq.pod_timeline(&h).await?;
    debug!(pod = %h, ?stages, "pod conditions");
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn replicated(seq: &mut Sequence<'_>, ctx: &RunContext, kind: ResourceKind, args: &ReplicatedArgs) -> Result<(), LifecycleError> {
    let d = replicated_descriptor(kind, ctx, &name_or_random(&args.name), args.replicas, &args.container)?;
    let h = seq.create(&d, predicates::for_kind(kind)).await?;
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn scaled(seq: &mut Sequence<'_>, ctx: &RunContext, kind: ResourceKind, args: &ScaleArgs, spec: ScaleSpec) -> Result<(), LifecycleError> {
    let d = replicated_descriptor(kind, ctx, &name_or_random(&args.name), spec.original_replicas, &args.container)?;
    let h = seq.create(&d, predicates::for_kind(kind)).await?;
    seq.scale_and_revert(&h, spec).await?;
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn rollout(seq: &mut Sequence<'_>, ctx: &RunContext, args: &RolloutArgs) -> Result<(), LifecycleError> {
    let d = manifest::deployment(&ctx.namespace, &name_or_random(&args.name), args.replicas, &args.container, &pod_options(ctx));
    let h = seq.create(&d, predicates::replicas).await?;
    seq.rollout(&h, &args.changes).await?;
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn daemon_set(seq: &mut Sequence<'_>, ctx: &RunContext, args: &PodArgs) -> Result<(), LifecycleError> {
    let d = manifest::daemon_set(&ctx.namespace, &name_or_random(&args.name), &args.container, &pod_options(ctx));
    let h = seq.create(&d, predicates::daemon_set).await?;
    seq.delete(&h).await?;
    Ok(())
}

pub(crate) async fn job(seq: &mut Sequence<'_>, ctx: &RunContext, args: &JobArgs) -> Result<(), LifecycleError> {
    let d = manifest::job(&ctx.namespace, &name_or_random(&args.name), &args.container, &pod_options(ctx), args.completions, args.backoff_limit);
    let h = seq.create(&d, predicates::job).await?;
    seq.delete(&h).await?;
    Ok(())
}

/// A namespace of its own holding `pods_number` pods. All pods are submitted
/// before any is waited on; the namespace is deleted last.
pub(crate) async fn namespaced_pods(seq: &mut Sequence<'_>, args: &MultiPodArgs) -> Result<(), LifecycleError> {
    let ns = seq.create(&manifest::namespace(&random_name("strain-ns")), predicates::namespace).await?;
    let mut pods = Vec::with_capacity(args.pods_number as usize);
    for _ in 0..args.pods_number {
        let d = manifest::pod(&ns.name, &random_name("strain"), &args.container, &PodOptions::default());
        pods.push(seq.create_only(&d).await?);
    }
    for pod in &pods {
        seq.wait_for(pod, predicates::pod).await?;
    }
    debug!(ns = %ns.name, pods = pods.len(), "all pods running");
    for pod in &pods {
        seq.delete(pod).await?;
    }
    seq.delete(&ns).await?;
    Ok(())
}
