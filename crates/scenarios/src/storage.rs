//! Volume scenarios: a pod mounting a volume, optionally checked with a command.

use std::collections::BTreeMap;

use strain_core::random_name;
use strain_manifest::{self as manifest, LocalPvParams, PodOptions, VolumeMount, VolumeSpec};
use strain_ops::{predicates, LifecycleError};

use crate::catalogue::{LocalPvArgs, VolumeArgs, VolumeSource};
use crate::workloads::name_or_random;
use crate::{RunContext, Sequence};

fn sample_data() -> BTreeMap<String, String> {
    BTreeMap::from([("strain".to_string(), "payload".to_string())])
}

pub(crate) async fn volume(seq: &mut Sequence<'_>, ctx: &RunContext, args: &VolumeArgs) -> Result<(), LifecycleError> {
    let ns = ctx.namespace.as_str();
    let (spec, source) = match &args.volume {
        VolumeSource::EmptyDir => (VolumeSpec::EmptyDir, None),
        VolumeSource::HostPath { path, host_path_type } => (VolumeSpec::HostPath { path: path.clone(), host_path_type: host_path_type.clone() }, None),
        VolumeSource::Secret => {
            let name = random_name("strain-secret");
            let h = seq.create(&manifest::secret(ns, &name, &sample_data()), predicates::exists).await?;
            (VolumeSpec::Secret { secret_name: name }, Some(h))
        }
        VolumeSource::ConfigMap => {
            let name = random_name("strain-config");
            let h = seq.create(&manifest::config_map(ns, &name, &sample_data()), predicates::exists).await?;
            (VolumeSpec::ConfigMap { name }, Some(h))
        }
    };
    let opts = PodOptions { service_account: ctx.service_account.clone(), volume: Some(VolumeMount { spec, mount_path: args.mount_path.clone() }) };
    let pod = seq.create(&manifest::pod(ns, &name_or_random(&args.name), &args.container, &opts), predicates::pod).await?;
    if let Some(cmd) = &args.check_cmd {
        seq.exec_check(&pod, cmd).await?;
    }
    seq.delete(&pod).await?;
    if let Some(h) = source {
        seq.delete(&h).await?;
    }
    Ok(())
}

/// StorageClass, then a local PV, a claim and a pod consuming it. The claim
/// only binds once the pod is scheduled, so it is created without a wait and
/// checked after the pod is ready.
pub(crate) async fn local_pv(seq: &mut Sequence<'_>, ctx: &RunContext, args: &LocalPvArgs) -> Result<(), LifecycleError> {
    let ns = ctx.namespace.as_str();
    let class = random_name("strain-local");
    let sc = seq.create(&manifest::local_storage_class(&class), predicates::exists).await?;

    let params = LocalPvParams {
        storage_class: class.clone(),
        size: args.size.clone(),
        volume_mode: args.volume_mode.clone(),
        local_path: args.local_path.clone(),
        access_modes: args.access_modes.clone(),
        node_affinity: args.node_affinity.clone(),
    };
    let pv = seq.create(&manifest::local_persistent_volume(&random_name("strain-pv"), &params), predicates::persistent_volume_available).await?;

    let claim = random_name("strain-pvc");
    let pvc = seq.create_only(&manifest::persistent_volume_claim(ns, &claim, &class, &args.access_modes, &args.size)).await?;

    let opts = PodOptions {
        service_account: ctx.service_account.clone(),
        volume: Some(VolumeMount { spec: VolumeSpec::PersistentVolumeClaim { claim_name: claim }, mount_path: args.mount_path.clone() }),
    };
    let pod = seq.create(&manifest::pod(ns, &name_or_random(&args.name), &args.container, &opts), predicates::pod).await?;
    seq.wait_for(&pvc, predicates::persistent_volume_claim).await?;
    seq.wait_for(&pv, predicates::persistent_volume).await?;
    if let Some(cmd) = &args.check_cmd {
        seq.exec_check(&pod, cmd).await?;
    }

    seq.delete(&pod).await?;
    seq.delete(&pvc).await?;
    seq.delete(&pv).await?;
    seq.delete(&sc).await?;
    Ok(())
}
