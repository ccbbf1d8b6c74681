//! Repeated scenario invocations with bounded concurrency and a verdict/latency summary.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use strain_core::{random_name, RetryPolicy};
use strain_kubehub::ClusterApi;
use strain_ops::{predicates, LifecycleError};
use strain_scenarios::{RunContext, ScenarioError, ScenarioSpec, Verdict};
use tracing::{info, warn};

/// Where each invocation runs.
#[derive(Debug, Clone)]
pub enum Placement {
    /// Every run shares an existing namespace.
    Shared(String),
    /// Each run gets a freshly created namespace, deleted afterwards. With
    /// `service_account`, the namespace also gets a service account of the
    /// same name and its token, and every pod runs under it.
    Isolated { service_account: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub iteration: usize,
    pub namespace: String,
    pub verdict: Verdict,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub scenario: String,
    pub runs: usize,
    pub verdicts: BTreeMap<Verdict, usize>,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

impl Summary {
    pub fn from_reports(scenario: &str, reports: &[RunReport]) -> Self {
        let mut verdicts = BTreeMap::new();
        for r in reports {
            *verdicts.entry(r.verdict).or_insert(0) += 1;
        }
        let lat: Vec<f64> = reports.iter().map(|r| r.latency_ms).collect();
        let (min_ms, max_ms) = lat.iter().fold((f64::INFINITY, 0.0f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let avg_ms = if lat.is_empty() { 0.0 } else { lat.iter().sum::<f64>() / lat.len() as f64 };
        Self { scenario: scenario.to_string(), runs: reports.len(), verdicts, min_ms: if lat.is_empty() { 0.0 } else { min_ms }, avg_ms, max_ms }
    }

    pub fn successes(&self) -> usize { self.verdicts.get(&Verdict::Success).copied().unwrap_or(0) }
}

async fn provision(client: &dyn ClusterApi, policy: &RetryPolicy, service_account: bool) -> Result<RunContext, LifecycleError> {
    let d = strain_manifest::namespace(&random_name("strain-ns"));
    let (h, _) = strain_ops::create_and_wait(client, &d, predicates::namespace, policy).await?;
    let mut ctx = RunContext::new(h.name);
    if service_account {
        let ns = ctx.namespace.as_str();
        strain_ops::create_and_wait(client, &strain_manifest::service_account(ns, ns), predicates::exists, policy).await?;
        strain_ops::create_and_wait(client, &strain_manifest::service_account_token(ns, ns), predicates::exists, policy).await?;
        ctx.service_account = Some(ctx.namespace.clone());
    }
    Ok(ctx)
}

async fn run_once(client: &dyn ClusterApi, spec: &ScenarioSpec, placement: &Placement, policy: &RetryPolicy, iteration: usize) -> RunReport {
    let ctx = match placement {
        Placement::Shared(ns) => RunContext::new(ns.clone()),
        Placement::Isolated { service_account } => match provision(client, policy, *service_account).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(iteration, error = %e, "namespace provisioning failed");
                return RunReport { iteration, namespace: String::new(), verdict: Verdict::Error, latency_ms: 0.0, error: Some(e.to_string()) };
            }
        },
    };
    let started = Instant::now();
    let res: Result<(), ScenarioError> = spec.run(client, &ctx, policy).await;
    let latency = started.elapsed();
    let verdict = Verdict::of(&res);
    info!(iteration, scenario = spec.name(), ns = %ctx.namespace, %verdict, latency_ms = latency.as_millis() as u64, "run finished");
    if let Placement::Isolated { .. } = placement {
        let h = strain_core::ResourceHandle::new(strain_core::ResourceKind::Namespace, None, &ctx.namespace);
        if let Err(e) = strain_ops::delete_and_wait(client, &h, policy).await {
            warn!(iteration, ns = %ctx.namespace, error = %e, "namespace teardown failed");
        }
    }
    RunReport { iteration, namespace: ctx.namespace, verdict, latency_ms: ms(latency), error: res.err().map(|e| e.to_string()) }
}

fn ms(d: Duration) -> f64 { d.as_secs_f64() * 1000.0 }

/// `times` invocations, at most `concurrency` in flight. Reports come back in completion order.
pub async fn run_many(client: &dyn ClusterApi, spec: &ScenarioSpec, placement: &Placement, policy: &RetryPolicy, times: usize, concurrency: usize) -> Vec<RunReport> {
    futures::stream::iter(0..times)
        .map(|i| run_once(client, spec, placement, policy, i))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use strain_kubehub::FakeCluster;
    use strain_manifest::ContainerParams;
    use strain_scenarios::catalogue::PodArgs;

    fn pod_spec() -> ScenarioSpec {
        ScenarioSpec::CreateAndDeletePod(PodArgs { container: ContainerParams::image("pause"), name: None })
    }

    #[tokio::test(start_paused = true)]
    async fn isolated_runs_leave_nothing_behind() {
        let fake = FakeCluster::new().with_lag(1);
        let policy = RetryPolicy::default();
        let reports = run_many(&fake, &pod_spec(), &Placement::Isolated { service_account: false }, &policy, 6, 3).await;
        assert_eq!(reports.len(), 6);
        assert!(reports.iter().all(|r| r.verdict == Verdict::Success));
        let mut namespaces: Vec<_> = reports.iter().map(|r| r.namespace.clone()).collect();
        namespaces.sort();
        namespaces.dedup();
        assert_eq!(namespaces.len(), 6);
        assert!(fake.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn isolated_service_account_reaches_the_pods() {
        use strain_core::ResourceKind;
        use strain_kubehub::fake::Call;

        let fake = FakeCluster::new();
        let spec = ScenarioSpec::CreateAndDeletePod(PodArgs { container: ContainerParams::image("pause"), name: Some("p".into()) });
        let ctx = provision(&fake, &RetryPolicy::default(), true).await.unwrap();
        let account = ctx.service_account.clone().unwrap();
        assert_eq!(account, ctx.namespace);
        let sa = strain_core::ResourceHandle::new(ResourceKind::ServiceAccount, Some(ctx.namespace.as_str()), &account);
        let token = strain_core::ResourceHandle::new(ResourceKind::Secret, Some(ctx.namespace.as_str()), &account);
        assert!(fake.exists(&sa) && fake.exists(&token));

        let reports = run_many(&fake, &spec, &Placement::Isolated { service_account: true }, &RetryPolicy::default(), 1, 1).await;
        assert_eq!(reports[0].verdict, Verdict::Success);
        let created_pod = fake.calls().into_iter().any(|c| matches!(c, Call::Create(h) if h.kind == ResourceKind::Pod && h.namespace.as_deref() == Some(reports[0].namespace.as_str())));
        assert!(created_pod);
        // the directly provisioned namespace, account and token remain
        assert_eq!(fake.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_namespace_runs() {
        let fake = FakeCluster::new();
        let reports = run_many(&fake, &pod_spec(), &Placement::Shared("bench".into()), &RetryPolicy::default(), 3, 1).await;
        assert!(reports.iter().all(|r| r.namespace == "bench" && r.verdict == Verdict::Success));
    }

    #[test]
    fn summary_counts_and_latency() {
        let r = |verdict, latency_ms| RunReport { iteration: 0, namespace: "ns".into(), verdict, latency_ms, error: None };
        let s = Summary::from_reports("create_and_delete_pod", &[r(Verdict::Success, 10.0), r(Verdict::TimedOut, 30.0), r(Verdict::Success, 20.0)]);
        assert_eq!(s.runs, 3);
        assert_eq!(s.successes(), 2);
        assert_eq!(s.verdicts.get(&Verdict::TimedOut), Some(&1));
        assert_eq!((s.min_ms, s.avg_ms, s.max_ms), (10.0, 20.0, 30.0));
        let empty = Summary::from_reports("x", &[]);
        assert_eq!((empty.min_ms, empty.avg_ms, empty.max_ms), (0.0, 0.0, 0.0));
    }
}
