//! Bounded observe-until-terminal loop.

use std::future::Future;

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value as Json;
use strain_core::{ClusterError, ObservedStatus, Phase, PollOutcome, PollResult, RetryPolicy};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Observe through `accessor` until `predicate` reports a terminal phase or
/// `policy.max_attempts()` observations have been made.
///
/// The accessor yields `Ok(None)` when the object is absent. With
/// `awaiting_deletion` that is the success case; otherwise an absent object is
/// simply not visible yet and counts as Pending. Accessor errors other than
/// absence abort the wait.
///
/// Sleeps `prepoll_delay` once up front and `interval` between observations,
/// never after the last one, so a timed-out wait takes
/// `prepoll_delay + (max_attempts - 1) * interval` plus accessor latency.
pub async fn poll<A, Fut, P>(mut accessor: A, predicate: P, policy: &RetryPolicy, awaiting_deletion: bool) -> Result<PollOutcome, ClusterError>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Json>, ClusterError>>,
    P: Fn(&Json) -> Phase,
{
    let started = Instant::now();
    sleep(policy.prepoll_delay()).await;
    for attempt in 1..=policy.max_attempts() {
        let phase = match accessor().await? {
            None if awaiting_deletion => return Ok(finish(PollResult::Ready, attempt, started)),
            None => {
                debug!(attempt, "not visible yet");
                Phase::Pending
            }
            Some(raw) => {
                let observed = ObservedStatus { phase: predicate(&raw), raw, observed_at: Utc::now() };
                debug!(attempt, phase = ?observed.phase, at = %observed.observed_at, "observed");
                observed.phase
            }
        };
        match phase {
            Phase::Ready => return Ok(finish(PollResult::Ready, attempt, started)),
            Phase::Failed => return Ok(finish(PollResult::Failed, attempt, started)),
            Phase::Pending => {}
        }
        if attempt < policy.max_attempts() {
            sleep(policy.interval()).await;
        }
    }
    Ok(finish(PollResult::TimedOut, policy.max_attempts(), started))
}

fn finish(result: PollResult, attempts_used: u32, started: Instant) -> PollOutcome {
    let outcome = PollOutcome { result, attempts_used, elapsed: started.elapsed() };
    counter!("strain_poll_outcomes_total", 1u64, "result" => result.to_string());
    histogram!("strain_poll_attempts", attempts_used as f64);
    match result {
        PollResult::Ready => info!(attempts = attempts_used, elapsed_ms = outcome.elapsed.as_millis() as u64, "wait finished"),
        _ => warn!(result = %result, attempts = attempts_used, elapsed_ms = outcome.elapsed.as_millis() as u64, "wait gave up"),
    }
    outcome
}
