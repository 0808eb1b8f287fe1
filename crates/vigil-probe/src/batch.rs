//! Bounded-time concurrent probe batches
//!
//! Probes run concurrently (at most `max_concurrency` in flight), each under
//! its own sub-timeout, and the whole batch under one aggregate budget. Each
//! result is handed to a `record` future as soon as it arrives; the budget
//! covers that recording too, so a store stuck behind another session's lock
//! cannot stretch the batch. Results recorded before the budget expires are
//! never lost.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_core::{PlatformSpec, ProbeOutcome, ProbeResult, ProbeSettings};

use crate::prober::Prober;

/// Timing and fan-out limits for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub total_budget: Duration,
    pub per_probe_timeout: Duration,
    pub max_concurrency: usize,
}

impl From<&ProbeSettings> for BatchLimits {
    fn from(settings: &ProbeSettings) -> Self {
        Self {
            total_budget: settings.total_budget(),
            per_probe_timeout: settings.per_probe_timeout(),
            max_concurrency: settings.max_concurrency,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&ProbeSettings::default())
    }
}

/// One probe result together with what recording it produced
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub result: ProbeResult,
    pub recorded: T,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    /// Recorded results in completion order
    pub completed: Vec<Completed<T>>,
    /// Platforms whose result was not recorded before the budget expired
    pub inconclusive: Vec<String>,
    pub timed_out: bool,
}

impl<T> BatchOutcome<T> {
    fn empty() -> Self {
        Self {
            completed: Vec::new(),
            inconclusive: Vec::new(),
            timed_out: false,
        }
    }
}

/// Probe `platforms`, passing each result to `record` as it completes
///
/// `record` must not block the runtime thread; wrap blocking store writes in
/// [`vigil_core::fail_open::fail_open_blocking`].
pub async fn run_batch<P, R, Fut, T>(
    prober: &P,
    platforms: &[PlatformSpec],
    limits: BatchLimits,
    record: R,
) -> BatchOutcome<T>
where
    P: Prober + ?Sized,
    R: Fn(ProbeResult) -> Fut,
    Fut: Future<Output = T>,
{
    if platforms.is_empty() {
        return BatchOutcome::empty();
    }

    let per_probe = limits.per_probe_timeout;
    let record = &record;
    let mut completed = Vec::with_capacity(platforms.len());
    let mut results = stream::iter(platforms.iter())
        .map(move |platform| async move {
            let result = match tokio::time::timeout(per_probe, prober.probe(platform)).await {
                Ok(result) => result,
                Err(_) => ProbeResult::new(
                    &platform.id,
                    ProbeOutcome::Timeout,
                    per_probe.as_millis() as u64,
                    format!("no response within {}ms", per_probe.as_millis()),
                ),
            };
            debug!(
                platform = %result.platform_id,
                outcome = %result.outcome,
                latency_ms = result.latency_ms,
                "Probe completed"
            );
            let recorded = record(result.clone()).await;
            Completed { result, recorded }
        })
        .buffer_unordered(limits.max_concurrency.max(1));

    let timed_out = tokio::time::timeout(limits.total_budget, async {
        while let Some(done) = results.next().await {
            completed.push(done);
        }
    })
    .await
    .is_err();

    let done: HashSet<&str> = completed
        .iter()
        .map(|c| c.result.platform_id.as_str())
        .collect();
    let inconclusive: Vec<String> = platforms
        .iter()
        .filter(|p| !done.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    if timed_out {
        warn!(
            budget_ms = limits.total_budget.as_millis() as u64,
            completed = completed.len(),
            inconclusive = inconclusive.len(),
            "Probe batch exceeded its budget"
        );
    }

    BatchOutcome {
        completed,
        inconclusive,
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProber;

    fn platforms(ids: &[&str]) -> Vec<PlatformSpec> {
        ids.iter()
            .map(|id| PlatformSpec::new(*id, format!("http://{}.invalid", id)))
            .collect()
    }

    fn limits(total_ms: u64, per_probe_ms: u64) -> BatchLimits {
        BatchLimits {
            total_budget: Duration::from_millis(total_ms),
            per_probe_timeout: Duration::from_millis(per_probe_ms),
            max_concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_all_complete_in_budget() {
        let prober = MockProber::new()
            .with_outcome("a", ProbeOutcome::Ok)
            .with_outcome("b", ProbeOutcome::AuthError);
        let outcome = run_batch(&prober, &platforms(&["a", "b"]), limits(1000, 500), |r| async move {
            r.platform_id
        })
        .await;

        assert!(!outcome.timed_out);
        assert!(outcome.inconclusive.is_empty());
        let mut seen: Vec<String> = outcome.completed.into_iter().map(|c| c.recorded).collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_slow_probe_hits_sub_timeout() {
        let prober = MockProber::new()
            .with_outcome("slow", ProbeOutcome::Ok)
            .with_delay("slow", Duration::from_secs(5));

        let outcome =
            run_batch(&prober, &platforms(&["slow"]), limits(2000, 50), |_| async {}).await;

        assert!(!outcome.timed_out);
        assert_eq!(outcome.completed[0].result.outcome, ProbeOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_aggregate_budget_keeps_finished_results() {
        let prober = MockProber::new()
            .with_outcome("fast", ProbeOutcome::Ok)
            .with_outcome("slow", ProbeOutcome::Ok)
            .with_delay("slow", Duration::from_secs(5));
        let outcome = run_batch(
            &prober,
            &platforms(&["fast", "slow"]),
            limits(100, 10_000),
            |_| async {},
        )
        .await;

        assert!(outcome.timed_out);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].result.platform_id, "fast");
        assert_eq!(outcome.inconclusive, vec!["slow".to_string()]);
    }

    #[tokio::test]
    async fn test_budget_covers_slow_recording() {
        let prober = MockProber::new()
            .with_outcome("a", ProbeOutcome::Ok)
            .with_outcome("b", ProbeOutcome::Ok);
        let started = std::time::Instant::now();

        let outcome = run_batch(&prober, &platforms(&["a", "b"]), limits(200, 1000), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert!(outcome.timed_out);
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.inconclusive, vec!["a".to_string(), "b".to_string()]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_batch_issues_nothing() {
        let prober = MockProber::new();
        let outcome = run_batch(&prober, &[], limits(100, 100), |_| async {}).await;
        assert!(outcome.completed.is_empty());
        assert_eq!(prober.calls(), 0);
    }
}
