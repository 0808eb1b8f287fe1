//! Per-session liveness probe
//!
//! Probes every `closed` and `half_open` platform under the aggregate
//! budget and applies each result to the circuit store as it completes.
//! `open` circuits belong to the repair workflow and `defunct` ones to the
//! sweep, so both are skipped here.

use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;
use tracing::{debug, info};
use vigil_core::fail_open::fail_open_blocking;
use vigil_core::{
    Applied, CircuitStatus, PlatformSpec, ProbeResult, StatusCounts, Trigger, EXIT_OK,
    EXIT_TIMEOUT,
};
use vigil_store::{CircuitStore, HistoryStore};

use crate::batch::{run_batch, BatchLimits};
use crate::prober::Prober;

/// A status change caused by one probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionNote {
    pub platform_id: String,
    pub from: CircuitStatus,
    pub to: CircuitStatus,
}

impl TransitionNote {
    /// Note for `applied` if it changed the status
    pub fn from_applied(platform_id: &str, applied: &Applied) -> Option<Self> {
        match applied {
            Applied::Transitioned { from, to } => Some(Self {
                platform_id: platform_id.to_string(),
                from: *from,
                to: *to,
            }),
            _ => None,
        }
    }
}

/// Result of one liveness pass
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub session_id: u64,
    /// Results in completion order
    pub results: Vec<ProbeResult>,
    pub transitions: Vec<TransitionNote>,
    /// Platforms left to repair or sweep
    pub skipped: Vec<(String, CircuitStatus)>,
    /// Platforms with no recorded result when the budget expired. Their
    /// circuits are left exactly as persisted: an unfinished probe says
    /// nothing about the platform, and writing it would spend time the
    /// budget no longer has. The report and the log carry the diagnostic.
    pub inconclusive: Vec<String>,
    pub timed_out: bool,
    /// Results the store could not persist
    pub unrecorded: usize,
    pub counts: StatusCounts,
}

impl ProbeReport {
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            EXIT_TIMEOUT
        } else {
            EXIT_OK
        }
    }

    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }

    /// Human-readable summary for hook output
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "liveness (session {}): {} probed, {} ok, {} failed, {} inconclusive",
            self.session_id,
            self.results.len(),
            self.ok_count(),
            self.results.len() - self.ok_count(),
            self.inconclusive.len()
        );
        for r in &self.results {
            let _ = writeln!(
                out,
                "  {:<20} {:<12} {:>6}ms  {}",
                r.platform_id, r.outcome, r.latency_ms, r.detail
            );
        }
        for t in &self.transitions {
            let _ = writeln!(out, "  {}: {} -> {}", t.platform_id, t.from, t.to);
        }
        if !self.skipped.is_empty() {
            let skipped: Vec<String> = self
                .skipped
                .iter()
                .map(|(id, status)| format!("{} ({})", id, status))
                .collect();
            let _ = writeln!(out, "skipped: {}", skipped.join(", "));
        }
        if self.timed_out {
            let _ = writeln!(
                out,
                "inconclusive: budget exceeded before {}; using last persisted state",
                self.inconclusive.join(", ")
            );
        }
        let _ = write!(out, "circuits: {}", self.counts);
        out
    }
}

/// Bounded-time probe of every eligible platform
pub struct LivenessProbe<P> {
    prober: P,
    store: CircuitStore,
    history: Option<HistoryStore>,
    limits: BatchLimits,
}

impl<P: Prober> LivenessProbe<P> {
    pub fn new(prober: P, store: CircuitStore, limits: BatchLimits) -> Self {
        Self {
            prober,
            store,
            history: None,
            limits,
        }
    }

    /// Also append each completed batch to the uptime history
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn store(&self) -> &CircuitStore {
        &self.store
    }

    /// Probe every platform not left to repair or sweep
    ///
    /// The whole pass, store writes included, finishes within the batch
    /// budget. Results that were not recorded by then are reported as
    /// `inconclusive` and leave their circuits untouched.
    pub async fn probe_all(&self, platforms: &[PlatformSpec], session_id: u64) -> ProbeReport {
        let snapshot = self.store.snapshot();
        let mut skipped = Vec::new();
        let targets: Vec<PlatformSpec> = platforms
            .iter()
            .filter(|p| match snapshot.get(&p.id).map(|c| c.status) {
                Some(status @ (CircuitStatus::Open | CircuitStatus::Defunct)) => {
                    skipped.push((p.id.clone(), status));
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();

        info!(
            session_id,
            targets = targets.len(),
            skipped = skipped.len(),
            "Starting liveness probe"
        );

        let deadline = tokio::time::Instant::now() + self.limits.total_budget;
        let batch = run_batch(&self.prober, &targets, self.limits, |result| {
            let store = self.store.clone();
            fail_open_blocking("circuit_store_record", move || {
                store.record(Trigger::Probe, &result)
            })
        })
        .await;

        let mut transitions = Vec::new();
        let mut unrecorded = 0;
        for done in &batch.completed {
            match &done.recorded {
                Some(applied) => transitions.extend(TransitionNote::from_applied(
                    &done.result.platform_id,
                    applied,
                )),
                None => unrecorded += 1,
            }
        }
        let results: Vec<ProbeResult> = batch.completed.into_iter().map(|c| c.result).collect();

        if let Some(history) = &self.history {
            let history = history.clone();
            let samples = results.clone();
            let append = fail_open_blocking("uptime_history_append", move || {
                history.append(&samples, Utc::now())
            });
            if tokio::time::timeout_at(deadline, append).await.is_err() {
                debug!(session_id, "History append still pending at the deadline");
            }
        }

        let report = ProbeReport {
            session_id,
            counts: StatusCounts::from_snapshot(&self.store.snapshot()),
            results,
            transitions,
            skipped,
            inconclusive: batch.inconclusive,
            timed_out: batch.timed_out,
            unrecorded,
        };

        info!(
            session_id,
            probed = report.results.len(),
            ok = report.ok_count(),
            transitions = report.transitions.len(),
            timed_out = report.timed_out,
            "Liveness probe finished: {}",
            report.counts
        );
        report
    }
}
