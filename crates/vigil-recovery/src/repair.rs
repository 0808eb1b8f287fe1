//! Repair workflow for open circuits
//!
//! Runs on a medium interval. Every `open` circuit gets one bounded repair
//! probe: a success promotes it to `half_open`, a failure counts toward
//! demotion to `defunct`. `half_open` circuits are probed too, so a
//! promotion can complete to `closed` on the next run even if no regular
//! liveness probe reached the platform in between.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{info, warn};
use vigil_core::fail_open::fail_open_blocking;
use vigil_core::{
    Applied, CircuitStatus, PlatformSpec, StatusCounts, Trigger, EXIT_OK, EXIT_TIMEOUT,
};
use vigil_probe::{run_batch, BatchLimits, Prober};
use vigil_store::CircuitStore;

/// What one repair run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairSummary {
    /// Platforms probed, in completion order
    pub attempted: Vec<String>,
    /// open → half_open
    pub promoted: Vec<String>,
    /// half_open → closed
    pub closed: Vec<String>,
    /// half_open → open
    pub reopened: Vec<String>,
    /// open → defunct
    pub demoted: Vec<String>,
    /// Failed repair, still counting toward demotion: (id, failed attempts)
    pub still_open: Vec<(String, u32)>,
    /// Circuits whose platform is no longer configured
    pub skipped: Vec<String>,
    /// Not reached before the aggregate budget expired
    pub inconclusive: Vec<String>,
    /// Probed, but the result could not be applied
    pub unrecorded: Vec<String>,
    pub timed_out: bool,
    pub counts: StatusCounts,
}

impl RepairSummary {
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            EXIT_TIMEOUT
        } else {
            EXIT_OK
        }
    }

    pub fn render(&self) -> String {
        if self.attempted.is_empty() && self.inconclusive.is_empty() && self.skipped.is_empty() {
            return format!("repair: no open circuits ({})", self.counts);
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "repair: {} attempted, {} promoted, {} closed, {} reopened, {} demoted",
            self.attempted.len(),
            self.promoted.len(),
            self.closed.len(),
            self.reopened.len(),
            self.demoted.len()
        );
        for id in &self.promoted {
            let _ = writeln!(out, "  {}: open -> half_open", id);
        }
        for id in &self.closed {
            let _ = writeln!(out, "  {}: half_open -> closed", id);
        }
        for id in &self.reopened {
            let _ = writeln!(out, "  {}: half_open -> open", id);
        }
        for id in &self.demoted {
            let _ = writeln!(out, "  {}: open -> defunct", id);
        }
        for (id, attempts) in &self.still_open {
            let _ = writeln!(out, "  {}: still open ({} failed repairs)", id, attempts);
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "skipped (not configured): {}", self.skipped.join(", "));
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

/// Medium-interval repair of `open` and `half_open` circuits
pub struct RecoveryWorkflow<P> {
    prober: P,
    store: CircuitStore,
    limits: BatchLimits,
}

impl<P: Prober> RecoveryWorkflow<P> {
    pub fn new(prober: P, store: CircuitStore, limits: BatchLimits) -> Self {
        Self {
            prober,
            store,
            limits,
        }
    }

    pub fn store(&self) -> &CircuitStore {
        &self.store
    }

    pub async fn repair_open_circuits(&self, platforms: &[PlatformSpec]) -> RepairSummary {
        let mut summary = RepairSummary::default();
        let configured: BTreeMap<&str, &PlatformSpec> =
            platforms.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut targets = Vec::new();
        for circuit in self.store.snapshot().into_values() {
            if !matches!(circuit.status, CircuitStatus::Open | CircuitStatus::HalfOpen) {
                continue;
            }
            match configured.get(circuit.platform_id.as_str()) {
                Some(spec) => targets.push((*spec).clone()),
                None => {
                    warn!(platform = %circuit.platform_id, "Skipping repair: platform not configured");
                    summary.skipped.push(circuit.platform_id);
                }
            }
        }

        if targets.is_empty() {
            summary.counts = StatusCounts::from_snapshot(&self.store.snapshot());
            info!("No open circuits to repair");
            return summary;
        }

        info!(targets = targets.len(), "Starting repair run");

        let batch = run_batch(&self.prober, &targets, self.limits, |result| {
            let store = self.store.clone();
            fail_open_blocking("circuit_store_record", move || {
                let applied = store.record(Trigger::Repair, &result)?;
                let attempts = store.get(&result.platform_id).failure_count;
                Ok((applied, attempts))
            })
        })
        .await;

        for done in batch.completed {
            let id = done.result.platform_id;
            summary.attempted.push(id.clone());

            let Some((applied, attempts)) = done.recorded else {
                summary.unrecorded.push(id);
                continue;
            };

            match applied {
                Applied::Transitioned { from, to } => match (from, to) {
                    (CircuitStatus::Open, CircuitStatus::HalfOpen) => summary.promoted.push(id),
                    (CircuitStatus::HalfOpen, CircuitStatus::Closed) => summary.closed.push(id),
                    (CircuitStatus::HalfOpen, CircuitStatus::Open) => summary.reopened.push(id),
                    (_, CircuitStatus::Defunct) => summary.demoted.push(id),
                    _ => summary.unrecorded.push(id),
                },
                Applied::Updated { .. } => summary.still_open.push((id, attempts)),
                Applied::Ignored { .. } => summary.unrecorded.push(id),
            }
        }

        summary.inconclusive = batch.inconclusive;
        summary.timed_out = batch.timed_out;
        summary.counts = StatusCounts::from_snapshot(&self.store.snapshot());

        info!(
            attempted = summary.attempted.len(),
            promoted = summary.promoted.len(),
            closed = summary.closed.len(),
            reopened = summary.reopened.len(),
            demoted = summary.demoted.len(),
            timed_out = summary.timed_out,
            "Repair run finished: {}",
            summary.counts
        );
        summary
    }
}
