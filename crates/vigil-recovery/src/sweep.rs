//! Long-interval recheck of defunct platforms
//!
//! A defunct platform gets exactly one probe per sweep. Success returns it
//! straight to `closed`; failure only refreshes its diagnostics.

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

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub checked: Vec<String>,
    /// defunct → closed
    pub revived: Vec<String>,
    pub still_defunct: Vec<String>,
    /// Defunct circuits whose platform is no longer configured
    pub skipped: Vec<String>,
    pub inconclusive: Vec<String>,
    pub unrecorded: Vec<String>,
    pub timed_out: bool,
    pub counts: StatusCounts,
}

impl SweepSummary {
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            EXIT_TIMEOUT
        } else {
            EXIT_OK
        }
    }

    pub fn render(&self) -> String {
        if self.checked.is_empty() && self.inconclusive.is_empty() && self.skipped.is_empty() {
            return format!("sweep: no defunct platforms ({})", self.counts);
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "sweep: {} checked, {} revived, {} still defunct",
            self.checked.len(),
            self.revived.len(),
            self.still_defunct.len()
        );
        for id in &self.revived {
            let _ = writeln!(out, "  {}: defunct -> closed", id);
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

pub struct DefunctRechecker<P> {
    prober: P,
    store: CircuitStore,
    limits: BatchLimits,
}

impl<P: Prober> DefunctRechecker<P> {
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

    /// Probe every defunct circuit once
    ///
    /// Returns immediately, without probing, when nothing is defunct.
    pub async fn sweep_defunct(&self, platforms: &[PlatformSpec]) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let defunct = self.store.ids_with_status(CircuitStatus::Defunct);

        if defunct.is_empty() {
            summary.counts = StatusCounts::from_snapshot(&self.store.snapshot());
            info!("No defunct platforms to sweep");
            return summary;
        }

        let configured: BTreeMap<&str, &PlatformSpec> =
            platforms.iter().map(|p| (p.id.as_str(), p)).collect();
        let mut targets = Vec::new();
        for id in defunct {
            match configured.get(id.as_str()) {
                Some(spec) => targets.push((*spec).clone()),
                None => {
                    warn!(platform = %id, "Skipping sweep: platform not configured");
                    summary.skipped.push(id);
                }
            }
        }

        info!(targets = targets.len(), "Sweeping defunct platforms");

        let batch = run_batch(&self.prober, &targets, self.limits, |result| {
            let store = self.store.clone();
            fail_open_blocking("circuit_store_record", move || {
                store.record(Trigger::Sweep, &result)
            })
        })
        .await;

        for done in batch.completed {
            let id = done.result.platform_id;
            summary.checked.push(id.clone());

            match done.recorded {
                Some(Applied::Transitioned {
                    to: CircuitStatus::Closed,
                    ..
                }) => summary.revived.push(id),
                Some(Applied::Updated {
                    status: CircuitStatus::Defunct,
                }) => summary.still_defunct.push(id),
                _ => summary.unrecorded.push(id),
            }
        }

        summary.inconclusive = batch.inconclusive;
        summary.timed_out = batch.timed_out;
        summary.counts = StatusCounts::from_snapshot(&self.store.snapshot());

        info!(
            checked = summary.checked.len(),
            revived = summary.revived.len(),
            timed_out = summary.timed_out,
            "Defunct sweep finished: {}",
            summary.counts
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;
    use vigil_core::{Circuit, ProbeOutcome, Thresholds};
    use vigil_probe::MockProber;

    const LOCK: Duration = Duration::from_millis(500);

    fn limits() -> BatchLimits {
        BatchLimits {
            total_budget: Duration::from_secs(2),
            per_probe_timeout: Duration::from_millis(500),
            max_concurrency: 4,
        }
    }

    fn platform(id: &str) -> PlatformSpec {
        PlatformSpec::new(id, format!("http://{}.invalid", id))
    }

    fn store_with(dir: &std::path::Path, circuits: &[(&str, CircuitStatus)]) -> CircuitStore {
        let store = CircuitStore::in_dir(dir, Thresholds::default(), LOCK);
        let mut snapshot = BTreeMap::new();
        for (id, status) in circuits {
            let mut c = Circuit::new(*id);
            c.status = *status;
            match status {
                CircuitStatus::Open => c.opened_at = Some(Utc::now()),
                CircuitStatus::HalfOpen => c.half_open_since = Some(Utc::now()),
                CircuitStatus::Defunct => c.defunct_since = Some(Utc::now()),
                CircuitStatus::Closed => {}
            }
            snapshot.insert(id.to_string(), c);
        }
        std::fs::write(store.path(), serde_json::to_string(&snapshot).unwrap()).unwrap();
        store
    }

    #[tokio::test]
    async fn test_zero_defunct_means_zero_probes() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[("a", CircuitStatus::Closed), ("b", CircuitStatus::Open)],
        );
        let prober = MockProber::new();
        let handle = prober.clone();
        let sweeper = DefunctRechecker::new(prober, store, limits());

        let summary = sweeper.sweep_defunct(&[platform("a"), platform("b")]).await;

        assert_eq!(handle.calls(), 0);
        assert!(summary.render().starts_with("sweep: no defunct platforms"));
    }

    #[tokio::test]
    async fn test_revive_and_still_defunct() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[("back", CircuitStatus::Defunct), ("dead", CircuitStatus::Defunct)],
        );
        let prober = MockProber::new()
            .with_outcome("back", ProbeOutcome::Ok)
            .with_outcome("dead", ProbeOutcome::Unreachable);
        let handle = prober.clone();
        let sweeper = DefunctRechecker::new(prober, store, limits());

        let summary = sweeper
            .sweep_defunct(&[platform("back"), platform("dead")])
            .await;

        assert_eq!(handle.calls_for("back"), 1);
        assert_eq!(handle.calls_for("dead"), 1);
        assert_eq!(summary.revived, vec!["back".to_string()]);
        assert_eq!(summary.still_defunct, vec!["dead".to_string()]);

        let back = sweeper.store().get("back");
        assert_eq!(back.status, CircuitStatus::Closed);
        assert!(back.defunct_since.is_none());
        let dead = sweeper.store().get("dead");
        assert_eq!(dead.status, CircuitStatus::Defunct);
        assert!(dead.last_probe_at.is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_defunct_is_skipped() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[("retired", CircuitStatus::Defunct)]);
        let prober = MockProber::new();
        let handle = prober.clone();
        let sweeper = DefunctRechecker::new(prober, store, limits());

        let summary = sweeper.sweep_defunct(&[]).await;

        assert_eq!(handle.calls(), 0);
        assert_eq!(summary.skipped, vec!["retired".to_string()]);
    }
}
