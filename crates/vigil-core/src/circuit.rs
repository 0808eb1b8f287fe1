//! Pure circuit state machine
//!
//! This module implements the per-platform circuit transitions with NO I/O.
//! The store reads a record, calls [`apply`], and writes the record back.
//!
//! ```text
//!            probe fail x F            repair ok
//!  closed ─────────────────▶ open ──────────────▶ half_open
//!    ▲                        │  ▲                  │   │
//!    │                        │  └── probe/repair ──┘   │
//!    │   sweep ok             │        fail             │ probe/repair ok
//!    ├──────────── defunct ◀──┘ repair fail x D         │
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! Key design principles:
//! - Every (status, trigger) pair not on an edge above is ignored, leaving
//!   the record untouched. This is what keeps normal probes off open
//!   circuits and makes recovery the only way out of `open`.
//! - Never panics; counters saturate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::types::{Circuit, CircuitStatus, ProbeOutcome, ProbeResult};

/// Which workflow produced the result being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Normal liveness probe
    Probe,
    /// Recovery workflow repair probe
    Repair,
    /// Long-interval defunct sweep
    Sweep,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Repair => write!(f, "repair"),
            Self::Sweep => write!(f, "sweep"),
        }
    }
}

/// What applying a result did to a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Applied {
    /// Counters/diagnostics updated, status unchanged
    Updated { status: CircuitStatus },
    /// Status changed
    Transitioned {
        from: CircuitStatus,
        to: CircuitStatus,
    },
    /// Not a legal edge for this trigger; record untouched
    Ignored {
        status: CircuitStatus,
        trigger: Trigger,
    },
}

impl Applied {
    pub fn is_transition_to(&self, status: CircuitStatus) -> bool {
        matches!(self, Self::Transitioned { to, .. } if *to == status)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }

    /// Status after the update
    pub fn status(&self) -> CircuitStatus {
        match self {
            Self::Updated { status } | Self::Ignored { status, .. } => *status,
            Self::Transitioned { to, .. } => *to,
        }
    }
}

/// Apply one probe result to a circuit.
///
/// `result.timestamp` is used as "now" for every timestamp written, so
/// replays and tests are deterministic.
pub fn apply(
    circuit: &mut Circuit,
    trigger: Trigger,
    result: &ProbeResult,
    thresholds: &Thresholds,
) -> Applied {
    apply_outcome(
        circuit,
        trigger,
        result.outcome,
        &result.detail,
        result.timestamp,
        thresholds,
    )
}

/// Like [`apply`] but with the result fields passed separately
pub fn apply_outcome(
    circuit: &mut Circuit,
    trigger: Trigger,
    outcome: ProbeOutcome,
    detail: &str,
    at: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Applied {
    use CircuitStatus::*;

    let from = circuit.status;
    let ok = outcome.is_ok();

    match (from, trigger, ok) {
        // Closed: only normal probes
        (Closed, Trigger::Probe, true) => {
            record_success(circuit, at);
            circuit.failure_count = 0;
        }
        (Closed, Trigger::Probe, false) => {
            record_failure(circuit, outcome, detail, at);
            circuit.failure_count = circuit.failure_count.saturating_add(1);
            if circuit.failure_count >= thresholds.failure_threshold.max(1) {
                enter(circuit, Open, at);
            }
        }

        // Open: only the recovery workflow
        (Open, Trigger::Repair, true) => {
            record_success(circuit, at);
            enter(circuit, HalfOpen, at);
            circuit.success_count = 1;
        }
        (Open, Trigger::Repair, false) => {
            record_failure(circuit, outcome, detail, at);
            circuit.failure_count = circuit.failure_count.saturating_add(1);
            let limit = thresholds.defunct_after_attempts.max(1);
            if circuit.failure_count >= limit {
                enter(circuit, Defunct, at);
                circuit.last_failure_reason = Some(format!(
                    "no successful repair in {} attempts: {}: {}",
                    limit, outcome, detail
                ));
            }
        }

        // Half-open: a normal probe or a repair decides
        (HalfOpen, Trigger::Probe | Trigger::Repair, true) => {
            record_success(circuit, at);
            enter(circuit, Closed, at);
        }
        (HalfOpen, Trigger::Probe | Trigger::Repair, false) => {
            record_failure(circuit, outcome, detail, at);
            enter(circuit, Open, at);
        }

        // Defunct: only the sweep, and success skips half-open
        (Defunct, Trigger::Sweep, true) => {
            record_success(circuit, at);
            enter(circuit, Closed, at);
        }
        (Defunct, Trigger::Sweep, false) => {
            record_failure(circuit, outcome, detail, at);
        }

        (status, trigger, _) => return Applied::Ignored { status, trigger },
    }

    if circuit.status == from {
        Applied::Updated { status: from }
    } else {
        Applied::Transitioned {
            from,
            to: circuit.status,
        }
    }
}

fn record_success(circuit: &mut Circuit, at: DateTime<Utc>) {
    circuit.last_probe_at = Some(at);
    circuit.last_success_at = Some(at);
    circuit.success_count = circuit.success_count.saturating_add(1);
}

fn record_failure(circuit: &mut Circuit, outcome: ProbeOutcome, detail: &str, at: DateTime<Utc>) {
    circuit.last_probe_at = Some(at);
    circuit.success_count = 0;
    circuit.last_failure_reason = Some(if detail.is_empty() {
        outcome.to_string()
    } else {
        format!("{}: {}", outcome, detail)
    });
}

/// Move to `status`, resetting counters and entry timestamps so exactly
/// one of them (or none, for closed) is set
fn enter(circuit: &mut Circuit, status: CircuitStatus, at: DateTime<Utc>) {
    circuit.status = status;
    circuit.failure_count = 0;
    circuit.success_count = 0;
    circuit.opened_at = None;
    circuit.half_open_since = None;
    circuit.defunct_since = None;
    circuit.trial_claimed_at = None;
    match status {
        CircuitStatus::Closed => {}
        CircuitStatus::Open => circuit.opened_at = Some(at),
        CircuitStatus::HalfOpen => circuit.half_open_since = Some(at),
        CircuitStatus::Defunct => circuit.defunct_since = Some(at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn thresholds() -> Thresholds {
        Thresholds {
            failure_threshold: 3,
            defunct_after_attempts: 10,
        }
    }

    fn result(outcome: ProbeOutcome) -> ProbeResult {
        ProbeResult::new("p1", outcome, 12, "detail")
    }

    fn open_circuit() -> Circuit {
        let mut c = Circuit::new("p1");
        for _ in 0..3 {
            apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Timeout), &thresholds());
        }
        assert_eq!(c.status, CircuitStatus::Open);
        c
    }

    #[test]
    fn test_closed_opens_after_threshold() {
        let mut c = Circuit::new("p1");
        let t = thresholds();

        let a = apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Timeout), &t);
        assert_eq!(a, Applied::Updated { status: CircuitStatus::Closed });
        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Timeout), &t);
        assert_eq!(c.failure_count, 2);

        let a = apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Timeout), &t);
        assert!(a.is_transition_to(CircuitStatus::Open));
        assert_eq!(c.failure_count, 0);
        assert!(c.opened_at.is_some());
        assert!(c.timestamps_consistent());
        assert_eq!(c.last_failure_reason.as_deref(), Some("timeout: detail"));
    }

    #[test]
    fn test_success_resets_failures_and_blocks_opening() {
        let mut c = Circuit::new("p1");
        let t = thresholds();

        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::HttpError), &t);
        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Unreachable), &t);
        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Ok), &t);
        assert_eq!(c.failure_count, 0);

        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::AuthError), &t);
        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::AuthError), &t);
        assert_eq!(c.status, CircuitStatus::Closed);
        assert_eq!(c.failure_count, 2);
    }

    #[test]
    fn test_repeated_ok_is_idempotent_on_status() {
        let mut c = Circuit::new("p1");
        let t = thresholds();
        let r = result(ProbeOutcome::Ok);

        apply(&mut c, Trigger::Probe, &r, &t);
        let once = c.clone();
        apply(&mut c, Trigger::Probe, &r, &t);

        assert_eq!(c.status, once.status);
        assert_eq!(c.failure_count, 0);
        assert_eq!(c.success_count, once.success_count + 1);
        assert_eq!(c.last_success_at, once.last_success_at);
    }

    #[test]
    fn test_normal_probe_ignores_open_circuit() {
        let mut c = open_circuit();
        let before = c.clone();
        let a = apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Ok), &thresholds());
        assert!(a.is_ignored());
        assert_eq!(c, before);
    }

    #[test]
    fn test_repair_success_moves_open_to_half_open() {
        let mut c = open_circuit();
        let a = apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &thresholds());
        assert!(a.is_transition_to(CircuitStatus::HalfOpen));
        assert!(c.half_open_since.is_some());
        assert!(c.opened_at.is_none());
        assert!(c.timestamps_consistent());
    }

    #[test]
    fn test_half_open_success_closes() {
        let mut c = open_circuit();
        let t = thresholds();
        apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &t);
        let a = apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &t);
        assert!(a.is_transition_to(CircuitStatus::Closed));
        assert_eq!(c.failure_count, 0);
        assert_eq!(c.success_count, 0);
        assert!(c.timestamps_consistent());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut c = open_circuit();
        let t = thresholds();
        apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &t);

        let later = ProbeResult::new("p1", ProbeOutcome::Timeout, 4000, "slow")
            .at(Utc::now() + Duration::minutes(10));
        let a = apply(&mut c, Trigger::Probe, &later, &t);
        assert_eq!(
            a,
            Applied::Transitioned {
                from: CircuitStatus::HalfOpen,
                to: CircuitStatus::Open
            }
        );
        assert_eq!(c.opened_at, Some(later.timestamp));
        assert!(c.timestamps_consistent());
    }

    #[test]
    fn test_repeated_repair_failure_goes_defunct() {
        let mut c = open_circuit();
        let t = thresholds();
        for i in 1..10 {
            let a = apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Unreachable), &t);
            assert_eq!(a, Applied::Updated { status: CircuitStatus::Open });
            assert_eq!(c.failure_count, i);
        }
        let a = apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Unreachable), &t);
        assert!(a.is_transition_to(CircuitStatus::Defunct));
        assert!(c.defunct_since.is_some());
        assert!(c.timestamps_consistent());
        assert!(c
            .last_failure_reason
            .as_deref()
            .unwrap()
            .starts_with("no successful repair in 10 attempts"));
    }

    #[test]
    fn test_closed_never_jumps_to_defunct() {
        let mut c = Circuit::new("p1");
        let t = Thresholds {
            failure_threshold: 1,
            defunct_after_attempts: 1,
        };
        for trigger in [Trigger::Repair, Trigger::Sweep, Trigger::Probe] {
            apply(&mut c, trigger, &result(ProbeOutcome::Unreachable), &t);
            assert_ne!(c.status, CircuitStatus::Defunct);
        }
        assert_eq!(c.status, CircuitStatus::Open);
    }

    #[test]
    fn test_only_sweep_touches_defunct() {
        let mut c = open_circuit();
        let t = Thresholds {
            failure_threshold: 3,
            defunct_after_attempts: 1,
        };
        apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Timeout), &t);
        assert_eq!(c.status, CircuitStatus::Defunct);

        assert!(apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Ok), &t).is_ignored());
        assert!(apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &t).is_ignored());

        let a = apply(&mut c, Trigger::Sweep, &result(ProbeOutcome::Timeout), &t);
        assert_eq!(a, Applied::Updated { status: CircuitStatus::Defunct });
        assert!(c.defunct_since.is_some());

        let a = apply(&mut c, Trigger::Sweep, &result(ProbeOutcome::Ok), &t);
        assert!(a.is_transition_to(CircuitStatus::Closed));
        assert!(c.defunct_since.is_none());
        assert!(c.timestamps_consistent());
    }

    #[test]
    fn test_leaving_half_open_clears_trial_claim() {
        let mut c = open_circuit();
        let t = thresholds();
        apply(&mut c, Trigger::Repair, &result(ProbeOutcome::Ok), &t);
        c.trial_claimed_at = Some(Utc::now());
        apply(&mut c, Trigger::Probe, &result(ProbeOutcome::Ok), &t);
        assert!(c.trial_claimed_at.is_none());
    }
}
