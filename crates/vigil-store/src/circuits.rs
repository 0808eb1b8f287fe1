//! Persisted circuit records
//!
//! The store file is a JSON object keyed by platform id. Consumers read it
//! directly; a missing or corrupt file means "every platform closed".

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_core::{apply, Applied, Circuit, CircuitStatus, ProbeResult, Result, Thresholds, Trigger};

use crate::file::JsonFile;

/// Snapshot of every circuit, keyed by platform id
pub type CircuitMap = BTreeMap<String, Circuit>;

/// File name of the circuit store inside the state directory
pub const CIRCUITS_FILE: &str = "circuits.json";

/// The circuit store
#[derive(Debug, Clone)]
pub struct CircuitStore {
    file: JsonFile,
    thresholds: Thresholds,
}

impl CircuitStore {
    pub fn new(path: impl Into<PathBuf>, thresholds: Thresholds, lock_timeout: Duration) -> Self {
        Self {
            file: JsonFile::new(path, lock_timeout),
            thresholds,
        }
    }

    /// Store at `<state_dir>/circuits.json`
    pub fn in_dir(state_dir: &Path, thresholds: Thresholds, lock_timeout: Duration) -> Self {
        Self::new(state_dir.join(CIRCUITS_FILE), thresholds, lock_timeout)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Latest persisted state; never fails
    pub fn snapshot(&self) -> CircuitMap {
        self.file.load_or_default()
    }

    /// One circuit, defaulting to a fresh closed record
    pub fn get(&self, platform_id: &str) -> Circuit {
        self.snapshot()
            .remove(platform_id)
            .unwrap_or_else(|| Circuit::new(platform_id))
    }

    /// Platform ids currently in `status`
    pub fn ids_with_status(&self, status: CircuitStatus) -> Vec<String> {
        self.snapshot()
            .into_values()
            .filter(|c| c.status == status)
            .map(|c| c.platform_id)
            .collect()
    }

    /// Apply one probe result as a single locked read-modify-write.
    ///
    /// The circuit is created lazily (closed, zero counters) if this is the
    /// first time the platform is seen.
    pub fn record(&self, trigger: Trigger, result: &ProbeResult) -> Result<Applied> {
        let thresholds = self.thresholds.clone();
        let applied = self.file.update(|circuits: &mut CircuitMap| {
            let circuit = circuits
                .entry(result.platform_id.clone())
                .or_insert_with(|| Circuit::new(&result.platform_id));
            apply(circuit, trigger, result, &thresholds)
        })?;

        match &applied {
            Applied::Transitioned { from, to } => info!(
                platform = %result.platform_id,
                %trigger,
                %from,
                %to,
                outcome = %result.outcome,
                detail = %result.detail,
                "Circuit transitioned"
            ),
            Applied::Updated { status } => debug!(
                platform = %result.platform_id,
                %trigger,
                %status,
                outcome = %result.outcome,
                "Circuit updated"
            ),
            Applied::Ignored { status, trigger } => warn!(
                platform = %result.platform_id,
                %trigger,
                %status,
                "Result ignored: circuit not in a state this workflow may change"
            ),
        }

        Ok(applied)
    }

    /// Claim the single trial use of a half-open circuit.
    ///
    /// Returns `true` if this call claimed it, `false` if the circuit is not
    /// half-open or the trial was already taken.
    pub fn claim_trial(&self, platform_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let claimed = self.file.update(|circuits: &mut CircuitMap| {
            match circuits.get_mut(platform_id) {
                Some(c) if c.status == CircuitStatus::HalfOpen && c.trial_claimed_at.is_none() => {
                    c.trial_claimed_at = Some(at);
                    true
                }
                _ => false,
            }
        })?;

        if claimed {
            info!(platform = %platform_id, "Claimed half-open trial");
        }
        Ok(claimed)
    }
}
