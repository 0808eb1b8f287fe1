//! Consumer eligibility rules
//!
//! Platform selection lives outside this workspace, but every consumer has
//! to agree on which circuits it may use. `open` and `defunct` are never
//! eligible, missing circuits count as `closed`, and `half_open` follows
//! the configured [`HalfOpenPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Circuit, CircuitStatus};

/// How consumers may use a half-open circuit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfOpenPolicy {
    /// Never use half-open platforms
    Exclude,
    /// One trial use, claimed through the store
    #[default]
    Trial,
    /// Treat half-open like closed
    Full,
}

impl std::str::FromStr for HalfOpenPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "trial" | "once" => Ok(Self::Trial),
            "full" => Ok(Self::Full),
            _ => Err(format!("Invalid half-open policy: {}", s)),
        }
    }
}

/// Eligibility of one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    /// Eligible for a single trial use
    Trial,
    Ineligible,
}

impl Eligibility {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Ineligible)
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::Trial => write!(f, "trial"),
            Self::Ineligible => write!(f, "ineligible"),
        }
    }
}

/// Classify one circuit (`None` = never probed = closed)
pub fn eligibility(circuit: Option<&Circuit>, policy: HalfOpenPolicy) -> Eligibility {
    let Some(circuit) = circuit else {
        return Eligibility::Eligible;
    };

    match circuit.status {
        CircuitStatus::Closed => Eligibility::Eligible,
        CircuitStatus::Open | CircuitStatus::Defunct => Eligibility::Ineligible,
        CircuitStatus::HalfOpen => match policy {
            HalfOpenPolicy::Exclude => Eligibility::Ineligible,
            HalfOpenPolicy::Full => Eligibility::Eligible,
            HalfOpenPolicy::Trial if circuit.trial_claimed_at.is_some() => {
                Eligibility::Ineligible
            }
            HalfOpenPolicy::Trial => Eligibility::Trial,
        },
    }
}

/// Usable candidates among `platform_ids`, in the given order
pub fn eligible_platforms<'a>(
    snapshot: &BTreeMap<String, Circuit>,
    platform_ids: impl IntoIterator<Item = &'a str>,
    policy: HalfOpenPolicy,
) -> Vec<(String, Eligibility)> {
    platform_ids
        .into_iter()
        .filter_map(|id| {
            let e = eligibility(snapshot.get(id), policy);
            e.is_usable().then(|| (id.to_string(), e))
        })
        .collect()
}

/// Circuit counts by status, for one-line summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub defunct: usize,
}

impl StatusCounts {
    pub fn from_snapshot(snapshot: &BTreeMap<String, Circuit>) -> Self {
        let mut counts = Self::default();
        for circuit in snapshot.values() {
            match circuit.status {
                CircuitStatus::Closed => counts.closed += 1,
                CircuitStatus::Open => counts.open += 1,
                CircuitStatus::HalfOpen => counts.half_open += 1,
                CircuitStatus::Defunct => counts.defunct += 1,
            }
        }
        counts
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} closed, {} open, {} half_open, {} defunct",
            self.closed, self.open, self.half_open, self.defunct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn circuit(id: &str, status: CircuitStatus) -> Circuit {
        let mut c = Circuit::new(id);
        c.status = status;
        c
    }

    #[test]
    fn test_missing_circuit_is_eligible() {
        assert_eq!(eligibility(None, HalfOpenPolicy::Exclude), Eligibility::Eligible);
    }

    #[test]
    fn test_open_and_defunct_never_eligible() {
        for policy in [HalfOpenPolicy::Exclude, HalfOpenPolicy::Trial, HalfOpenPolicy::Full] {
            let open = circuit("a", CircuitStatus::Open);
            let dead = circuit("b", CircuitStatus::Defunct);
            assert_eq!(eligibility(Some(&open), policy), Eligibility::Ineligible);
            assert_eq!(eligibility(Some(&dead), policy), Eligibility::Ineligible);
        }
    }

    #[test]
    fn test_half_open_policies() {
        let mut c = circuit("a", CircuitStatus::HalfOpen);
        assert_eq!(eligibility(Some(&c), HalfOpenPolicy::Exclude), Eligibility::Ineligible);
        assert_eq!(eligibility(Some(&c), HalfOpenPolicy::Full), Eligibility::Eligible);
        assert_eq!(eligibility(Some(&c), HalfOpenPolicy::Trial), Eligibility::Trial);

        c.trial_claimed_at = Some(Utc::now());
        assert_eq!(eligibility(Some(&c), HalfOpenPolicy::Trial), Eligibility::Ineligible);
    }

    #[test]
    fn test_eligible_platforms_keeps_order() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("b".to_string(), circuit("b", CircuitStatus::Open));
        snapshot.insert("c".to_string(), circuit("c", CircuitStatus::HalfOpen));

        let picked = eligible_platforms(&snapshot, ["c", "b", "a"], HalfOpenPolicy::Trial);
        assert_eq!(
            picked,
            vec![
                ("c".to_string(), Eligibility::Trial),
                ("a".to_string(), Eligibility::Eligible),
            ]
        );
    }

    #[test]
    fn test_status_counts_summary() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("a".to_string(), circuit("a", CircuitStatus::Open));
        snapshot.insert("b".to_string(), circuit("b", CircuitStatus::Open));
        snapshot.insert("c".to_string(), circuit("c", CircuitStatus::Defunct));
        let counts = StatusCounts::from_snapshot(&snapshot);
        assert_eq!(counts.open, 2);
        assert_eq!(counts.to_string(), "0 closed, 2 open, 0 half_open, 1 defunct");
    }
}
