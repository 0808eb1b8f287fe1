//! Core type definitions for Vigil

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process exit code for a run that completed (whatever the platform outcomes)
pub const EXIT_OK: i32 = 0;
/// Process exit code for an ordinary failure (configuration, I/O)
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code for a run cut short by its wall-clock budget
pub const EXIT_TIMEOUT: i32 = 124;

/// Circuit status for one platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Healthy, probed normally
    #[default]
    Closed,
    /// Failing fast; only repair probes may touch it
    Open,
    /// Repaired once, cautiously retrying
    HalfOpen,
    /// Long-term dead; only the defunct sweep may touch it
    Defunct,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Defunct => write!(f, "defunct"),
        }
    }
}

impl std::str::FromStr for CircuitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" | "halfopen" | "half-open" => Ok(Self::HalfOpen),
            "defunct" => Ok(Self::Defunct),
            _ => Err(format!("Invalid circuit status: {}", s)),
        }
    }
}

/// Classified outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 2xx / healthy payload
    Ok,
    /// No response within the per-probe budget
    Timeout,
    /// Non-2xx status, or a 2xx with an unhealthy payload
    HttpError,
    /// 401/403 or a credential-shaped failure
    AuthError,
    /// DNS, connection or transport failure
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Timeout => write!(f, "timeout"),
            Self::HttpError => write!(f, "http_error"),
            Self::AuthError => write!(f, "auth_error"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Result of probing one platform. Ephemeral: it only feeds a circuit update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub platform_id: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub outcome: ProbeOutcome,
    /// Free-text reason (status line, error message)
    pub detail: String,
}

impl ProbeResult {
    pub fn new(
        platform_id: impl Into<String>,
        outcome: ProbeOutcome,
        latency_ms: u64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            platform_id: platform_id.into(),
            timestamp: Utc::now(),
            latency_ms,
            outcome,
            detail: detail.into(),
        }
    }

    /// Builder-style override of the timestamp (tests, replays)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Persisted health record for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub platform_id: String,
    #[serde(default)]
    pub status: CircuitStatus,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub last_probe_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_reason: Option<String>,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub half_open_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub defunct_since: Option<DateTime<Utc>>,
    /// Set when a consumer has used the single trial of a half-open circuit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_claimed_at: Option<DateTime<Utc>>,
}

impl Circuit {
    /// A fresh closed circuit with zero counters
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            last_probe_at: None,
            last_success_at: None,
            last_failure_reason: None,
            opened_at: None,
            half_open_since: None,
            defunct_since: None,
            trial_claimed_at: None,
        }
    }

    /// Check that the state-entry timestamps agree with `status`
    pub fn timestamps_consistent(&self) -> bool {
        let set = (
            self.opened_at.is_some(),
            self.half_open_since.is_some(),
            self.defunct_since.is_some(),
        );
        match self.status {
            CircuitStatus::Closed => set == (false, false, false),
            CircuitStatus::Open => set == (true, false, false),
            CircuitStatus::HalfOpen => set == (false, true, false),
            CircuitStatus::Defunct => set == (false, false, true),
        }
    }
}

/// Output of a probe/repair run as stored in the cache and replayed on hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRun {
    pub output: String,
    pub exit_code: i32,
}

impl CachedRun {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT
    }
}

/// A memoized run keyed by use site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub session_id: u64,
    pub payload: CachedRun,
}

impl CacheEntry {
    /// Age of the entry at `now`, clamped at zero for clock skew
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.stored_at).max(chrono::Duration::zero())
    }

    /// Fresh while `now - stored_at < ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        self.age(now).num_seconds() < ttl_seconds as i64
    }
}

/// A tracked platform as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Stable identifier (circuit key)
    pub id: String,
    /// Base URL
    pub url: String,
    /// Paths tried in order before falling back to the base URL
    #[serde(default)]
    pub health_paths: Vec<String>,
    /// Require a JSON body for a 2xx to count as healthy
    #[serde(default)]
    pub expect_json: bool,
}

impl PlatformSpec {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            health_paths: Vec::new(),
            expect_json: false,
        }
    }

    pub fn with_health_paths(mut self, paths: &[&str]) -> Self {
        self.health_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Candidate URLs in probe order: each health path, then the base URL
    pub fn probe_urls(&self) -> Vec<String> {
        let base = self.url.trim_end_matches('/');
        let mut urls: Vec<String> = self
            .health_paths
            .iter()
            .map(|p| format!("{}/{}", base, p.trim_start_matches('/')))
            .collect();
        urls.push(self.url.clone());
        urls
    }
}
