//! Uptime history and trend analysis
//!
//! Each completed probe batch appends one compact sample
//! (`{"ts": <ms>, "r": {"<platform>": 1|0}}`). The file is bounded to the
//! newest `max_entries` samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use vigil_core::{ProbeResult, Result};

use crate::file::JsonFile;

/// File name of the history inside the state directory
pub const HISTORY_FILE: &str = "uptime-history.json";

const HOUR_MS: i64 = 3_600_000;

/// Longest lookback [`analyze_trends`] honours; larger windows are clamped
pub const MAX_TREND_HOURS: u64 = 24 * 366;

/// Samples needed in the lookback window before a trend is reported
const MIN_RECENT_PROBES: usize = 3;

/// Percentage points between recent and all-time uptime that count as a trend
const TREND_DELTA: f64 = 10.0;

/// One probe batch: platform id → 1 (ok) / 0 (failed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub ts: i64,
    pub r: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeHistory {
    #[serde(default)]
    pub probes: Vec<ProbeSample>,
}

/// Bounded append-only sample log
#[derive(Debug, Clone)]
pub struct HistoryStore {
    file: JsonFile,
    max_entries: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize, lock_timeout: Duration) -> Self {
        Self {
            file: JsonFile::new(path, lock_timeout),
            max_entries,
        }
    }

    /// History at `<state_dir>/uptime-history.json`
    pub fn in_dir(state_dir: &Path, max_entries: usize, lock_timeout: Duration) -> Self {
        Self::new(state_dir.join(HISTORY_FILE), max_entries, lock_timeout)
    }

    pub fn load(&self) -> UptimeHistory {
        self.file.load_or_default()
    }

    /// Append one sample built from a batch of results.
    ///
    /// Returns the number of samples kept. An empty batch is not recorded.
    pub fn append(&self, results: &[ProbeResult], at: DateTime<Utc>) -> Result<usize> {
        if results.is_empty() {
            return Ok(self.load().probes.len());
        }

        let sample = ProbeSample {
            ts: at.timestamp_millis(),
            r: results
                .iter()
                .map(|r| (r.platform_id.clone(), u8::from(r.outcome.is_ok())))
                .collect(),
        };
        let max = self.max_entries.max(1);

        let kept = self.file.update(|history: &mut UptimeHistory| {
            history.probes.push(sample);
            if history.probes.len() > max {
                let excess = history.probes.len() - max;
                history.probes.drain(..excess);
            }
            history.probes.len()
        })?;

        debug!(platforms = results.len(), kept, "Appended uptime sample");
        Ok(kept)
    }
}

/// Direction of recent uptime against the all-time rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Improving,
    Declining,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient_data"),
            Self::Improving => write!(f, "improving"),
            Self::Declining => write!(f, "declining"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformTrend {
    pub uptime_all: f64,
    pub uptime_recent: f64,
    pub probes_all: usize,
    pub probes_recent: usize,
    pub trend: Trend,
    /// Uptime percentage per hour of the lookback, oldest first
    pub hourly_uptime: Vec<Option<u32>>,
    /// "up" or "down" per the newest sample containing the platform
    pub last_status: String,
    pub first_seen_ago_h: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub period_hours: u64,
    pub total_probes: usize,
    pub recent_probes: usize,
    pub platforms: BTreeMap<String, PlatformTrend>,
}

/// Per-platform uptime trends over the last `hours`.
///
/// `filter` keeps platforms whose id contains it (case-insensitive).
/// `hours` is clamped to [`MAX_TREND_HOURS`].
pub fn analyze_trends(
    history: &UptimeHistory,
    hours: u64,
    filter: Option<&str>,
    now: DateTime<Utc>,
) -> TrendReport {
    let hours = hours.min(MAX_TREND_HOURS);
    let now_ms = now.timestamp_millis();
    let cutoff = now_ms.saturating_sub(hours as i64 * HOUR_MS);
    let recent: Vec<&ProbeSample> = history.probes.iter().filter(|p| p.ts > cutoff).collect();

    let filter = filter.map(str::to_lowercase);
    let platforms: BTreeSet<&String> = history
        .probes
        .iter()
        .flat_map(|p| p.r.keys())
        .filter(|id| match &filter {
            Some(f) => id.to_lowercase().contains(f.as_str()),
            None => true,
        })
        .collect();

    let mut results = BTreeMap::new();
    for id in platforms {
        let (up_all, total_all) = count(history.probes.iter(), id);
        let (up_recent, total_recent) = count(recent.iter().copied(), id);
        let uptime_all = percent(up_all, total_all);
        let uptime_recent = percent(up_recent, total_recent);

        let trend = if total_recent < MIN_RECENT_PROBES {
            Trend::InsufficientData
        } else if uptime_recent > uptime_all + TREND_DELTA {
            Trend::Improving
        } else if uptime_recent < uptime_all - TREND_DELTA {
            Trend::Declining
        } else {
            Trend::Stable
        };

        let mut buckets = vec![(0u32, 0u32); hours as usize];
        for p in &recent {
            if let Some(v) = p.r.get(id) {
                let idx = (p.ts.saturating_sub(cutoff) / HOUR_MS) as usize;
                if let Some(bucket) = buckets.get_mut(idx) {
                    bucket.1 += 1;
                    bucket.0 += u32::from(*v == 1);
                }
            }
        }
        let hourly_uptime = buckets
            .into_iter()
            .map(|(up, total)| (total > 0).then(|| (up * 100 + total / 2) / total))
            .collect();

        let last_up = history
            .probes
            .iter()
            .rev()
            .find_map(|p| p.r.get(id))
            .map(|v| *v == 1)
            .unwrap_or(false);

        let first_seen_ago_h = history
            .probes
            .iter()
            .filter(|p| p.r.contains_key(id))
            .map(|p| p.ts)
            .min()
            .map(|first| round1(now_ms.saturating_sub(first) as f64 / HOUR_MS as f64));

        results.insert(
            id.clone(),
            PlatformTrend {
                uptime_all,
                uptime_recent,
                probes_all: total_all,
                probes_recent: total_recent,
                trend,
                hourly_uptime,
                last_status: if last_up { "up" } else { "down" }.to_string(),
                first_seen_ago_h,
            },
        );
    }

    TrendReport {
        period_hours: hours,
        total_probes: history.probes.len(),
        recent_probes: recent.len(),
        platforms: results,
    }
}

fn count<'a>(samples: impl Iterator<Item = &'a ProbeSample>, id: &str) -> (usize, usize) {
    samples
        .filter_map(|p| p.r.get(id))
        .fold((0, 0), |(up, total), v| (up + usize::from(*v == 1), total + 1))
}

fn percent(up: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(up as f64 / total as f64 * 100.0)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
