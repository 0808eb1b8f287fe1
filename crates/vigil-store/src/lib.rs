//! # vigil-store
//!
//! File-backed state for Vigil.
//!
//! This crate provides:
//! - The circuit store (`circuits.json`)
//! - The TTL probe cache (`probe-cache.json`)
//! - Uptime history and trend analysis (`uptime-history.json`)
//! - Scheduler run marks (`schedule.json`)
//!
//! Every read-modify-write holds an exclusive lock on a `.lock` sidecar and
//! replaces the file with an atomic rename, so concurrent sessions never
//! lose each other's updates and readers never see a torn file.

pub mod cache;
pub mod circuits;
mod file;
pub mod history;
pub mod schedule;

pub use cache::{CacheOutcome, ProbeCache, CACHE_FILE};
pub use circuits::{CircuitMap, CircuitStore, CIRCUITS_FILE};
pub use file::{JsonFile, Loaded};
pub use history::{
    analyze_trends, HistoryStore, PlatformTrend, ProbeSample, Trend, TrendReport, UptimeHistory,
    HISTORY_FILE, MAX_TREND_HOURS,
};
pub use schedule::{ScheduleState, SCHEDULE_FILE};
