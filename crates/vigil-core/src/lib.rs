//! # vigil-core
//!
//! Core types for Vigil, the platform liveness and circuit-breaker
//! subsystem of an autonomous agent harness.
//!
//! Before an agent spends budget on an external platform, Vigil answers
//! "is it reachable, degraded, or gone?" cheaply and without ever blocking
//! the session.
//!
//! ## Core Paradigm
//!
//! - One circuit per platform (`closed`, `open`, `half_open`, `defunct`)
//! - Transitions are a pure function of (circuit, trigger, outcome)
//! - Probe failures are data recorded on circuits, never errors
//! - Every infrastructure failure degrades to the last persisted state

pub mod circuit;
pub mod config;
pub mod eligibility;
mod error;
pub mod fail_open;
pub mod schedule;
mod types;

pub use circuit::{apply, apply_outcome, Applied, Trigger};
pub use config::{
    CacheSettings, HistorySettings, PolicySettings, ProbeSettings, ScheduleSettings,
    StoreSettings, Thresholds, VigilConfig,
};
pub use eligibility::{eligibility, eligible_platforms, Eligibility, HalfOpenPolicy, StatusCounts};
pub use error::{Result, VigilError};
pub use schedule::{Interval, IntervalScheduler, JobSchedule, RunMark, Scheduler, SessionClock};
pub use types::*;
