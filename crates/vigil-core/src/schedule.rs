//! Job scheduling gates
//!
//! Replaces "run when `session % N == 0`" with an explicit
//! `should_run(now, last_run, interval)` decision. Counting sessions since
//! the last recorded run means a skipped session never silently skips a
//! whole period, and time-based intervals need no session counter at all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often a job should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// At least this many sessions since the last run
    Sessions(u64),
    /// At least this many minutes since the last run
    Minutes(u64),
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sessions(n) => write!(f, "every {} sessions", n),
            Self::Minutes(m) => write!(f, "every {} minutes", m),
        }
    }
}

/// Cadence plus optional session-type restriction for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub interval: Interval,

    /// Session-type tags the job runs for; empty means all
    #[serde(default)]
    pub session_types: Vec<String>,
}

impl JobSchedule {
    pub fn every(interval: Interval) -> Self {
        Self {
            interval,
            session_types: Vec::new(),
        }
    }

    pub fn for_session_types(mut self, types: &[&str]) -> Self {
        self.session_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn applies_to(&self, session_type: Option<&str>) -> bool {
        if self.session_types.is_empty() {
            return true;
        }
        match session_type {
            Some(t) => self.session_types.iter().any(|s| s.eq_ignore_ascii_case(t)),
            None => false,
        }
    }
}

/// When a job last ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMark {
    pub at: DateTime<Utc>,
    pub session_id: u64,
}

/// The current point in time as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    pub now: DateTime<Utc>,
    pub session_id: u64,
}

impl SessionClock {
    pub fn new(now: DateTime<Utc>, session_id: u64) -> Self {
        Self { now, session_id }
    }

    pub fn mark(&self) -> RunMark {
        RunMark {
            at: self.now,
            session_id: self.session_id,
        }
    }
}

/// Trait for deciding whether a job is due (allows fixed answers in tests)
pub trait Scheduler: Send + Sync {
    fn should_run(&self, now: &SessionClock, last_run: Option<&RunMark>, interval: Interval) -> bool;
}

/// Default scheduler: due once the interval has elapsed since the last run
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalScheduler;

impl Scheduler for IntervalScheduler {
    fn should_run(&self, now: &SessionClock, last_run: Option<&RunMark>, interval: Interval) -> bool {
        let Some(last) = last_run else {
            return true;
        };

        match interval {
            Interval::Sessions(n) => {
                // A counter that went backwards means the state was reset; run.
                if now.session_id < last.session_id {
                    return true;
                }
                now.session_id - last.session_id >= n.max(1)
            }
            Interval::Minutes(m) => {
                if now.now < last.at {
                    return true;
                }
                now.now - last.at >= Duration::minutes(m as i64)
            }
        }
    }
}
