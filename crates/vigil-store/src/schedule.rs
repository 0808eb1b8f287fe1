//! Persisted last-run marks for scheduled jobs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::{Result, RunMark};

use crate::file::JsonFile;

/// File name of the run marks inside the state directory
pub const SCHEDULE_FILE: &str = "schedule.json";

/// Job name → last run
#[derive(Debug, Clone)]
pub struct ScheduleState {
    file: JsonFile,
}

impl ScheduleState {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            file: JsonFile::new(path, lock_timeout),
        }
    }

    pub fn in_dir(state_dir: &Path, lock_timeout: Duration) -> Self {
        Self::new(state_dir.join(SCHEDULE_FILE), lock_timeout)
    }

    pub fn marks(&self) -> BTreeMap<String, RunMark> {
        self.file.load_or_default()
    }

    pub fn last_run(&self, job: &str) -> Option<RunMark> {
        self.marks().remove(job)
    }

    pub fn mark(&self, job: &str, mark: RunMark) -> Result<()> {
        self.file.update(|marks: &mut BTreeMap<String, RunMark>| {
            marks.insert(job.to_string(), mark);
        })
    }
}
