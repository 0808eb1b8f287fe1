//! Configuration management for Vigil
//!
//! This module provides the repository-level Vigil settings: circuit
//! thresholds, probe budgets, cache TTLs, job schedules, the half-open
//! consumption policy and the list of tracked platforms.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::eligibility::HalfOpenPolicy;
use crate::schedule::{Interval, JobSchedule};
use crate::types::PlatformSpec;
use crate::{Result, VigilError};

/// Repository-level Vigil configuration
///
/// Loaded from `.vigil/config.toml` in the root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// State directory, relative to the root unless absolute
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Circuit state machine thresholds
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Probe budgets
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Probe cache defaults
    #[serde(default)]
    pub cache: CacheSettings,

    /// State file locking
    #[serde(default)]
    pub store: StoreSettings,

    /// Uptime history retention
    #[serde(default)]
    pub history: HistorySettings,

    /// Consumer eligibility policy
    #[serde(default)]
    pub policy: PolicySettings,

    /// Job cadence
    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Tracked platforms
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
}

/// Circuit transition thresholds
///
/// Defaults match the long-standing hook settings; they are
/// approximate and meant to be tuned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Consecutive failures that open a closed circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive failed repairs that turn an open circuit defunct
    #[serde(default = "default_defunct_after_attempts")]
    pub defunct_after_attempts: u32,
}

/// Probe timing and concurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Wall-clock budget for a whole batch
    #[serde(default = "default_total_budget_secs")]
    pub total_budget_secs: u64,

    /// Budget for a single platform probe
    #[serde(default = "default_per_probe_timeout_secs")]
    pub per_probe_timeout_secs: u64,

    /// Probes in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// How long to wait for a state file lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_history_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub half_open: HalfOpenPolicy,
}

/// Cadence of the three jobs run from the session hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_probe_schedule")]
    pub probe: JobSchedule,

    #[serde(default = "default_repair_schedule")]
    pub repair: JobSchedule,

    #[serde(default = "default_sweep_schedule")]
    pub sweep: JobSchedule,
}

// Default value providers
fn default_state_dir() -> PathBuf {
    PathBuf::from(".vigil")
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_defunct_after_attempts() -> u32 {
    10
}

fn default_total_budget_secs() -> u64 {
    8
}

fn default_per_probe_timeout_secs() -> u64 {
    4
}

fn default_max_concurrency() -> usize {
    8
}

fn default_user_agent() -> String {
    format!("vigil-probe/{}", env!("CARGO_PKG_VERSION"))
}

fn default_ttl_minutes() -> u64 {
    120
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_history_max_entries() -> usize {
    2000
}

fn default_probe_schedule() -> JobSchedule {
    JobSchedule::every(Interval::Sessions(1))
}

fn default_repair_schedule() -> JobSchedule {
    JobSchedule::every(Interval::Sessions(10))
}

fn default_sweep_schedule() -> JobSchedule {
    JobSchedule::every(Interval::Sessions(100))
}

impl VigilConfig {
    /// Load configuration from `.vigil/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::config_path(root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content).map_err(|e| {
                VigilError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.vigil/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_path = Self::config_path(root);
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| VigilError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".vigil/config.toml")
    }

    /// Resolve the state directory against `root`
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            root.join(&self.state_dir)
        }
    }

    pub fn platform(&self, id: &str) -> Option<&PlatformSpec> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Reject configurations that would make the breaker meaningless
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.failure_threshold == 0 {
            return Err(VigilError::Config(
                "thresholds.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.thresholds.defunct_after_attempts == 0 {
            return Err(VigilError::Config(
                "thresholds.defunct_after_attempts must be at least 1".to_string(),
            ));
        }
        if self.probe.max_concurrency == 0 {
            return Err(VigilError::Config(
                "probe.max_concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for platform in &self.platforms {
            if !seen.insert(platform.id.as_str()) {
                return Err(VigilError::Config(format!(
                    "duplicate platform id: {}",
                    platform.id
                )));
            }
        }
        Ok(())
    }
}

impl ProbeSettings {
    pub fn total_budget(&self) -> Duration {
        Duration::from_secs(self.total_budget_secs)
    }

    pub fn per_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.per_probe_timeout_secs)
    }
}

impl StoreSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            thresholds: Thresholds::default(),
            probe: ProbeSettings::default(),
            cache: CacheSettings::default(),
            store: StoreSettings::default(),
            history: HistorySettings::default(),
            policy: PolicySettings::default(),
            schedule: ScheduleSettings::default(),
            platforms: Vec::new(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            defunct_after_attempts: default_defunct_after_attempts(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            total_budget_secs: default_total_budget_secs(),
            per_probe_timeout_secs: default_per_probe_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_entries: default_history_max_entries(),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            probe: default_probe_schedule(),
            repair: default_repair_schedule(),
            sweep: default_sweep_schedule(),
        }
    }
}
