//! TTL probe cache
//!
//! Memoizes the output and exit status of a probe/repair run per use-site
//! key, so bulk probes run at most once per TTL window however often the
//! hook fires. Replays are verbatim: same output, same exit code.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_core::fail_open::fail_open_blocking;
use vigil_core::{CacheEntry, CachedRun, EXIT_TIMEOUT};

use crate::file::JsonFile;

/// File name of the cache inside the state directory
pub const CACHE_FILE: &str = "probe-cache.json";

/// Result of [`ProbeCache::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    pub entry: CacheEntry,
    pub from_cache: bool,
}

impl CacheOutcome {
    pub fn payload(&self) -> &CachedRun {
        &self.entry.payload
    }
}

/// Key → entry cache persisted as one JSON object
#[derive(Debug, Clone)]
pub struct ProbeCache {
    file: JsonFile,
}

impl ProbeCache {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            file: JsonFile::new(path, lock_timeout),
        }
    }

    /// Cache at `<state_dir>/probe-cache.json`
    pub fn in_dir(state_dir: &Path, lock_timeout: Duration) -> Self {
        Self::new(state_dir.join(CACHE_FILE), lock_timeout)
    }

    /// A fresh entry for `key`, if any
    pub fn lookup(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries: BTreeMap<String, CacheEntry> = self.file.load_or_default();
        entries
            .remove(key)
            .filter(|e| e.is_fresh(now, ttl.as_secs()))
    }

    /// Replay a fresh entry or run `job` and remember its output
    pub async fn run<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        session_id: u64,
        timeout: Duration,
        job: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedRun>,
    {
        self.run_at(Utc::now(), key, ttl, session_id, timeout, job)
            .await
    }

    /// [`run`](Self::run) with an explicit clock
    ///
    /// A run that exceeds `timeout`, or reports the timeout exit code
    /// itself, is returned but not stored: an inconclusive run says nothing
    /// worth replaying. The store write runs off the runtime thread and
    /// waits at most the lock timeout.
    pub async fn run_at<F, Fut>(
        &self,
        now: DateTime<Utc>,
        key: &str,
        ttl: Duration,
        session_id: u64,
        timeout: Duration,
        job: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedRun>,
    {
        if let Some(entry) = self.lookup(key, ttl, now) {
            info!(
                key,
                age_secs = entry.age(now).num_seconds(),
                stored_session = entry.session_id,
                exit_code = entry.payload.exit_code,
                "Probe cache hit"
            );
            return CacheOutcome {
                entry,
                from_cache: true,
            };
        }

        debug!(key, ttl_secs = ttl.as_secs(), "Probe cache miss, running job");
        let payload = match tokio::time::timeout(timeout, job()).await {
            Ok(payload) => payload,
            Err(_) => {
                warn!(key, timeout_secs = timeout.as_secs(), "Cached job timed out");
                CachedRun::new(
                    format!(
                        "{}: inconclusive, exceeded {}s budget; using last persisted state",
                        key,
                        timeout.as_secs()
                    ),
                    EXIT_TIMEOUT,
                )
            }
        };

        let entry = CacheEntry {
            key: key.to_string(),
            stored_at: now,
            ttl_seconds: ttl.as_secs(),
            session_id,
            payload,
        };

        if entry.payload.timed_out() {
            return CacheOutcome {
                entry,
                from_cache: false,
            };
        }

        let file = self.file.clone();
        let stored = entry.clone();
        fail_open_blocking("probe_cache_store", move || {
            file.update(|entries: &mut BTreeMap<String, CacheEntry>| {
                entries.insert(stored.key.clone(), stored);
            })
        })
        .await;

        CacheOutcome {
            entry,
            from_cache: false,
        }
    }
}
