//! Scripted prober for workflow tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use vigil_core::{PlatformSpec, ProbeOutcome, ProbeResult};

use crate::prober::Prober;

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<ProbeOutcome>>,
    fallback: HashMap<String, ProbeOutcome>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
}

/// Mock prober returning scripted outcomes per platform
///
/// Scripted outcomes are consumed in order; once a script runs out the
/// platform's fixed outcome (or `unreachable`) is returned. Clones share
/// state, so a test can keep a handle to count calls.
#[derive(Clone, Default)]
pub struct MockProber {
    state: Arc<Mutex<MockState>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `outcome` for `platform_id`
    pub fn with_outcome(self, platform_id: &str, outcome: ProbeOutcome) -> Self {
        self.lock().fallback.insert(platform_id.to_string(), outcome);
        self
    }

    /// Answer `outcomes` in order for `platform_id`
    pub fn with_script(self, platform_id: &str, outcomes: &[ProbeOutcome]) -> Self {
        self.lock()
            .scripts
            .entry(platform_id.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
        self
    }

    /// Sleep before answering for `platform_id`
    pub fn with_delay(self, platform_id: &str, delay: Duration) -> Self {
        self.lock().delays.insert(platform_id.to_string(), delay);
        self
    }

    /// Total probes issued
    pub fn calls(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_for(&self, platform_id: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == platform_id).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, platform: &PlatformSpec) -> ProbeResult {
        let (outcome, delay) = {
            let mut state = self.lock();
            state.calls.push(platform.id.clone());
            let scripted = state
                .scripts
                .get_mut(&platform.id)
                .and_then(|script| script.pop_front());
            let outcome = scripted
                .or_else(|| state.fallback.get(&platform.id).copied())
                .unwrap_or(ProbeOutcome::Unreachable);
            (outcome, state.delays.get(&platform.id).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        ProbeResult::new(
            &platform.id,
            outcome,
            delay.map(|d| d.as_millis() as u64).unwrap_or(1),
            format!("mock {}", outcome),
        )
    }
}
