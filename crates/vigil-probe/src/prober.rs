//! Prober abstraction

use async_trait::async_trait;
use vigil_core::{PlatformSpec, ProbeResult};

/// Trait for checking one platform (allows scripted probers in tests)
///
/// Probe failures are data: implementations classify every failure into a
/// [`ProbeOutcome`](vigil_core::ProbeOutcome) and never return an error.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, platform: &PlatformSpec) -> ProbeResult;
}
