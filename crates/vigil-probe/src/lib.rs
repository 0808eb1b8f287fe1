//! # vigil-probe
//!
//! Platform liveness probing.
//!
//! This crate provides:
//! - The [`Prober`] trait with an HTTP implementation and a scripted mock
//! - Bounded-time concurrent probe batches
//! - [`LivenessProbe`], the per-session probe that feeds the circuit store

pub mod batch;
pub mod http;
pub mod liveness;
pub mod mock;
mod prober;

pub use batch::{run_batch, BatchLimits, BatchOutcome, Completed};
pub use http::HttpProber;
pub use liveness::{LivenessProbe, ProbeReport, TransitionNote};
pub use mock::MockProber;
pub use prober::Prober;
