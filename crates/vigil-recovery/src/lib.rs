//! # vigil-recovery
//!
//! Self-healing workflows for the circuit store.
//!
//! - [`RecoveryWorkflow`] repairs `open` circuits and demotes platforms
//!   that never recover to `defunct`
//! - [`DefunctRechecker`] gives `defunct` platforms one more chance on a
//!   long interval

pub mod repair;
pub mod sweep;

pub use repair::{RecoveryWorkflow, RepairSummary};
pub use sweep::{DefunctRechecker, SweepSummary};
