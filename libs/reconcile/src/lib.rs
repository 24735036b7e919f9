//! Reconciliation loop primitives.
//!
//! This library provides the pieces of the reconciliation loop that are
//! shared between the engine and the status-reporting service:
//!
//! - **Status tracking**: a live, in-memory projection of each environment's
//!   pipeline stage, served to external watchers.
//! - **Convergence classification**: deployed / converging / failed.
//! - **Stall detection**: an optional ceiling on how many passes an
//!   environment may spend waiting in the same stage.
//!
//! # Invariants
//!
//! - Only [`StatusTracker::track`] mutates tracking entries
//! - `last_stage` always equals the stage of the preceding `track` call
//! - Locks are held for map access only, never across cluster I/O

use std::time::Duration;

use kiln_api::Stage;

mod stall;
mod tracker;

pub use stall::StallTracker;
pub use tracker::{StatusTracker, TrackingInfo, TrackingKey};

/// Convergence status for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// The requested revision is running.
    Converged,

    /// The pipeline is still moving toward the requested revision.
    Converging,

    /// The pipeline halted in a failure sink (requires a new revision).
    Diverged,
}

impl ConvergenceStatus {
    /// Classify a pipeline stage.
    pub fn from_stage(stage: Stage) -> Self {
        if stage == Stage::Deployed {
            Self::Converged
        } else if stage.is_failure() {
            Self::Diverged
        } else {
            Self::Converging
        }
    }

    /// Returns true if the environment has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the environment is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}

/// Delay before re-running a pass that ended in a non-terminal stage.
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Delay before re-running a pass that returned an error.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);
