//! Stall detection for waiting stages.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use kiln_api::Stage;

/// Counts consecutive passes an environment spends in the same waiting stage.
///
/// With no ceiling configured the tracker never reports exhaustion, which
/// leaves waiting stages unbounded.
#[derive(Debug)]
pub struct StallTracker {
    /// Maximum consecutive passes per stage.
    max_passes: Option<u32>,

    /// Tracked stalls: resource_key -> (stage, consecutive passes).
    passes: Mutex<BTreeMap<String, (Stage, u32)>>,
}

impl StallTracker {
    /// Create a new stall tracker.
    pub fn new(max_passes: Option<u32>) -> Self {
        Self {
            max_passes,
            passes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record that a pass left a resource in `stage`.
    ///
    /// Returns true if the ceiling is exceeded. Moving to a different stage
    /// restarts the count; stages that are not waiting stages clear it.
    pub fn record_pass(&self, resource_key: &str, stage: Stage) -> bool {
        let mut passes = self.passes.lock().unwrap_or_else(PoisonError::into_inner);

        if !stage.is_waiting() {
            passes.remove(resource_key);
            return false;
        }

        let entry = passes
            .entry(resource_key.to_string())
            .or_insert((stage, 0));

        // Reset if the stage moved
        if entry.0 != stage {
            *entry = (stage, 0);
        }

        entry.1 += 1;
        self.max_passes.is_some_and(|max| entry.1 > max)
    }

    /// Consecutive passes recorded for a resource.
    pub fn passes(&self, resource_key: &str) -> u32 {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_key)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Clear stall tracking for a resource.
    pub fn clear(&self, resource_key: &str) {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource_key);
    }
}
