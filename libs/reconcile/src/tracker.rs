//! Live status tracking for environments.
//!
//! The tracker is shared between concurrent reconciliations of different
//! environments and the status-reporting service. A single mutex guards the
//! map; it is held only for the duration of the map access.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use kiln_api::Stage;
use serde::Serialize;

use crate::ConvergenceStatus;

/// Namespaced identity of a tracked environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingKey {
    pub namespace: String,
    pub name: String,
}

impl TrackingKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Live status projection of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    /// Human-readable status line.
    pub status: String,

    /// Stage recorded by the most recent `track` call.
    pub stage: Stage,

    /// Stage recorded by the call before that.
    pub last_stage: Stage,

    pub updated_at: DateTime<Utc>,
}

impl TrackingInfo {
    /// Returns true if the most recent `track` call moved to a new stage.
    pub fn has_changed(&self) -> bool {
        self.stage != self.last_stage
    }

    pub fn convergence(&self) -> ConvergenceStatus {
        ConvergenceStatus::from_stage(self.stage)
    }

    pub fn is_deployed(&self) -> bool {
        self.convergence().is_converged()
    }

    pub fn is_converging(&self) -> bool {
        self.convergence().is_converging()
    }

    pub fn is_failed(&self) -> bool {
        self.convergence() == ConvergenceStatus::Diverged
    }
}

/// Keyed map of [`TrackingInfo`].
#[derive(Debug, Default)]
pub struct StatusTracker {
    entries: Mutex<HashMap<TrackingKey, TrackingInfo>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current status of an environment.
    ///
    /// The first call for a key records the stage as its own `last_stage`.
    pub fn track(&self, key: &TrackingKey, status: impl Into<String>, stage: Stage) -> TrackingInfo {
        let mut entries = self.lock();
        let last_stage = entries.get(key).map(|info| info.stage).unwrap_or(stage);
        let info = TrackingInfo {
            status: status.into(),
            stage,
            last_stage,
            updated_at: Utc::now(),
        };
        entries.insert(key.clone(), info.clone());
        info
    }

    pub fn get(&self, key: &TrackingKey) -> Option<TrackingInfo> {
        self.lock().get(key).cloned()
    }

    /// Change-detection predicate for status consumers.
    pub fn has_changed(&self, key: &TrackingKey) -> bool {
        self.lock().get(key).is_some_and(TrackingInfo::has_changed)
    }

    /// Drop an environment that no longer exists.
    pub fn forget(&self, key: &TrackingKey) -> Option<TrackingInfo> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackingKey, TrackingInfo>> {
        // Entries are replaced wholesale, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
