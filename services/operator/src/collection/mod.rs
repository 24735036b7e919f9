//! Per-pass collection of observed and desired state.
//!
//! A [`Collection`] is built fresh at the start of every reconciliation pass
//! and dropped at its end. Nothing in it is cached between passes.

mod desired;
mod observed;

pub use self::desired::{same_job_shape, Desired};
pub use self::observed::Observed;
pub(crate) use self::observed::anonymous_credentials;

use kiln_api::Defaults;

use crate::error::OperatorResult;
use crate::store::{ObjectKey, ObjectStore};

/// Observed and desired state of one environment for a single pass.
#[derive(Debug, Clone)]
pub struct Collection {
    pub observed: Observed,
    pub desired: Desired,
}

impl Collection {
    /// Observe `key` and compute its desired state.
    ///
    /// Returns `Ok(None)` if the environment no longer exists.
    pub async fn collect(
        store: &dyn ObjectStore,
        config_namespace: &str,
        defaults: &Defaults,
        key: &ObjectKey,
    ) -> OperatorResult<Option<Self>> {
        let Some(observed) = Observed::collect(store, config_namespace, defaults, key).await? else {
            return Ok(None);
        };
        let desired = Desired::build(&observed);
        Ok(Some(Self { observed, desired }))
    }
}
