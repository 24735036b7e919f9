//! Stage state machine.
//!
//! Each stage inspects the pass's [`Collection`] and the environment status,
//! performs at most the cluster writes its own step needs, and returns the
//! next stage. Stages never look at another stage's state.
//!
//! ```text
//! Initialize -> BuildImage -> BuildImageWait -> BuildImageVerify -> Deploy -> DeployVerify -> Deployed
//!                   |              |  ^                 |              |
//!                   |              v  |                 |              v
//!                   |        BuildImageFailing          |       DeploymentFailed
//!                   v                                   v
//!            BuildImageFailed <-------------------------+
//! ```

mod build_image;
mod build_verify;
mod build_wait;
mod deploy;
mod deploy_verify;
mod initialize;

use kiln_api::{EnvironmentStatus, Stage};

use crate::collection::Collection;
use crate::error::OperatorError;
use crate::registry::TagLister;
use crate::store::ObjectStore;

/// Outcome of one stage step.
#[derive(Debug)]
pub struct Transition {
    /// Stage the environment moves to. Always authoritative, even alongside
    /// an error.
    pub next: Stage,

    pub error: Option<OperatorError>,
}

impl Transition {
    pub fn to(next: Stage) -> Self {
        Self { next, error: None }
    }

    pub fn fail(next: Stage, error: impl Into<OperatorError>) -> Self {
        Self {
            next,
            error: Some(error.into()),
        }
    }
}

/// Collaborators available to a stage.
pub struct StageContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub registry: &'a dyn TagLister,
    pub collection: &'a Collection,
}

/// Run the step for `stage`.
pub async fn dispatch(
    stage: Stage,
    ctx: &StageContext<'_>,
    status: &mut EnvironmentStatus,
) -> Transition {
    match stage {
        Stage::Initialize => initialize::initialize(ctx, status),
        Stage::BuildImage => build_image::build_image(ctx).await,
        Stage::BuildImageWait | Stage::BuildImageFailing => build_wait::wait_for_build(ctx),
        Stage::BuildImageVerify => build_verify::verify_image(ctx).await,
        Stage::Deploy => deploy::deploy(ctx).await,
        Stage::DeployVerify => deploy_verify::verify_deployment(ctx, status),
        Stage::Deployed | Stage::BuildImageFailed | Stage::DeploymentFailed | Stage::Failed => {
            Transition::to(stage)
        }
    }
}
