//! Build-deploy pipeline stages.
//!
//! The pipeline is a closed set of named stages. An environment's
//! `status.stage` always holds one of them; values read back from the
//! cluster that are not part of the enumeration collapse to [`Stage::Failed`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of the build-deploy pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    /// Pin the revision the pipeline is working on.
    #[default]
    Initialize,
    /// Create (or reuse) the image build job.
    BuildImage,
    /// Wait for the build job to complete.
    BuildImageWait,
    /// The build job has failed pods but is still retrying.
    BuildImageFailing,
    /// Confirm the built tag landed in the registry.
    BuildImageVerify,
    /// Apply the deployment, service and ingress.
    Deploy,
    /// Wait for every replica to become available.
    DeployVerify,
    /// The current revision is running.
    Deployed,
    /// The build job failed or the image never reached the registry.
    BuildImageFailed,
    /// Writing the workload objects failed.
    DeploymentFailed,
    /// Catch-all failure sink.
    Failed,
}

impl Stage {
    /// All stages in pipeline order, followed by the failure sinks.
    pub const ALL: [Stage; 11] = [
        Stage::Initialize,
        Stage::BuildImage,
        Stage::BuildImageWait,
        Stage::BuildImageFailing,
        Stage::BuildImageVerify,
        Stage::Deploy,
        Stage::DeployVerify,
        Stage::Deployed,
        Stage::BuildImageFailed,
        Stage::DeploymentFailed,
        Stage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialize => "Initialize",
            Stage::BuildImage => "BuildImage",
            Stage::BuildImageWait => "BuildImageWait",
            Stage::BuildImageFailing => "BuildImageFailing",
            Stage::BuildImageVerify => "BuildImageVerify",
            Stage::Deploy => "Deploy",
            Stage::DeployVerify => "DeployVerify",
            Stage::Deployed => "Deployed",
            Stage::BuildImageFailed => "BuildImageFailed",
            Stage::DeploymentFailed => "DeploymentFailed",
            Stage::Failed => "Failed",
        }
    }

    /// Human-readable description shown to status watchers.
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Initialize => "Initializing",
            Stage::BuildImage => "Starting image build",
            Stage::BuildImageWait => "Building image",
            Stage::BuildImageFailing => "Image build is failing, retrying",
            Stage::BuildImageVerify => "Verifying image",
            Stage::Deploy => "Deploying",
            Stage::DeployVerify => "Waiting for replicas",
            Stage::Deployed => "Deployed",
            Stage::BuildImageFailed => "Image build failed",
            Stage::DeploymentFailed => "Deployment failed",
            Stage::Failed => "Failed",
        }
    }

    /// Returns true for the failure sinks.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Stage::BuildImageFailed | Stage::DeploymentFailed | Stage::Failed
        )
    }

    /// Returns true for stages that poll external progress and may repeat
    /// across many passes.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Stage::BuildImageWait | Stage::BuildImageFailing | Stage::DeployVerify
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .unwrap_or(Stage::Failed))
    }
}

impl From<String> for Stage {
    fn from(value: String) -> Self {
        let Ok(stage) = value.parse::<Stage>();
        stage
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_names_parse_back() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[rstest]
    #[case("")]
    #[case("Building")]
    #[case("deployed")]
    fn test_unknown_stage_is_failed(#[case] raw: &str) {
        assert_eq!(Stage::from(raw.to_string()), Stage::Failed);
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&Stage::BuildImageWait).unwrap();
        assert_eq!(json, "\"BuildImageWait\"");

        let stage: Stage = serde_json::from_str("\"NotAStage\"").unwrap();
        assert_eq!(stage, Stage::Failed);
    }

    #[test]
    fn test_classification() {
        assert!(!Stage::Deployed.is_failure());
        assert!(Stage::BuildImageFailed.is_failure());
        assert!(Stage::DeploymentFailed.is_failure());
        assert!(!Stage::BuildImageFailing.is_failure());
        assert!(Stage::DeployVerify.is_waiting());
        assert!(!Stage::Deploy.is_waiting());
    }
}
