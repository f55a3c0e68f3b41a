//! Stage lists of the deploy and preview pipelines

use crate::pipeline::{Pipeline, PipelineError, Stage};

/// Steps of a primary deployment, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    Connect,
    Secrets,
    Build,
    Save,
    Transfer,
    Cutover,
    Persist,
}

impl DeployStage {
    pub const ALL: [DeployStage; 7] = [
        DeployStage::Connect,
        DeployStage::Secrets,
        DeployStage::Build,
        DeployStage::Save,
        DeployStage::Transfer,
        DeployStage::Cutover,
        DeployStage::Persist,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn stage(self) -> Stage {
        match self {
            DeployStage::Connect => {
                Stage::new("Validating connection with the server", "Server is reachable", false)
            }
            DeployStage::Secrets => Stage::new("Syncing env secrets", "Env secrets in sync", true),
            DeployStage::Build => {
                Stage::new("Building the latest image of your app", "Image built", true)
            }
            DeployStage::Save => Stage::new("Saving the image locally", "Image saved", false),
            DeployStage::Transfer => Stage::new(
                "Moving the image to your server",
                "Image moved and loaded",
                true,
            ),
            DeployStage::Cutover => {
                Stage::new("Switching traffic to the new version", "New version is live", true)
            }
            DeployStage::Persist => {
                Stage::new("Recording the deployment", "Deployment recorded", false)
            }
        }
    }
}

/// Steps of a preview deployment, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStage {
    Connect,
    Build,
    Save,
    Transfer,
    Launch,
}

impl PreviewStage {
    pub const ALL: [PreviewStage; 5] = [
        PreviewStage::Connect,
        PreviewStage::Build,
        PreviewStage::Save,
        PreviewStage::Transfer,
        PreviewStage::Launch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn stage(self) -> Stage {
        match self {
            PreviewStage::Connect => {
                Stage::new("Validating connection with the server", "Server is reachable", false)
            }
            PreviewStage::Build => {
                Stage::new("Building the preview image of your app", "Image built", true)
            }
            PreviewStage::Save => Stage::new("Saving the image locally", "Image saved", false),
            PreviewStage::Transfer => Stage::new(
                "Moving the image to your server",
                "Image moved and loaded",
                true,
            ),
            PreviewStage::Launch => Stage::new(
                "Launching the preview environment",
                "Preview environment is up",
                true,
            ),
        }
    }
}

pub fn deploy_pipeline(app: &str) -> Result<Pipeline, PipelineError> {
    Pipeline::new(
        format!("Deploying a new version of {app}"),
        DeployStage::ALL.iter().map(|s| s.stage()).collect(),
    )
}

pub fn preview_pipeline(app: &str, hash: &str) -> Result<Pipeline, PipelineError> {
    Pipeline::new(
        format!("Deploying a preview of {app} at {hash}"),
        PreviewStage::ALL.iter().map(|s| s.stage()).collect(),
    )
}
