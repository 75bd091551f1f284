use std::time::Duration;

use thiserror::Error;

use crate::events::EventError;
use crate::probe::BaseUriError;

/// Installing or starting the deployable unit failed.
#[derive(Debug, Error)]
#[error("failed to deploy '{location}'")]
pub struct DeploymentInstallError {
    pub location: String,
    #[source]
    pub source: anyhow::Error,
}

/// Fatal outcomes of a scenario run.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Install(#[from] DeploymentInstallError),

    #[error("the event {topic} did not arrive in {} seconds; waiting timed out", waited.as_secs_f64())]
    DeploymentTimeout { topic: String, waited: Duration },

    #[error("step {step}: GET {path} failed")]
    Request {
        step: usize,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("step {step}: GET {path} returned {actual:?} (status {status}), expected {expected:?}")]
    ResponseMismatch {
        step: usize,
        path: String,
        status: u16,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<BaseUriError> for ScenarioError {
    fn from(err: BaseUriError) -> Self {
        Self::Configuration(err.to_string())
    }
}
