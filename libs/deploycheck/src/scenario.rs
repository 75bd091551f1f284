//! The deployment scenario: install the web application, wait for its
//! deployment event, then check each endpoint in turn.

use std::sync::Arc;
use std::time::Duration;

use deploycheck_bootstrap::{AppConfig, PropertySource, BUNDLE_LOCATION_PROPERTY};
use url::Url;

use crate::activation::{activate_all, ActivationReport};
use crate::contracts::{ModuleInfo, ModuleRuntime};
use crate::error::{DeploymentInstallError, ScenarioError};
use crate::events::{EventSource, GateHandler};
use crate::gate::DeploymentGate;
use crate::probe::{base_uri, default_expectations, Expectation, ProbeClient};

const DEPLOY_HANDLER_NAME: &str = "Deploy Handler";

/// Inputs of one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub base_uri: Url,
    pub bundle_location: String,
    pub ready_topic: String,
    pub max_wait: Duration,
    pub request_timeout: Duration,
    pub expectations: Vec<Expectation>,
}

impl ScenarioSettings {
    pub fn new(base_uri: Url, bundle_location: impl Into<String>) -> Self {
        let deployment = deploycheck_bootstrap::DeploymentConfig::default();
        Self {
            base_uri,
            bundle_location: bundle_location.into(),
            ready_topic: deployment.ready_topic,
            max_wait: Duration::from_secs(deployment.max_wait_secs),
            request_timeout: Duration::from_secs(deployment.request_timeout_secs),
            expectations: default_expectations(),
        }
    }

    /// Build settings from the application config.
    ///
    /// `properties` is where the bundle location is looked up; pass the
    /// runtime after options were applied, or the config itself.
    pub fn from_config<P>(cfg: &AppConfig, properties: &P) -> Result<Self, ScenarioError>
    where
        P: PropertySource + ?Sized,
    {
        let bundle_location = properties
            .property(BUNDLE_LOCATION_PROPERTY)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ScenarioError::Configuration(format!("property '{BUNDLE_LOCATION_PROPERTY}' is not set"))
            })?;
        let base = base_uri(
            &cfg.server.host,
            cfg.container_port(),
            &cfg.deployment.context_path,
        )?;

        Ok(Self::new(base, bundle_location)
            .with_ready_topic(cfg.deployment.ready_topic.clone())
            .with_max_wait(Duration::from_secs(cfg.deployment.max_wait_secs))
            .with_request_timeout(Duration::from_secs(cfg.deployment.request_timeout_secs)))
    }

    pub fn with_ready_topic(mut self, topic: impl Into<String>) -> Self {
        self.ready_topic = topic.into();
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_expectations(mut self, expectations: Vec<Expectation>) -> Self {
        self.expectations = expectations;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CheckedResponse {
    pub step: usize,
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// What a successful run observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub deployed: ModuleInfo,
    pub activation: ActivationReport,
    pub responses: Vec<CheckedResponse>,
}

pub struct WebAppScenario {
    runtime: Arc<dyn ModuleRuntime>,
    events: Arc<dyn EventSource>,
    settings: ScenarioSettings,
}

impl WebAppScenario {
    pub fn new(
        runtime: Arc<dyn ModuleRuntime>,
        events: Arc<dyn EventSource>,
        settings: ScenarioSettings,
    ) -> Self {
        Self {
            runtime,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    /// Run the scenario once. Stops at the first failure; no step is retried.
    pub async fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        let gate = Arc::new(DeploymentGate::new());
        let handler = Arc::new(GateHandler::new(DEPLOY_HANDLER_NAME, Arc::clone(&gate)));
        let subscription = self
            .events
            .subscribe(&[self.settings.ready_topic.as_str()], handler)?;

        let result = self.run_with_gate(&gate).await;

        self.events.unsubscribe(subscription);
        result
    }

    async fn run_with_gate(&self, gate: &DeploymentGate) -> Result<ScenarioReport, ScenarioError> {
        let s = &self.settings;

        tracing::info!(location = %s.bundle_location, "Phase: install");
        let deployed = self.install_and_start(&s.bundle_location).await?;

        tracing::info!("Phase: activate");
        let activation = activate_all(self.runtime.as_ref()).await;
        tracing::info!("Installed modules:\n{}", activation.render());

        tracing::info!(topic = %s.ready_topic, max_wait_secs = s.max_wait.as_secs_f64(), "Phase: await deployment");
        gate.await_ready(s.max_wait)
            .await
            .map_err(|e| ScenarioError::DeploymentTimeout {
                topic: s.ready_topic.clone(),
                waited: e.waited,
            })?;

        tracing::info!(base_uri = %s.base_uri, "Phase: probe");
        let responses = self.probe().await?;

        Ok(ScenarioReport {
            deployed,
            activation,
            responses,
        })
    }

    async fn install_and_start(&self, location: &str) -> Result<ModuleInfo, DeploymentInstallError> {
        let wrap = |source: anyhow::Error| DeploymentInstallError {
            location: location.to_string(),
            source,
        };
        let module = self.runtime.install(location).await.map_err(wrap)?;
        module.start().await.map_err(wrap)?;
        Ok(module.info().clone())
    }

    async fn probe(&self) -> Result<Vec<CheckedResponse>, ScenarioError> {
        let s = &self.settings;
        let client = ProbeClient::new(s.base_uri.clone(), s.request_timeout)
            .map_err(|e| ScenarioError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let mut responses = Vec::with_capacity(s.expectations.len());
        for (idx, expectation) in s.expectations.iter().enumerate() {
            let step = idx + 1;
            let url = client.url_for(&expectation.path)?;
            let resp = client
                .get_text(url.clone())
                .await
                .map_err(|source| ScenarioError::Request {
                    step,
                    path: expectation.path.clone(),
                    source,
                })?;

            if resp.body != expectation.body {
                tracing::error!(step, %url, status = resp.status, expected = %expectation.body, actual = %resp.body, "unexpected response body");
                return Err(ScenarioError::ResponseMismatch {
                    step,
                    path: expectation.path.clone(),
                    status: resp.status,
                    expected: expectation.body.clone(),
                    actual: resp.body,
                });
            }
            tracing::info!(step, %url, status = resp.status, "response matched");
            responses.push(CheckedResponse {
                step,
                url: url.to_string(),
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploycheck_bootstrap::CONTAINER_PORT_PROPERTY;

    #[test]
    fn settings_from_default_config() {
        let mut cfg = AppConfig::default();
        cfg.properties
            .insert(BUNDLE_LOCATION_PROPERTY.into(), "mvn:g/a//war".into());

        let s = ScenarioSettings::from_config(&cfg, &cfg).unwrap();
        assert_eq!(s.base_uri.as_str(), "http://localhost:8080/helloworld");
        assert_eq!(s.bundle_location, "mvn:g/a//war");
        assert_eq!(s.ready_topic, "jersey/test/DEPLOYED");
        assert_eq!(s.max_wait, Duration::from_secs(10));
        assert_eq!(s.expectations.len(), 3);
    }

    #[test]
    fn container_port_property_moves_base_uri() {
        let mut cfg = AppConfig::default();
        cfg.properties.insert(CONTAINER_PORT_PROPERTY.into(), "9998".into());
        cfg.properties.insert(BUNDLE_LOCATION_PROPERTY.into(), "loc".into());

        let s = ScenarioSettings::from_config(&cfg, &cfg).unwrap();
        assert_eq!(s.base_uri.port(), Some(9998));
    }

    #[test]
    fn missing_bundle_location_is_a_configuration_error() {
        let cfg = AppConfig::default();
        let err = ScenarioSettings::from_config(&cfg, &cfg).unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(msg) if msg.contains(BUNDLE_LOCATION_PROPERTY)));
    }
}
