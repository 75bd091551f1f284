//! Ordered runtime configuration: system properties plus the artifacts to
//! install before the deployable unit.

use std::fmt;

use deploycheck_bootstrap::{
    AppConfig, PropertySource, BUNDLE_LOCATION_PROPERTY, CONTAINER_PORT_PROPERTY,
    HTTP_SERVICE_PORT_PROPERTY, LOCAL_REPOSITORY_PROPERTY,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime-side name of the local repository property.
pub const RUNTIME_LOCAL_REPOSITORY_PROPERTY: &str = "org.ops4j.pax.url.mvn.localRepository";
/// Host packages the runtime exports to every module.
pub const EXTRA_SYSTEM_PACKAGES_PROPERTY: &str = "org.osgi.framework.system.packages.extra";
pub const EXTRA_SYSTEM_PACKAGES: &str = "javax.annotation";

pub const WEBAPP_GROUP_ID: &str = "org.glassfish.jersey.examples.osgi-helloworld-webapp";
pub const WAR_ARTIFACT_ID: &str = "war-bundle";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("artifact url must start with 'mvn:': '{0}'")]
    NotMaven(String),
    #[error("artifact url '{0}' needs at least group and artifact")]
    MissingCoordinates(String),
    #[error("artifact url '{0}' has too many segments")]
    TooManySegments(String),
}

/// Maven-style artifact coordinates, rendered as
/// `mvn:group/artifact[/version[/kind]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub group_id: String,
    pub artifact_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

impl ArtifactRef {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: None,
            kind: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// A version-less kind keeps an empty version slot: `mvn:g/a//war`.
    pub fn url(&self) -> String {
        let mut url = format!("mvn:{}/{}", self.group_id, self.artifact_id);
        match (&self.version, &self.kind) {
            (Some(v), Some(k)) => url.push_str(&format!("/{v}/{k}")),
            (Some(v), None) => url.push_str(&format!("/{v}")),
            (None, Some(k)) => url.push_str(&format!("//{k}")),
            (None, None) => {}
        }
        url
    }

    pub fn parse(url: &str) -> Result<Self, OptionError> {
        let rest = url
            .strip_prefix("mvn:")
            .ok_or_else(|| OptionError::NotMaven(url.to_string()))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() > 4 {
            return Err(OptionError::TooManySegments(url.to_string()));
        }
        let non_empty = |i: usize| {
            parts
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        let (Some(group_id), Some(artifact_id)) = (non_empty(0), non_empty(1)) else {
            return Err(OptionError::MissingCoordinates(url.to_string()));
        };
        Ok(Self {
            group_id,
            artifact_id,
            version: non_empty(2),
            kind: non_empty(3),
        })
    }

    /// Symbolic name a runtime gives the module built from this artifact.
    pub fn symbolic_name(&self) -> String {
        format!("{}.{}", self.group_id, self.artifact_id)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// The war artifact of the example web application.
pub fn webapp_war_artifact() -> ArtifactRef {
    ArtifactRef::new(WEBAPP_GROUP_ID, WAR_ARTIFACT_ID).kind("war")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOption {
    SystemProperty { key: String, value: String },
    Bundle(ArtifactRef),
}

/// Immutable, ordered list of runtime options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionList(Vec<RuntimeOption>);

impl OptionList {
    pub fn builder() -> OptionListBuilder {
        OptionListBuilder::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RuntimeOption> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn system_properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|o| match o {
            RuntimeOption::SystemProperty { key, value } => Some((key.as_str(), value.as_str())),
            RuntimeOption::Bundle(_) => None,
        })
    }

    pub fn bundles(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.0.iter().filter_map(|o| match o {
            RuntimeOption::Bundle(a) => Some(a),
            RuntimeOption::SystemProperty { .. } => None,
        })
    }

    /// Last value wins when a key repeats.
    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties()
            .filter(|(k, _)| *k == key)
            .last()
            .map(|(_, v)| v)
    }
}

impl<'a> IntoIterator for &'a OptionList {
    type Item = &'a RuntimeOption;
    type IntoIter = std::slice::Iter<'a, RuntimeOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Default)]
pub struct OptionListBuilder(Vec<RuntimeOption>);

impl OptionListBuilder {
    pub fn system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(RuntimeOption::SystemProperty {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn bundle(mut self, artifact: ArtifactRef) -> Self {
        self.0.push(RuntimeOption::Bundle(artifact));
        self
    }

    pub fn extend(mut self, options: impl IntoIterator<Item = RuntimeOption>) -> Self {
        self.0.extend(options);
        self
    }

    pub fn build(self) -> OptionList {
        OptionList(self.0)
    }
}

/// Properties every run needs, followed by the configured artifacts.
///
/// The bundle location defaults to the example war artifact when the config
/// does not name one.
pub fn generic_options(cfg: &AppConfig) -> Result<Vec<RuntimeOption>, OptionError> {
    let port = cfg.container_port().to_string();
    let bundle_location = cfg
        .property(BUNDLE_LOCATION_PROPERTY)
        .unwrap_or_else(|| webapp_war_artifact().url());

    let mut builder = OptionList::builder()
        .system_property(HTTP_SERVICE_PORT_PROPERTY, port.clone())
        .system_property(EXTRA_SYSTEM_PACKAGES_PROPERTY, EXTRA_SYSTEM_PACKAGES)
        .system_property(CONTAINER_PORT_PROPERTY, port)
        .system_property(BUNDLE_LOCATION_PROPERTY, bundle_location);

    for url in &cfg.deployment.bundles {
        builder = builder.bundle(ArtifactRef::parse(url)?);
    }

    if let Some(repo) = cfg.property(LOCAL_REPOSITORY_PROPERTY) {
        builder = builder.system_property(RUNTIME_LOCAL_REPOSITORY_PROPERTY, repo);
    }

    Ok(builder.build().0)
}

/// Artifacts providing the HTTP container and the web-archive extender.
pub fn container_options() -> Vec<RuntimeOption> {
    vec![
        RuntimeOption::Bundle(ArtifactRef::new("org.ops4j.pax.web", "pax-web-jetty-bundle")),
        RuntimeOption::Bundle(ArtifactRef::new("org.ops4j.pax.web", "pax-web-extender-war")),
    ]
}

/// Full configuration: generic options, then the container, then `extra`.
pub fn configuration(
    cfg: &AppConfig,
    extra: impl IntoIterator<Item = RuntimeOption>,
) -> Result<OptionList, OptionError> {
    Ok(OptionList::builder()
        .extend(generic_options(cfg)?)
        .extend(container_options())
        .extend(extra)
        .build())
}
