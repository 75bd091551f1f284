//! Application configuration.
//!
//! Sources are merged in this order, later ones winning: built-in defaults,
//! the YAML file, `APP__`-prefixed environment variables (`APP__SERVER__PORT`
//! sets `server.port`), then command line flags.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::paths::home_dir::resolve_home_dir;
use crate::properties::{parse_property, PropertySource};

pub const CONTAINER_PORT_PROPERTY: &str = "jersey.config.test.container.port";
pub const BUNDLE_LOCATION_PROPERTY: &str = "jersey.bundle.location";
/// Port the runtime's HTTP service listens on.
pub const HTTP_SERVICE_PORT_PROPERTY: &str = "org.osgi.service.http.port";
pub const LOCAL_REPOSITORY_PROPERTY: &str = "localRepository";

const HOME_SUBDIR: &str = ".deploycheck";
const ENV_PREFIX: &str = "APP__";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// `None` until a file or the CLI asks for logging sections.
    pub logging: Option<LoggingConfig>,
    /// Flat "system properties" forwarded to the module runtime.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Raw per-module sections, keyed by module name.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Absolute after loading. Empty selects `$HOME/.deploycheck`.
    pub home_dir: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            host: "localhost".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeploymentConfig {
    pub context_path: String,
    pub ready_topic: String,
    pub max_wait_secs: u64,
    pub request_timeout_secs: u64,
    /// `mvn:` urls installed ahead of the deployable unit.
    pub bundles: Vec<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            context_path: "/helloworld".into(),
            ready_topic: "jersey/test/DEPLOYED".into(),
            max_wait_secs: 10,
            request_timeout_secs: 30,
            bundles: Vec::new(),
        }
    }
}

/// Subsystem name (a tracing target prefix, or `default`) to its sinks.
pub type LoggingConfig = HashMap<String, LogSection>;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSection {
    /// `trace`..`error`, or `off`.
    pub console_level: String,
    /// Relative paths resolve under `server.home_dir`; empty disables the file.
    pub file: String,
    pub file_level: String,
    pub max_age_days: Option<u32>,
    pub max_backups: Option<usize>,
    pub max_size_mb: Option<u64>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            console_level: "info".into(),
            file: String::new(),
            file_level: String::new(),
            max_age_days: None,
            max_backups: None,
            max_size_mb: None,
        }
    }
}

/// A single `default` section: info on the console, debug into a rotating file.
pub fn default_logging_config() -> LoggingConfig {
    let section = LogSection {
        file: "logs/deploycheck.log".into(),
        file_level: "debug".into(),
        max_age_days: Some(7),
        max_backups: Some(3),
        max_size_mb: Some(100),
        ..LogSection::default()
    };
    HashMap::from([("default".to_string(), section)])
}

/// Flags from the command line that feed back into the config.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub port: Option<u16>,
    /// `-D key=value` pairs, in command line order.
    pub properties: Vec<(String, String)>,
    pub verbose: u8,
}

impl AppConfig {
    /// Merge defaults, `path` and the environment, then resolve and create `server.home_dir`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = base_figment().merge(Yaml::file(path.as_ref()));
        Self::extract(figment)
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))
    }

    /// Like [`load_layered`](Self::load_layered); without a file only
    /// defaults and the environment apply.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load_layered(p),
            None => Self::extract(base_figment()).context("Failed to load default config"),
        }
    }

    fn extract(figment: Figment) -> Result<Self> {
        let mut config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Invalid configuration")?;

        let home = resolve_home_dir(Some(config.server.home_dir.as_str()), HOME_SUBDIR, true)
            .context("Failed to resolve server.home_dir")?;
        config.server.home_dir = home.to_string_lossy().into_owned();
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render config as YAML")
    }

    /// The container-port property when it parses, else `server.port`.
    pub fn container_port(&self) -> u16 {
        parse_property(self, CONTAINER_PORT_PROPERTY, self.server.port)
    }

    /// `--port` wins over any container-port property; `-D` pairs are
    /// applied in order; each `-v` raises the default console level.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        self.properties.extend(args.properties.iter().cloned());
        if let Some(port) = args.port {
            self.properties
                .insert(CONTAINER_PORT_PROPERTY.into(), port.to_string());
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let (Some(level), Some(section)) =
            (console_level_for(args.verbose), logging.get_mut("default"))
        {
            section.console_level = level.into();
        }
    }

    pub fn module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.modules.get(module_name)
    }
}

impl PropertySource for AppConfig {
    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }
}

fn base_figment() -> Figment {
    Figment::from(Serialized::defaults(AppConfig::default()))
}

fn console_level_for(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}
