use serde::{Deserialize, Serialize};

/// Configuration for the helloworld_webapp module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelloWorldConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Used when the runtime does not provide `org.osgi.service.http.port`.
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_context_path")]
    pub context_path: String,
    #[serde(default = "default_ready_topic")]
    pub ready_topic: String,
}

impl Default for HelloWorldConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            default_port: default_port(),
            context_path: default_context_path(),
            ready_topic: default_ready_topic(),
        }
    }
}

impl HelloWorldConfig {
    /// Read the module's section from the per-module config bag, if any.
    pub fn from_value(value: Option<&serde_json::Value>) -> anyhow::Result<Self> {
        match value {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Ok(Self::default()),
        }
    }
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_context_path() -> String {
    "/helloworld".to_string()
}

fn default_ready_topic() -> String {
    "jersey/test/DEPLOYED".to_string()
}
