use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use deploycheck_bootstrap::PropertySource;
use tokio_util::sync::CancellationToken;

use crate::events::EventPublisher;

/// Identity of an installed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: u64,
    pub symbolic_name: String,
    pub version: String,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Installed,
    Starting,
    Active,
    Stopping,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "INSTALLED",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}

/// A module known to a runtime.
#[async_trait]
pub trait ModuleHandle: Send + Sync {
    fn info(&self) -> &ModuleInfo;
    fn state(&self) -> ModuleState;

    /// Start the module; a no-op when already active.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop the module; a no-op when not active.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// The modular runtime the deployable unit is installed into.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// Install the module found at `location`. Installing an already
    /// installed location returns the existing module.
    async fn install(&self, location: &str) -> anyhow::Result<Arc<dyn ModuleHandle>>;

    /// Every installed module, ordered by id.
    fn modules(&self) -> Vec<Arc<dyn ModuleHandle>>;
}

/// Everything an [`Activator`] may touch while its module starts or stops.
#[derive(Clone)]
pub struct ActivationContext {
    pub module: ModuleInfo,
    pub properties: Arc<BTreeMap<String, String>>,
    pub events: Arc<dyn EventPublisher>,
    pub cancel: CancellationToken,
}

impl ActivationContext {
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.property(key)
    }
}

impl fmt::Debug for ActivationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationContext")
            .field("module", &self.module)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Module-supplied start/stop hooks. Modules without one are passive:
/// they only become active.
#[async_trait]
pub trait Activator: Send + Sync {
    async fn start(&self, ctx: &ActivationContext) -> anyhow::Result<()>;
    async fn stop(&self, ctx: &ActivationContext) -> anyhow::Result<()>;
}
