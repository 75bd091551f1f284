//! In-process module runtime.
//!
//! Modules are resolved from a catalog keyed by location. Each catalog entry
//! names the module and optionally carries an [`Activator`]; modules without
//! one are passive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use deploycheck_bootstrap::PropertySource;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::contracts::{
    ActivationContext, Activator, ModuleHandle, ModuleInfo, ModuleRuntime, ModuleState,
};
use crate::events::{EventPublisher, LocalEventBus};
use crate::options::{OptionList, RuntimeOption};

pub const SYSTEM_MODULE_NAME: &str = "deploycheck.runtime.system";
const SYSTEM_MODULE_LOCATION: &str = "System Module";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no module available at location '{0}'")]
    UnknownLocation(String),
    #[error("module '{name}' cannot be {action}: it is {state}")]
    InvalidState {
        name: String,
        action: &'static str,
        state: ModuleState,
    },
    #[error("activator of module '{name}' failed to {action}")]
    Activator {
        name: String,
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// What the catalog knows about a location before it is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub symbolic_name: String,
    pub version: String,
}

impl ModuleDescriptor {
    pub fn new(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
        }
    }
}

#[derive(Clone)]
struct CatalogEntry {
    descriptor: ModuleDescriptor,
    activator: Option<Arc<dyn Activator>>,
}

struct Shared {
    properties: RwLock<BTreeMap<String, String>>,
    events: LocalEventBus,
    cancel: CancellationToken,
}

/// A module living inside [`LocalModuleRuntime`].
pub struct LocalModule {
    info: ModuleInfo,
    state: RwLock<ModuleState>,
    activator: Option<Arc<dyn Activator>>,
    // Serializes start/stop so transitions never interleave.
    transition: tokio::sync::Mutex<()>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModule")
            .field("info", &self.info)
            .field("state", &*self.state.read())
            .field("has_activator", &self.activator.is_some())
            .finish()
    }
}

impl LocalModule {
    fn context(&self) -> ActivationContext {
        ActivationContext {
            module: self.info.clone(),
            properties: Arc::new(self.shared.properties.read().clone()),
            events: Arc::new(self.shared.events.clone()) as Arc<dyn EventPublisher>,
            cancel: self.shared.cancel.child_token(),
        }
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.write() = state;
    }
}

#[async_trait]
impl ModuleHandle for LocalModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn state(&self) -> ModuleState {
        *self.state.read()
    }

    async fn start(&self) -> anyhow::Result<()> {
        let _guard = self.transition.lock().await;
        match self.state() {
            ModuleState::Active => return Ok(()),
            ModuleState::Installed => {}
            state => {
                return Err(RuntimeError::InvalidState {
                    name: self.info.symbolic_name.clone(),
                    action: "started",
                    state,
                }
                .into())
            }
        }

        self.set_state(ModuleState::Starting);
        if let Some(activator) = &self.activator {
            if let Err(source) = activator.start(&self.context()).await {
                self.set_state(ModuleState::Installed);
                return Err(RuntimeError::Activator {
                    name: self.info.symbolic_name.clone(),
                    action: "start",
                    source,
                }
                .into());
            }
        }
        self.set_state(ModuleState::Active);
        tracing::debug!(id = self.info.id, module = %self.info.symbolic_name, "module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let _guard = self.transition.lock().await;
        if self.state() != ModuleState::Active {
            return Ok(());
        }
        if self.info.id == 0 {
            return Err(RuntimeError::InvalidState {
                name: self.info.symbolic_name.clone(),
                action: "stopped",
                state: ModuleState::Active,
            }
            .into());
        }

        self.set_state(ModuleState::Stopping);
        let result = match &self.activator {
            Some(activator) => activator.stop(&self.context()).await,
            None => Ok(()),
        };
        // A failed stop still leaves the module stopped.
        self.set_state(ModuleState::Installed);
        result.map_err(|source| {
            RuntimeError::Activator {
                name: self.info.symbolic_name.clone(),
                action: "stop",
                source,
            }
            .into()
        })
    }
}

/// In-process runtime holding a location catalog, installed modules,
/// runtime properties and an event bus.
pub struct LocalModuleRuntime {
    catalog: DashMap<String, CatalogEntry>,
    modules: DashMap<u64, Arc<LocalModule>>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalModuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModuleRuntime")
            .field("catalog_size", &self.catalog.len())
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl Default for LocalModuleRuntime {
    fn default() -> Self {
        Self::new(LocalEventBus::new())
    }
}

impl LocalModuleRuntime {
    pub fn new(events: LocalEventBus) -> Self {
        let shared = Arc::new(Shared {
            properties: RwLock::new(BTreeMap::new()),
            events,
            cancel: CancellationToken::new(),
        });
        let runtime = Self {
            catalog: DashMap::new(),
            modules: DashMap::new(),
            next_id: AtomicU64::new(1),
            shared,
        };

        let system = Arc::new(LocalModule {
            info: ModuleInfo {
                id: 0,
                symbolic_name: SYSTEM_MODULE_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                location: SYSTEM_MODULE_LOCATION.to_string(),
            },
            state: RwLock::new(ModuleState::Active),
            activator: None,
            transition: tokio::sync::Mutex::new(()),
            shared: Arc::clone(&runtime.shared),
        });
        runtime.modules.insert(0, system);
        runtime
    }

    pub fn events(&self) -> &LocalEventBus {
        &self.shared.events
    }

    /// Make `location` installable.
    pub fn register_location(
        &self,
        location: impl Into<String>,
        descriptor: ModuleDescriptor,
        activator: Option<Arc<dyn Activator>>,
    ) {
        self.catalog.insert(
            location.into(),
            CatalogEntry {
                descriptor,
                activator,
            },
        );
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.properties.write().insert(key.into(), value.into());
    }

    /// Record system properties and install the listed artifacts in order.
    ///
    /// Artifacts missing from the catalog are installed as passive modules.
    pub async fn apply_options(&self, options: &OptionList) -> anyhow::Result<()> {
        for option in options {
            match option {
                RuntimeOption::SystemProperty { key, value } => {
                    self.set_property(key.clone(), value.clone());
                }
                RuntimeOption::Bundle(artifact) => {
                    let location = artifact.url();
                    if !self.catalog.contains_key(&location) {
                        let version = artifact.version.clone().unwrap_or_else(|| "0.0.0".into());
                        self.register_location(
                            location.clone(),
                            ModuleDescriptor::new(artifact.symbolic_name(), version),
                            None,
                        );
                    }
                    self.install(&location).await?;
                }
            }
        }
        Ok(())
    }

    fn find_by_location(&self, location: &str) -> Option<Arc<LocalModule>> {
        self.modules
            .iter()
            .find(|m| m.info.location == location)
            .map(|m| Arc::clone(m.value()))
    }

    /// Stop every active module in reverse install order and cancel
    /// everything activators spawned. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        let mut modules: Vec<Arc<LocalModule>> =
            self.modules.iter().map(|m| Arc::clone(m.value())).collect();
        modules.sort_by_key(|m| std::cmp::Reverse(m.info.id));

        for m in modules.iter().filter(|m| m.info.id != 0) {
            if let Err(err) = m.stop().await {
                tracing::warn!(module = %m.info.symbolic_name, error = %err, "Failed to stop module");
            }
        }
        self.shared.cancel.cancel();
    }
}

impl PropertySource for LocalModuleRuntime {
    fn property(&self, key: &str) -> Option<String> {
        self.shared.properties.read().get(key).cloned()
    }
}

#[async_trait]
impl ModuleRuntime for LocalModuleRuntime {
    async fn install(&self, location: &str) -> anyhow::Result<Arc<dyn ModuleHandle>> {
        if let Some(existing) = self.find_by_location(location) {
            return Ok(existing as Arc<dyn ModuleHandle>);
        }
        let entry = self
            .catalog
            .get(location)
            .map(|e| e.value().clone())
            .ok_or_else(|| RuntimeError::UnknownLocation(location.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let module = Arc::new(LocalModule {
            info: ModuleInfo {
                id,
                symbolic_name: entry.descriptor.symbolic_name,
                version: entry.descriptor.version,
                location: location.to_string(),
            },
            state: RwLock::new(ModuleState::Installed),
            activator: entry.activator,
            transition: tokio::sync::Mutex::new(()),
            shared: Arc::clone(&self.shared),
        });
        self.modules.insert(id, Arc::clone(&module));
        tracing::info!(id, module = %module.info.symbolic_name, location, "module installed");
        Ok(module as Arc<dyn ModuleHandle>)
    }

    fn modules(&self) -> Vec<Arc<dyn ModuleHandle>> {
        let mut modules: Vec<Arc<LocalModule>> =
            self.modules.iter().map(|m| Arc::clone(m.value())).collect();
        modules.sort_by_key(|m| m.info.id);
        modules
            .into_iter()
            .map(|m| m as Arc<dyn ModuleHandle>)
            .collect()
    }
}
