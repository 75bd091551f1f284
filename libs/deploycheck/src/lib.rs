//! Deployment verification for web applications hosted in a modular runtime.
//!
//! A run configures the runtime from an [`OptionList`], installs the
//! deployable unit, waits on a [`DeploymentGate`] for its deployment event
//! and then checks each endpoint of the application in order.

pub mod activation;
pub mod contracts;
pub mod error;
pub mod events;
pub mod gate;
pub mod options;
pub mod probe;
pub mod runtime;
pub mod scenario;

pub use activation::{activate_all, ActivationOutcome, ActivationRecord, ActivationReport};
pub use contracts::{
    ActivationContext, Activator, ModuleHandle, ModuleInfo, ModuleRuntime, ModuleState,
};
pub use error::{DeploymentInstallError, ScenarioError};
pub use events::{
    Event, EventError, EventHandler, EventPublisher, EventSource, GateHandler, LocalEventBus,
    SubscriptionId,
};
pub use gate::{DeploymentGate, DeploymentTimeoutError};
pub use options::{configuration, ArtifactRef, OptionError, OptionList, RuntimeOption};
pub use probe::{Expectation, ProbeClient};
pub use runtime::{LocalModuleRuntime, ModuleDescriptor, RuntimeError};
pub use scenario::{ScenarioReport, ScenarioSettings, WebAppScenario};

// Re-export so downstream crates share one copy of the config types.
pub use deploycheck_bootstrap;
