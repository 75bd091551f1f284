pub mod local;

pub use local::{LocalModule, LocalModuleRuntime, ModuleDescriptor, RuntimeError, SYSTEM_MODULE_NAME};
