pub mod config;
pub mod logging;
pub mod paths;
pub mod properties;

pub use config::*;
pub use logging::*;
pub use properties::*;
