pub mod audio;
pub mod config;
pub mod error;
pub mod feeder;
pub mod logging;
pub mod models;
pub mod scheduler;

pub use audio::{BackendKind, OutputBackend, PluginHost, PluginSink};
pub use config::{ConfigManager, FeederConfig};
pub use error::*;
pub use feeder::{Feeder, FeederOptions, FeederState};
pub use logging::FeederLogger;
pub use models::*;

#[cfg(test)]
mod test_support;
