/// Configuration module for rs_podgate
mod config;
mod config_loader;
mod error;
mod logging;

pub use config::*;
pub use config_loader::{ConfigLoader, ConfigOverrides};
pub use error::ConfigError;
pub use logging::init_logging;
