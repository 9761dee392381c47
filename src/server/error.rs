/// Error types for the SSH gateway
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Host key could not be loaded or generated
    #[error("Host key error: {0}")]
    HostKey(String),

    /// Kubernetes client could not be built
    #[error("Kubernetes client error: {0}")]
    Kube(String),
}
