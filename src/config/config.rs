/// Configuration data structures for rs_podgate
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::resolver::DEFAULT_SHELL;

/// Gateway configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the SSH listener binds to
    pub listen_addr: SocketAddr,

    /// Namespace every session is dialed into
    pub namespace: String,

    /// Container inside the target pod
    pub container: String,

    /// Fixed pod name. When unset the SSH user name is the pod name.
    pub pod: Option<String>,

    /// The only program ever executed in the container
    pub shell: String,

    /// Line written to the client when the session starts
    pub banner: String,

    /// Upper bound on opening the exec stream, in seconds
    pub dial_timeout_secs: u64,

    /// How long remaining output may drain after the remote exits, in milliseconds
    pub drain_timeout_ms: u64,

    /// OpenSSH private key used as host key (ephemeral key when unset)
    pub host_key_path: Option<PathBuf>,

    /// Kubeconfig path (in-cluster / default inference when unset)
    pub kubeconfig: Option<PathBuf>,

    /// Principals allowed to open sessions (everyone when empty)
    pub allowed_principals: Vec<String>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,

    /// Write daily rolling log files into this directory instead of stdout
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 2222)),
            namespace: "default".to_string(),
            container: String::new(),
            pod: None,
            shell: DEFAULT_SHELL.to_string(),
            banner: "Welcome!".to_string(),
            dial_timeout_secs: 10,
            drain_timeout_ms: 500,
            host_key_path: None,
            kubeconfig: None,
            allowed_principals: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Check the fields the gateway cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::MissingField("namespace"));
        }
        if self.container.trim().is_empty() {
            return Err(ConfigError::MissingField("container"));
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::MissingField("shell"));
        }
        if matches!(&self.pod, Some(pod) if pod.trim().is_empty()) {
            return Err(ConfigError::InvalidStructure(
                "pod override must not be blank".to_string(),
            ));
        }
        if self.dial_timeout_secs == 0 {
            return Err(ConfigError::InvalidStructure(
                "dial_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_a_container() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("container"))
        ));
    }

    #[test]
    fn blank_pod_override_is_rejected() {
        let config = GatewayConfig {
            container: "app".to_string(),
            pod: Some("  ".to_string()),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStructure(_))
        ));
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let config = GatewayConfig {
            container: "app".to_string(),
            dial_timeout_secs: 3,
            drain_timeout_ms: 250,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.dial_timeout(), Duration::from_secs(3));
        assert_eq!(config.drain_timeout(), Duration::from_millis(250));
    }
}
