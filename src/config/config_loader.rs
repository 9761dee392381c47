/// Configuration file loader for rs_podgate
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{ConfigError, GatewayConfig};

/// Values taken from the command line and environment, applied on top of the file
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub listen_addr: Option<SocketAddr>,
    pub namespace: Option<String>,
    pub container: Option<String>,
    pub pod: Option<String>,
    pub shell: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub debug: bool,
}

/// Configuration loader responsible for loading and parsing configuration files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file, falling back to defaults when no file exists
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
        match config_path {
            Some(path) => self.load_config_from_file(path),
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    info!("Using default configuration file path: {:?}", path);
                    self.load_config_from_file(&path)
                } else {
                    debug!("No configuration file at {:?}, using defaults", path);
                    Ok(GatewayConfig::default())
                }
            }
        }
    }

    /// Load, override and validate in one step
    pub fn load_with_overrides(
        &self,
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<GatewayConfig, ConfigError> {
        let mut config = self.load_config(config_path)?;
        apply_overrides(&mut config, overrides);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    fn load_config_from_file(&self, path: &Path) -> Result<GatewayConfig, ConfigError> {
        info!("Loading configuration from file: {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.display().to_string()),
            _ => ConfigError::FileOpenError(e),
        })?;

        self.parse_config(&contents)
    }

    /// Parse configuration from string content
    pub fn parse_config(&self, content: &str) -> Result<GatewayConfig, ConfigError> {
        let config = toml::from_str::<GatewayConfig>(content)?;
        debug!("Configuration parsed successfully: {:?}", config);
        Ok(config)
    }
}

/// Command line and environment values win over the file
pub fn apply_overrides(config: &mut GatewayConfig, overrides: &ConfigOverrides) {
    if let Some(addr) = overrides.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(namespace) = &overrides.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(container) = &overrides.container {
        config.container = container.clone();
    }
    if let Some(pod) = &overrides.pod {
        config.pod = Some(pod.clone());
    }
    if let Some(shell) = &overrides.shell {
        config.shell = shell.clone();
    }
    if let Some(kubeconfig) = &overrides.kubeconfig {
        config.kubeconfig = Some(kubeconfig.clone());
    }
    if overrides.debug {
        config.logging.level = "debug".to_string();
    }
}

/// Default configuration path
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    // 使用当前工作目录作为默认配置文件目录
    Ok(std::env::current_dir()?.join("podgate.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_file() {
        let config = ConfigLoader::new()
            .parse_config(
                r#"
                listen_addr = "127.0.0.1:2022"
                namespace = "dev"
                container = "app"
                pod = "shared-box"
                dial_timeout_secs = 5
                allowed_principals = ["alice", "bob"]

                [logging]
                level = "debug"
                json = true
                "#,
            )
            .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:2022".parse().unwrap());
        assert_eq!(config.namespace, "dev");
        assert_eq!(config.container, "app");
        assert_eq!(config.pod.as_deref(), Some("shared-box"));
        assert_eq!(config.shell, "/bin/sh");
        assert_eq!(config.allowed_principals, vec!["alice", "bob"]);
        assert!(config.logging.json);
    }

    #[test]
    fn unknown_types_are_parse_errors() {
        let result = ConfigLoader::new().parse_config("dial_timeout_secs = \"soon\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let result = ConfigLoader::new().load_config(Some(Path::new("/nonexistent/podgate.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = ConfigLoader::new()
            .parse_config("namespace = \"dev\"\ncontainer = \"app\"")
            .unwrap();
        let overrides = ConfigOverrides {
            namespace: Some("prod".to_string()),
            pod: Some("fixed".to_string()),
            debug: true,
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut config, &overrides);

        assert_eq!(config.namespace, "prod");
        assert_eq!(config.container, "app");
        assert_eq!(config.pod.as_deref(), Some("fixed"));
        assert_eq!(config.logging.level, "debug");
    }
}
