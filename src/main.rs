/// Main entry point for rs_podgate
mod app_state;
mod bridge;
mod config;
mod exec;
mod inbound;
mod resolver;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use app_state::AppState;
use config::{ConfigLoader, ConfigOverrides, init_logging};
use server::{build_exec_client, run_server};

/// SSH gateway: every login lands in a shell inside a Kubernetes pod
#[derive(Parser, Debug)]
#[command(name = "rs_podgate", version, about)]
struct Cli {
    /// TOML configuration file (default: ./podgate.toml when present)
    #[arg(short = 'c', long, env = "PODGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig file (default: in-cluster or environment inference)
    #[arg(long, visible_alias = "conf", env = "PODGATE_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace sessions are dialed into
    #[arg(short = 'n', long, env = "PODGATE_NAMESPACE")]
    namespace: Option<String>,

    /// Send every session to this pod instead of the pod named after the user
    #[arg(short = 'p', long, env = "PODGATE_POD")]
    pod: Option<String>,

    /// Container inside the target pod
    #[arg(long, env = "PODGATE_CONTAINER")]
    container: Option<String>,

    /// Address the SSH listener binds to
    #[arg(short = 'l', long, env = "PODGATE_LISTEN")]
    listen: Option<SocketAddr>,

    /// Shell started in the container
    #[arg(long, env = "PODGATE_SHELL")]
    shell: Option<String>,

    /// Log at debug level
    #[arg(short = 'd', long, env = "PODGATE_DEBUG")]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen_addr: self.listen,
            namespace: self.namespace.clone(),
            container: self.container.clone(),
            pod: self.pod.clone(),
            shell: self.shell.clone(),
            kubeconfig: self.kubeconfig.clone(),
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 文件是可选的
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Load configuration
    let config = ConfigLoader::new()
        .load_with_overrides(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    // Initialize logging; the guard flushes file output on exit
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("Starting rs_podgate {}", env!("CARGO_PKG_VERSION"));

    let exec = build_exec_client(&config)
        .await
        .context("Failed to build Kubernetes client")?;

    // Create application state with configuration
    let state = AppState::new(config, Arc::new(exec));

    run_server(state).await.context("SSH gateway failed")?;
    Ok(())
}
