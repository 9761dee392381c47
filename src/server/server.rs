/// SSH listener for rs_podgate
use std::sync::Arc;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use russh_keys::key::KeyPair;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::exec::KubeExecClient;
use crate::server::GatewayError;
use crate::server::ssh_handler::SshHandler;

/// How long running sessions get to tear down after shutdown was requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the SSH server configuration, loading or generating the host key
pub fn ssh_config(config: &GatewayConfig) -> Result<russh::server::Config, GatewayError> {
    let key = match &config.host_key_path {
        Some(path) => {
            info!("Loading host key from {:?}", path);
            russh_keys::load_secret_key(path, None)
                .map_err(|e| GatewayError::HostKey(format!("{}: {}", path.display(), e)))?
        }
        None => {
            warn!("No host key configured, generating an ephemeral ed25519 key");
            KeyPair::generate_ed25519()
                .ok_or_else(|| GatewayError::HostKey("ed25519 key generation failed".into()))?
        }
    };

    Ok(russh::server::Config {
        keys: vec![key],
        ..Default::default()
    })
}

/// Build the Kubernetes exec backend from an explicit kubeconfig or the environment
pub async fn build_exec_client(config: &GatewayConfig) -> Result<KubeExecClient, GatewayError> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            info!("Using kubeconfig {:?}", path);
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| GatewayError::Kube(format!("{}: {}", path.display(), e)))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| GatewayError::Kube(e.to_string()))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| GatewayError::Kube(e.to_string()))?,
    };
    debug!("Kubernetes API server: {}", kube_config.cluster_url);

    let client = kube::Client::try_from(kube_config).map_err(|e| GatewayError::Kube(e.to_string()))?;
    Ok(KubeExecClient::new(client))
}

/// Run the SSH gateway until Ctrl+C or SIGTERM
pub async fn run_server(state: AppState) -> Result<(), GatewayError> {
    let ssh = Arc::new(ssh_config(&state.config)?);
    let listener = TcpListener::bind(state.config.listen_addr).await?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    serve(listener, state, ssh).await
}

/// Accept SSH connections on `listener` until the state's shutdown token fires
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    ssh: Arc<russh::server::Config>,
) -> Result<(), GatewayError> {
    info!("SSH gateway listening on {}", listener.local_addr()?);
    info!(
        "Sessions land in namespace {:?}, container {:?}, running {:?}",
        state.config.namespace, state.config.container, state.config.shell
    );

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }

                debug!("New connection from {}", peer);
                let handler = SshHandler::new(state.clone(), Some(peer));
                let ssh = ssh.clone();
                connections.spawn(async move {
                    let session = match russh::server::run_stream(ssh, stream, handler).await {
                        Ok(session) => session,
                        Err(e) => {
                            warn!("SSH handshake with {} failed: {}", peer, e);
                            return;
                        }
                    };
                    match session.await {
                        Ok(()) => debug!("Connection from {} closed", peer),
                        Err(e) => warn!("Connection from {} failed: {}", peer, e),
                    }
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }

    // Sessions hold child tokens of the shutdown token and are tearing down now
    info!(
        "Shutting down, waiting for {} active sessions",
        state.session_count()
    );
    if tokio::time::timeout(SHUTDOWN_GRACE, state.wait_for_sessions())
        .await
        .is_err()
    {
        warn!(
            "{} sessions still open after {:?}",
            state.session_count(),
            SHUTDOWN_GRACE
        );
    }

    connections.abort_all();
    while connections.join_next().await.is_some() {}

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RemoteExit;
    use crate::exec::mock_exec::MockExecClient;
    use async_trait::async_trait;
    use russh::ChannelMsg;
    use russh::client;
    use russh_keys::key::PublicKey;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct TrustingClient;

    #[async_trait]
    impl client::Handler for TrustingClient {
        type Error = russh::Error;

        async fn check_server_key(
            &mut self,
            _server_public_key: &PublicKey,
        ) -> Result<bool, Self::Error> {
            Ok(true)
        }
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            namespace: "dev".to_string(),
            container: "app".to_string(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn missing_host_key_file_is_reported() {
        let config = GatewayConfig {
            host_key_path: Some(PathBuf::from("/nonexistent/podgate_host_key")),
            ..test_config()
        };
        assert!(matches!(ssh_config(&config), Err(GatewayError::HostKey(_))));
    }

    #[test]
    fn ephemeral_host_key_is_generated() {
        let ssh = ssh_config(&test_config()).unwrap();
        assert_eq!(ssh.keys.len(), 1);
    }

    #[tokio::test]
    async fn ssh_login_lands_in_the_principals_workload() {
        let (client, mut remotes) = MockExecClient::new();
        let counters = client.counters.clone();
        let state = AppState::new(test_config(), Arc::new(client));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ssh = Arc::new(ssh_config(&state.config).unwrap());
        let server = tokio::spawn(serve(listener, state.clone(), ssh));

        let mut ssh_client =
            client::connect(Arc::new(client::Config::default()), addr, TrustingClient)
                .await
                .unwrap();
        assert!(ssh_client.authenticate_none("alice").await.unwrap());
        let mut channel = ssh_client.channel_open_session().await.unwrap();
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .unwrap();
        channel.request_shell(false).await.unwrap();

        let mut remote = tokio::time::timeout(Duration::from_secs(5), remotes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.request.namespace, "dev");
        assert_eq!(remote.request.workload_id, "alice");
        assert_eq!(remote.request.container, "app");

        channel.data(&b"echo hello\r\n"[..]).await.unwrap();
        let mut typed = [0u8; 12];
        remote.stdin.read_exact(&mut typed).await.unwrap();
        assert_eq!(&typed, b"echo hello\r\n");

        remote.stdout.write_all(b"ok\n").await.unwrap();
        drop(remote.stdout);
        drop(remote.stderr);
        remote.exit.send(Ok(RemoteExit::success())).unwrap();

        let mut shown = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => shown.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        assert_eq!(String::from_utf8_lossy(&shown), "Welcome!\r\nok\n");
        assert_eq!(exit_status, Some(0));
        assert_eq!(counters.aborts.load(Ordering::SeqCst), 1);

        state.shutdown.cancel();
        server.await.unwrap().unwrap();
        assert_eq!(state.session_count(), 0);
    }

    #[tokio::test]
    async fn piped_script_runs_to_the_remote_exit_code() {
        let (client, mut remotes) = MockExecClient::new();
        let state = AppState::new(test_config(), Arc::new(client));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ssh = Arc::new(ssh_config(&state.config).unwrap());
        let server = tokio::spawn(serve(listener, state.clone(), ssh));

        let mut ssh_client =
            client::connect(Arc::new(client::Config::default()), addr, TrustingClient)
                .await
                .unwrap();
        assert!(ssh_client.authenticate_none("alice").await.unwrap());
        let mut channel = ssh_client.channel_open_session().await.unwrap();
        channel.request_shell(false).await.unwrap();

        let mut remote = tokio::time::timeout(Duration::from_secs(5), remotes.recv())
            .await
            .unwrap()
            .unwrap();

        // `echo hi | ssh gateway`: data, then EOF, then the command finishes on its own
        channel.data(&b"echo hi\n"[..]).await.unwrap();
        channel.eof().await.unwrap();
        let mut script = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), remote.stdin.read_to_end(&mut script))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(script, b"echo hi\n");

        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.stdout.write_all(b"hi\n").await.unwrap();
        drop(remote.stdout);
        drop(remote.stderr);
        remote
            .exit
            .send(Ok(RemoteExit {
                code: 7,
                message: None,
            }))
            .unwrap();

        let mut shown = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => shown.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        assert_eq!(String::from_utf8_lossy(&shown), "Welcome!\r\nhi\n");
        assert_eq!(exit_status, Some(7));

        state.shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
