/// Application state shared by every SSH connection
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bridge::BridgeSettings;
use crate::config::GatewayConfig;
use crate::exec::ExecClient;

/// Application state containing shared data across handlers.
///
/// Everything here is immutable or a handle; sessions share no mutable state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<GatewayConfig>,
    /// Backend every session is dialed through
    pub exec: Arc<dyn ExecClient>,
    pub bridge: Arc<BridgeSettings>,
    /// Cancelled once when the gateway stops; every session holds a child token
    pub shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl AppState {
    pub fn new(config: GatewayConfig, exec: Arc<dyn ExecClient>) -> Self {
        let bridge = Arc::new(BridgeSettings::from_config(&config));
        Self {
            config: Arc::new(config),
            exec,
            bridge,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Run a session task that shutdown will wait for
    pub fn spawn_session<F>(&self, session: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sessions.spawn(session);
    }

    /// Get the number of running sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop tracking new sessions and wait for the running ones to finish
    pub async fn wait_for_sessions(&self) {
        self.sessions.close();
        self.sessions.wait().await;
    }
}
