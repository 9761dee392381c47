use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, AttachedProcess, TerminalSize};
use kube::client::UpgradeConnectionError;
use kube::Client;
use tracing::{debug, info, warn};

use crate::exec::{
    BoxedReader, DialError, ExecClient, ExecRequest, ExecStreams, RemoteExit, RemoteProcess,
    StreamError, TerminalControl,
};
use crate::inbound::ResizeEvent;

type StatusFuture = Pin<Box<dyn Future<Output = Option<Status>> + Send>>;

/// Exec backend talking to the Kubernetes API server.
///
/// `kube::Client` is a cheap handle over a shared connection pool, so one
/// value serves every session.
#[derive(Clone)]
pub struct KubeExecClient {
    client: Client,
}

impl Debug for KubeExecClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeExecClient")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeExecClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecClient for KubeExecClient {
    async fn open(&self, request: &ExecRequest) -> Result<ExecStreams, DialError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let params = attach_params(request);

        let mut attached = pods
            .exec(&request.workload_id, request.command.clone(), &params)
            .await
            .map_err(map_kube_error)?;

        let stdin = attached.stdin().ok_or_else(|| {
            DialError::TransportSetupFailure("exec stream has no stdin".to_string())
        })?;
        let stdout = attached.stdout().ok_or_else(|| {
            DialError::TransportSetupFailure("exec stream has no stdout".to_string())
        })?;
        let stderr = attached.stderr().map(|stderr| Box::new(stderr) as BoxedReader);
        let control = attached.terminal_size().map(|sizes| {
            Box::new(KubeTerminalControl { sizes }) as Box<dyn TerminalControl>
        });
        let status = attached.take_status().ok_or_else(|| {
            DialError::TransportSetupFailure("exec stream has no status channel".to_string())
        })?;

        info!(
            "Attached to {}/{} container {}",
            request.namespace, request.workload_id, request.container
        );

        Ok(ExecStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr,
            control,
            process: Box::new(KubeProcess {
                attached,
                status: Some(Box::pin(status)),
            }),
        })
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Kubernetes merges stderr into the tty and kube rejects `tty && stderr`,
/// so a tty request never asks for a separate stderr channel.
fn attach_params(request: &ExecRequest) -> AttachParams {
    AttachParams::default()
        .container(request.container.clone())
        .stdin(request.want_stdin)
        .stdout(request.want_stdout)
        .stderr(request.want_stderr && !request.want_tty)
        .tty(request.want_tty)
}

fn map_kube_error(error: kube::Error) -> DialError {
    match &error {
        kube::Error::Api(response) => classify_status(response.code, response.message.clone()),
        kube::Error::UpgradeConnection(UpgradeConnectionError::ProtocolSwitch(status)) => {
            classify_status(status.as_u16(), error.to_string())
        }
        kube::Error::Auth(_) => DialError::AuthFailure(error.to_string()),
        _ => DialError::TransportSetupFailure(error.to_string()),
    }
}

fn classify_status(code: u16, message: String) -> DialError {
    match code {
        401 | 403 => DialError::AuthFailure(message),
        404 => DialError::NotFound(message),
        _ => DialError::TransportSetupFailure(message),
    }
}

/// Turn the exec status channel's final message into an exit indication
fn exit_from_status(status: Option<Status>) -> Result<RemoteExit, StreamError> {
    let Some(status) = status else {
        return Err(StreamError::RemoteClosed(
            "exec stream ended without a status".to_string(),
        ));
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(RemoteExit::success());
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|details| details.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|cause| cause.message.as_deref())
            .and_then(|message| message.parse::<i32>().ok());
        return match code {
            Some(code) => Ok(RemoteExit {
                code,
                message: status.message,
            }),
            None => Err(StreamError::ProtocolViolation(
                "non-zero exit status without an exit code".to_string(),
            )),
        };
    }

    Err(StreamError::RemoteClosed(
        status
            .message
            .unwrap_or_else(|| "exec failed without a message".to_string()),
    ))
}

struct KubeProcess {
    attached: AttachedProcess,
    status: Option<StatusFuture>,
}

#[async_trait]
impl RemoteProcess for KubeProcess {
    async fn wait(&mut self) -> Result<RemoteExit, StreamError> {
        let Some(status) = self.status.as_mut() else {
            return Err(StreamError::ProtocolViolation(
                "exit status already consumed".to_string(),
            ));
        };
        let status = status.await;
        self.status = None;
        debug!("Exec status: {:?}", status);
        exit_from_status(status)
    }

    async fn abort(&mut self) {
        self.attached.abort();
    }
}

struct KubeTerminalControl<S> {
    sizes: S,
}

#[async_trait]
impl<S> TerminalControl for KubeTerminalControl<S>
where
    S: Sink<TerminalSize> + Send + Unpin,
    S::Error: fmt::Display + Send,
{
    async fn resize(&mut self, size: ResizeEvent) -> Result<(), StreamError> {
        self.sizes
            .send(TerminalSize {
                width: size.cols,
                height: size.rows,
            })
            .await
            .map_err(|e| {
                warn!("Resize channel closed: {}", e);
                StreamError::RemoteClosed(format!("resize channel closed: {e}"))
            })
    }
}
