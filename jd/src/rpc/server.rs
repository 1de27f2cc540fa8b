//! Unix socket transport serving the job handler
//!
//! Accepts connections until the shutdown signal fires or a client sends a
//! `Shutdown` request, then drains in-flight connections for up to the
//! configured drain timeout before aborting the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::daemon::VERSION;
use crate::handler::JobHandler;

use super::messages::{ErrorCode, RpcRequest, RpcResponse};
use super::{MAX_REQUEST_SIZE, RpcError, ShutdownSignal, Transport};

/// RPC server bound to a Unix Domain Socket
pub struct RpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Option<JobHandler>,
    drain_timeout: Duration,
    stop: Arc<Notify>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("socket_path", &self.socket_path)
            .field("handler", &self.handler.is_some())
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl RpcServer {
    /// Bind the socket at `socket_path`
    ///
    /// Creates the parent directory and removes a stale socket file left by a
    /// previous run.
    pub fn bind(socket_path: impl Into<PathBuf>, drain_timeout: Duration) -> Result<Self, RpcError> {
        let socket_path = socket_path.into();
        debug!(?socket_path, "RpcServer::bind: called");
        let bind_error = |source| RpcError::Bind {
            path: socket_path.display().to_string(),
            source,
        };

        if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }
        if socket_path.exists() {
            debug!(?socket_path, "RpcServer::bind: removing stale socket");
            std::fs::remove_file(&socket_path).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(bind_error)?;
        info!(?socket_path, "RPC socket bound");

        Ok(Self {
            listener,
            socket_path,
            handler: None,
            drain_timeout,
            stop: Arc::new(Notify::new()),
        })
    }

    /// Bind using the `rpc` section of the config
    pub fn from_config(config: &RpcConfig) -> Result<Self, RpcError> {
        Self::bind(&config.socket_path, config.drain_timeout())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Wait for in-flight connections, aborting whatever outlives the drain timeout
    async fn drain(&self, connections: &mut JoinSet<Result<(), RpcError>>) {
        if connections.is_empty() {
            return;
        }
        debug!(in_flight = connections.len(), "RpcServer::drain: called");
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = connections.join_next().await {
                log_connection_result(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                timeout = ?self.drain_timeout,
                "Drain timeout elapsed, aborting connections"
            );
            connections.abort_all();
        }
    }
}

#[async_trait]
impl Transport for RpcServer {
    fn endpoint(&self) -> String {
        self.socket_path.display().to_string()
    }

    fn register(&mut self, handler: JobHandler) -> Result<(), RpcError> {
        if self.handler.is_some() {
            return Err(RpcError::HandlerAlreadyRegistered);
        }
        self.handler = Some(handler);
        Ok(())
    }

    async fn serve(&mut self, mut shutdown: ShutdownSignal) -> Result<(), RpcError> {
        let handler = self.handler.clone().ok_or(RpcError::NoHandler)?;
        info!(socket_path = ?self.socket_path, "Serving RPC requests");

        let mut connections = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping RPC server");
                    break Ok(());
                }
                _ = self.stop.notified() => {
                    info!("Shutdown requested over RPC, stopping RPC server");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(stream, handler.clone(), Arc::clone(&self.stop)));
                    }
                    Err(e) => match accept_backoff(&e) {
                        Some(backoff) => {
                            warn!(error = %e, ?backoff, "Transient accept error, continuing");
                            if !backoff.is_zero() {
                                tokio::time::sleep(backoff).await;
                            }
                        }
                        None => break Err(RpcError::Accept(e)),
                    },
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_result(joined);
                }
            }
        };

        self.drain(&mut connections).await;
        result
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            debug!(socket_path = ?self.socket_path, "RpcServer: removing socket file");
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(socket_path = ?self.socket_path, error = %e, "Failed to remove socket file");
            }
        }
    }
}

/// Pause after running out of descriptors or buffers before accepting again
const RESOURCE_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before the next accept, or `None` if the listener is unusable
fn accept_backoff(e: &std::io::Error) -> Option<Duration> {
    use nix::errno::Errno;
    use std::io::ErrorKind;

    if matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted | ErrorKind::WouldBlock
    ) {
        return Some(Duration::ZERO);
    }
    let errno = e.raw_os_error().map(Errno::from_raw)?;
    match errno {
        Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM => Some(RESOURCE_BACKOFF),
        _ => None,
    }
}

fn log_connection_result(joined: Result<Result<(), RpcError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Connection ended with error"),
        Err(e) if e.is_cancelled() => debug!("Connection task cancelled"),
        Err(e) => warn!(error = %e, "Connection task panicked"),
    }
}

/// Read one request, dispatch it and write one response
async fn handle_connection(mut stream: UnixStream, handler: JobHandler, stop: Arc<Notify>) -> Result<(), RpcError> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_SIZE as u64 + 1));
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        debug!("handle_connection: client closed without a request");
        return Ok(());
    }

    let response = if bytes_read > MAX_REQUEST_SIZE {
        RpcResponse::error(
            ErrorCode::Malformed,
            format!("request exceeds {MAX_REQUEST_SIZE} bytes"),
        )
    } else {
        match serde_json::from_str::<RpcRequest>(line.trim()) {
            Ok(request) => dispatch(request, &handler, &stop).await,
            Err(e) => {
                debug!(error = %e, "handle_connection: malformed request");
                RpcResponse::error(ErrorCode::Malformed, e.to_string())
            }
        }
    };

    let mut payload = serde_json::to_vec(&response).map_err(|e| RpcError::Malformed(e.to_string()))?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;
    write_half.flush().await?;
    debug!(?response, "handle_connection: sent response");
    Ok(())
}

async fn dispatch(request: RpcRequest, handler: &JobHandler, stop: &Notify) -> RpcResponse {
    match request {
        RpcRequest::Ping => RpcResponse::Pong {
            version: VERSION.to_string(),
        },
        RpcRequest::Shutdown => {
            stop.notify_one();
            RpcResponse::Ok
        }
        request => handler.handle(request).await,
    }
}
