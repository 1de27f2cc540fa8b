//! RPC transport for the job service
//!
//! Unix Domain Socket transport carrying newline-delimited JSON. Each
//! connection carries one request and one response.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

use crate::handler::JobHandler;

pub mod client;
pub mod messages;
pub mod server;

pub use client::JobClient;
pub use messages::{ErrorCode, RpcRequest, RpcResponse};
pub use server::RpcServer;

/// Maximum request size accepted by the server
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Maximum response size accepted by the client
pub const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

/// Future that resolves when the service should stop serving
pub type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors from the RPC layer
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a job handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("no job handler registered")]
    NoHandler,

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// The transport the lifecycle registers the job handler with and serves on
#[async_trait]
pub trait Transport: Send {
    /// Address clients use to reach this transport
    fn endpoint(&self) -> String;

    /// Bind the job handler; only one handler may be registered
    fn register(&mut self, handler: JobHandler) -> Result<(), RpcError>;

    /// Serve requests until `shutdown` resolves, a Shutdown request arrives,
    /// or the transport fails
    async fn serve(&mut self, shutdown: ShutdownSignal) -> Result<(), RpcError>;
}
