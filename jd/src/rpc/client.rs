//! RPC client for the job service
//!
//! Used by the CLI to manage jobs and to ping or stop a running daemon.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::RpcConfig;
use crate::domain::{Job, JobPatch, NewJob};
use crate::registry::ServiceRegistry;

use super::messages::{RpcRequest, RpcResponse};
use super::{MAX_REQUEST_SIZE, MAX_RESPONSE_SIZE};

/// Default timeout for each phase of a call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the job service's Unix socket
#[derive(Debug, Clone)]
pub struct JobClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for JobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JobClient {
    /// Client for the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(RpcConfig::default().socket_path)
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Find a live instance of `service` in the registry and connect to its endpoint
    pub async fn discover(registry: &dyn ServiceRegistry, service: &str) -> Result<Self> {
        debug!(%service, "JobClient::discover: called");
        let records = registry
            .lookup(service)
            .await
            .with_context(|| format!("Failed to look up {service}"))?;
        // Lookup is ordered oldest first; prefer the most recent instance
        let record = records
            .last()
            .ok_or_else(|| eyre::eyre!("No live instance of {} registered", service))?;
        debug!(node_id = %record.node_id, endpoint = %record.endpoint, "JobClient::discover: selected instance");
        Ok(Self::with_socket_path(PathBuf::from(&record.endpoint)))
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Check the service is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        match self.call(RpcRequest::Ping).await? {
            RpcResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the service to stop gracefully
    pub async fn shutdown(&self) -> Result<()> {
        match self.call(RpcRequest::Shutdown).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create_job(&self, job: NewJob) -> Result<Job> {
        expect_job(self.call(RpcRequest::CreateJob { job }).await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        expect_job(self.call(RpcRequest::GetJob { id: id.to_string() }).await?)
    }

    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        expect_job(
            self.call(RpcRequest::UpdateJob {
                id: id.to_string(),
                patch,
            })
            .await?,
        )
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        match self.call(RpcRequest::DeleteJob { id: id.to_string() }).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_jobs(&self, enabled: Option<bool>) -> Result<Vec<Job>> {
        match self.call(RpcRequest::ListJobs { enabled }).await? {
            RpcResponse::Jobs { jobs } => Ok(jobs),
            other => Err(unexpected(other)),
        }
    }

    /// Send one request and wait for its response
    pub async fn call(&self, request: RpcRequest) -> Result<RpcResponse> {
        debug!(socket_path = ?self.socket_path, ?request, "JobClient::call: called");

        let mut payload = serde_json::to_vec(&request).context("Failed to serialize request")?;
        if payload.len() > MAX_REQUEST_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", payload.len()));
        }
        payload.push(b'\n');

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {}", self.socket_path.display()))?;

        tokio::time::timeout(self.timeout, async {
            stream.write_all(&payload).await.context("Failed to write request")?;
            stream.flush().await.context("Failed to flush request")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new((&mut stream).take(MAX_RESPONSE_SIZE as u64 + 1));
        let mut line = String::new();
        let bytes_read = tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;
        if bytes_read == 0 {
            return Err(eyre::eyre!("Service closed the connection without responding"));
        }
        if bytes_read > MAX_RESPONSE_SIZE {
            return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
        }

        let response: RpcResponse = serde_json::from_str(line.trim()).context("Failed to parse response")?;
        debug!(?response, "JobClient::call: received response");
        Ok(response)
    }
}

fn expect_job(response: RpcResponse) -> Result<Job> {
    match response {
        RpcResponse::Job { job } => Ok(job),
        other => Err(unexpected(other)),
    }
}

fn unexpected(response: RpcResponse) -> eyre::Error {
    match response {
        RpcResponse::Error { code, message } => eyre::eyre!("Service error ({:?}): {}", code, message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
