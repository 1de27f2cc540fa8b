//! JobHandler - RPC-facing façade over the job store
//!
//! Stateless: every call goes straight to the store handle taken from the
//! dependency bundle. Concurrent calls are independent; the store handle
//! provides the concurrency control.

use chrono::Utc;
use thiserror::Error;
use tracing::{Instrument, debug};

use crate::bundle::DependencyBundle;
use crate::domain::{Job, JobPatch, JobValidationError, NewJob};
use crate::rpc::{ErrorCode, RpcRequest, RpcResponse};
use crate::store::{JobStore, StoreError};
use crate::telemetry::{SpanStatus, Tracer};

/// Errors surfaced to RPC callers
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Invalid(#[from] JobValidationError),

    #[error("update must change at least one field")]
    EmptyPatch,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} is handled by the transport, not the job handler")]
    Unsupported(&'static str),
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(_) | Self::EmptyPatch | Self::Unsupported(_) => ErrorCode::InvalidArgument,
            Self::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            Self::Store(StoreError::Conflict(_)) => ErrorCode::Conflict,
            Self::Store(StoreError::Invalid(_)) => ErrorCode::InvalidArgument,
            Self::Store(StoreError::ChannelError) => ErrorCode::Unavailable,
            Self::Store(_) => ErrorCode::Internal,
        }
    }
}

/// Job-management operations exposed over RPC
#[derive(Debug, Clone)]
pub struct JobHandler {
    store: JobStore,
    tracer: Tracer,
}

impl JobHandler {
    /// Bind a handler to the bundle's store and tracer
    pub fn bind(bundle: &DependencyBundle) -> Self {
        Self {
            store: bundle.store().clone(),
            tracer: bundle.tracer().clone(),
        }
    }

    /// Dispatch one request inside a span named after the operation
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let operation = request.operation();
        let span = self.tracer.start_span(operation);
        let response = self.dispatch(request).instrument(span.span().clone()).await;
        let status = if response.is_error() {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        };
        span.finish(status);
        response
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        debug!(operation = request.operation(), "JobHandler::dispatch: called");
        let result = match request {
            RpcRequest::CreateJob { job } => self.create_job(job).await.map(|job| RpcResponse::Job { job }),
            RpcRequest::GetJob { id } => self.get_job(&id).await.map(|job| RpcResponse::Job { job }),
            RpcRequest::UpdateJob { id, patch } => {
                self.update_job(&id, patch).await.map(|job| RpcResponse::Job { job })
            }
            RpcRequest::DeleteJob { id } => self.delete_job(&id).await.map(|()| RpcResponse::Ok),
            RpcRequest::ListJobs { enabled } => self.list_jobs(enabled).await.map(|jobs| RpcResponse::Jobs { jobs }),
            other @ (RpcRequest::Ping | RpcRequest::Shutdown) => Err(HandlerError::Unsupported(other.operation())),
        };
        result.unwrap_or_else(|e| {
            debug!(error = %e, "JobHandler::dispatch: request failed");
            RpcResponse::error(e.code(), e.to_string())
        })
    }

    pub async fn create_job(&self, new: NewJob) -> Result<Job, HandlerError> {
        let job = Job::from_new(new, Utc::now())?;
        Ok(self.store.create_job(job).await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, HandlerError> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| HandlerError::Store(StoreError::NotFound(id.to_string())))
    }

    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job, HandlerError> {
        if patch.is_empty() {
            return Err(HandlerError::EmptyPatch);
        }
        patch.validate()?;
        Ok(self.store.update_job(id, patch).await?)
    }

    pub async fn delete_job(&self, id: &str) -> Result<(), HandlerError> {
        Ok(self.store.delete_job(id).await?)
    }

    pub async fn list_jobs(&self, enabled: Option<bool>) -> Result<Vec<Job>, HandlerError> {
        Ok(self.store.list_jobs(enabled).await?)
    }
}
