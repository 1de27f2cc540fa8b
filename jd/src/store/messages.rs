//! Job store messages
//!
//! Commands and responses for the actor pattern.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Job, JobPatch, JobValidationError};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid job: {0}")]
    Invalid(#[from] JobValidationError),

    #[error("Failed to open database {path}: {message}")]
    Open { path: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                Self::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Self::Database(e.to_string()),
        }
    }
}

/// Response from store operations
pub type StoreResponse<T> = Result<T, StoreError>;

/// Commands sent to the store workers
#[derive(Debug)]
pub enum StoreCommand {
    Ping {
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    CreateJob {
        job: Job,
        reply: oneshot::Sender<StoreResponse<Job>>,
    },
    GetJob {
        id: String,
        reply: oneshot::Sender<StoreResponse<Option<Job>>>,
    },
    UpdateJob {
        id: String,
        patch: JobPatch,
        now: DateTime<Utc>,
        reply: oneshot::Sender<StoreResponse<Job>>,
    },
    DeleteJob {
        id: String,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    ListJobs {
        enabled: Option<bool>,
        reply: oneshot::Sender<StoreResponse<Vec<Job>>>,
    },
    DueJobs {
        now: DateTime<Utc>,
        limit: usize,
        reply: oneshot::Sender<StoreResponse<Vec<Job>>>,
    },
    RecordRun {
        id: String,
        ran_at: DateTime<Utc>,
        reply: oneshot::Sender<StoreResponse<Job>>,
    },
}
