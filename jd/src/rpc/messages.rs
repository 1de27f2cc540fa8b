//! RPC message types for the job service
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobPatch, NewJob};

/// Requests from clients to the job service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RpcRequest {
    /// Create a job definition
    CreateJob { job: NewJob },

    /// Fetch one job
    GetJob { id: String },

    /// Apply a partial update to a job
    UpdateJob { id: String, patch: JobPatch },

    /// Delete a job
    DeleteJob { id: String },

    /// List jobs, optionally filtered by enabled flag
    ListJobs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
    },

    /// Ping to check if the service is alive
    Ping,

    /// Request the service to stop gracefully
    Shutdown,
}

impl RpcRequest {
    /// Operation name used for spans and logs
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateJob { .. } => "CreateJob",
            Self::GetJob { .. } => "GetJob",
            Self::UpdateJob { .. } => "UpdateJob",
            Self::DeleteJob { .. } => "DeleteJob",
            Self::ListJobs { .. } => "ListJobs",
            Self::Ping => "Ping",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Error categories reported to clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    Conflict,
    Malformed,
    Unavailable,
    Internal,
}

/// Responses from the job service to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RpcResponse {
    /// A single job
    Job { job: Job },

    /// A list of jobs
    Jobs { jobs: Vec<Job> },

    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl RpcResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&RpcRequest::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_create_job_deserialize() {
        let json = r#"{"type":"CreateJob","job":{"name":"backup","command":"tar c /srv","interval_secs":60}}"#;
        let msg: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            RpcRequest::CreateJob {
                job: NewJob::new("backup", "tar c /srv", 60)
            }
        );
        assert_eq!(msg.operation(), "CreateJob");
    }

    #[test]
    fn test_list_jobs_filter_is_optional() {
        let msg: RpcRequest = serde_json::from_str(r#"{"type":"ListJobs"}"#).unwrap();
        assert_eq!(msg, RpcRequest::ListJobs { enabled: None });

        let json = serde_json::to_string(&RpcRequest::ListJobs { enabled: Some(true) }).unwrap();
        assert_eq!(json, r#"{"type":"ListJobs","enabled":true}"#);
    }

    #[test]
    fn test_update_patch_omits_unset_fields() {
        let msg = RpcRequest::UpdateJob {
            id: "j1".to_string(),
            patch: JobPatch {
                enabled: Some(false),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"UpdateJob","id":"j1","patch":{"enabled":false}}"#);
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = RpcResponse::error(ErrorCode::NotFound, "Job not found: j1");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"type":"Error","code":"not_found","message":"Job not found: j1"}"#);
        assert!(resp.is_error());
    }

    #[test]
    fn test_unknown_request_type_is_rejected() {
        let result: Result<RpcRequest, _> = serde_json::from_str(r#"{"type":"DropTables"}"#);
        assert!(result.is_err());
    }
}
