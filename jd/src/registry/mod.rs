//! Service registry
//!
//! The job service registers itself under a fixed name and version with a
//! TTL and renews the registration on an interval. Clients discover the
//! service's RPC endpoint through [`ServiceRegistry::lookup`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod file;
mod heartbeat;

pub use file::FileRegistry;
pub use heartbeat::Heartbeat;

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registry record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// One registered service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub version: String,
    /// Unique per process run
    pub node_id: String,
    /// Where clients reach the instance (the RPC socket path)
    pub endpoint: String,
    pub pid: u32,
    pub registered_at: DateTime<Utc>,
    /// Set by the registry on each (re-)registration
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServiceRecord {
    pub fn new(name: &str, version: &str, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            node_id: format!("{}-{}", name, Uuid::now_v7().simple()),
            endpoint: endpoint.into(),
            pid: std::process::id(),
            registered_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Registry the service announces itself to
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register or renew `record`, valid for `ttl`
    async fn register(&self, record: &ServiceRecord, ttl: Duration) -> Result<(), RegistryError>;

    /// Remove `record`; removing an absent record is not an error
    async fn deregister(&self, record: &ServiceRecord) -> Result<(), RegistryError>;

    /// Live (unexpired) instances registered under `name`
    async fn lookup(&self, name: &str) -> Result<Vec<ServiceRecord>, RegistryError>;
}
