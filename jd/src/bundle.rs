//! DependencyBundle - the shared long-lived handles
//!
//! Built once at startup and handed by value (cheap clones of the same
//! handles) to the job handler and the scheduling loop. There are no setters:
//! once constructed, neither handle can be replaced.

use tracing::{debug, info};

use crate::config::Config;
use crate::lifecycle::InitializationError;
use crate::store::JobStore;
use crate::telemetry::Tracer;

#[derive(Debug, Clone)]
pub struct DependencyBundle {
    store: JobStore,
    tracer: Tracer,
}

impl DependencyBundle {
    /// Open the tracer, then the database, and verify the database answers
    ///
    /// On error nothing is returned; handles opened so far are dropped.
    pub async fn construct(config: &Config) -> Result<Self, InitializationError> {
        debug!("DependencyBundle::construct: called");
        let tracer = Tracer::open(&config.service.name, &config.tracing)?;
        let store = JobStore::open(&config.database)?;
        store.ping().await?;
        info!(
            service = %config.service.name,
            database = %config.database.path.display(),
            pool_size = store.pool_size(),
            "Dependencies ready"
        );
        Ok(Self { store, tracer })
    }

    /// Assemble a bundle from handles built elsewhere
    pub fn from_parts(store: JobStore, tracer: Tracer) -> Self {
        Self { store, tracer }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_DATABASE;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_construct_in_memory() {
        let mut config = Config::default();
        config.database.path = PathBuf::from(MEMORY_DATABASE);

        let bundle = DependencyBundle::construct(&config).await.unwrap();
        assert_eq!(bundle.store().pool_size(), 1);
        assert_eq!(bundle.tracer().service(), config.service.name);
    }

    #[tokio::test]
    async fn test_construct_fails_on_unreachable_database() {
        let mut config = Config::default();
        config.database.path = PathBuf::from("/nonexistent/dir/jobs.db");

        let result = DependencyBundle::construct(&config).await;
        assert!(matches!(result, Err(InitializationError::Database(_))));
    }

    #[tokio::test]
    async fn test_construct_fails_on_unwritable_span_sink() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let mut config = Config::default();
        config.database.path = PathBuf::from(MEMORY_DATABASE);
        config.tracing.spans_file = Some(blocker.join("spans.jsonl"));

        let result = DependencyBundle::construct(&config).await;
        assert!(matches!(result, Err(InitializationError::Tracer(_))));
    }
}
