//! Directory-backed service registry
//!
//! Layout: `<dir>/<service-name>/<node-id>.json`, one JSON record per
//! instance. Writes go through a temporary file and a rename so readers never
//! see a partial record.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{RegistryError, ServiceRecord, ServiceRegistry};

/// Service registry stored as files under a shared directory
#[derive(Debug, Clone)]
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn service_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn record_path(&self, record: &ServiceRecord) -> PathBuf {
        self.service_dir(&record.name).join(format!("{}.json", record.node_id))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ServiceRegistry for FileRegistry {
    async fn register(&self, record: &ServiceRecord, ttl: Duration) -> Result<(), RegistryError> {
        let service_dir = self.service_dir(&record.name);
        fs::create_dir_all(&service_dir).map_err(io_error(&service_dir))?;

        let mut record = record.clone();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| RegistryError::Unavailable(format!("registration ttl {ttl:?} is out of range")))?;
        record.expires_at = Some(expires_at);

        let path = self.record_path(&record);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))?;

        debug!(node_id = %record.node_id, ?path, expires_at = ?record.expires_at, "FileRegistry: registered");
        Ok(())
    }

    async fn deregister(&self, record: &ServiceRecord) -> Result<(), RegistryError> {
        let path = self.record_path(record);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(node_id = %record.node_id, "FileRegistry: deregistered");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn lookup(&self, name: &str) -> Result<Vec<ServiceRecord>, RegistryError> {
        let service_dir = self.service_dir(name);
        let entries = match fs::read_dir(&service_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&service_dir)(e)),
        };

        let now = Utc::now();
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error(&service_dir))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                // Raced with a deregister
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&path)(e)),
            };
            match serde_json::from_str::<ServiceRecord>(&content) {
                Ok(record) if !record.is_expired(now) => records.push(record),
                Ok(_) => debug!(?path, "FileRegistry: skipping expired record"),
                Err(e) => warn!(?path, error = %e, "FileRegistry: skipping malformed record"),
            }
        }
        records.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_lookup_deregister() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        let record = ServiceRecord::new("jobs.test", "v1", "/tmp/jobs.sock");

        registry.register(&record, Duration::from_secs(30)).await.unwrap();

        let found = registry.lookup("jobs.test").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id, record.node_id);
        assert_eq!(found[0].endpoint, "/tmp/jobs.sock");
        assert!(found[0].expires_at.is_some());

        registry.deregister(&record).await.unwrap();
        assert!(registry.lookup("jobs.test").await.unwrap().is_empty());

        // Second deregister is a no-op
        registry.deregister(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        let record = ServiceRecord::new("jobs.test", "v1", "/tmp/jobs.sock");

        for ttl in [Duration::from_secs(u64::MAX), Duration::from_secs(1_000_000_000_000_000)] {
            let result = registry.register(&record, ttl).await;
            assert!(matches!(result, Err(RegistryError::Unavailable(_))));
        }
        assert!(registry.lookup("jobs.test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_unknown_service_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        assert!(registry.lookup("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        let record = ServiceRecord::new("jobs.test", "v1", "/tmp/jobs.sock");

        registry.register(&record, Duration::ZERO).await.unwrap();
        assert!(registry.lookup("jobs.test").await.unwrap().is_empty());

        registry.register(&record, Duration::from_secs(30)).await.unwrap();
        assert_eq!(registry.lookup("jobs.test").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_fails_when_dir_is_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("registry");
        fs::write(&blocker, "not a directory").unwrap();

        let registry = FileRegistry::new(&blocker);
        let record = ServiceRecord::new("jobs.test", "v1", "/tmp/jobs.sock");
        let result = registry.register(&record, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(RegistryError::Io { .. })));
    }
}
