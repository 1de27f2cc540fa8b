//! JobStore - handle to a pool of connection-owning workers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::domain::{Job, JobPatch};

use super::messages::{StoreCommand, StoreError, StoreResponse};
use super::sqlite;

/// Pending commands buffered ahead of the workers
const COMMAND_BUFFER: usize = 256;

/// Handle to send commands to the store workers
#[derive(Debug, Clone)]
pub struct JobStore {
    tx: mpsc::Sender<StoreCommand>,
    pool_size: usize,
}

impl JobStore {
    /// Open the database, apply the schema, ping every connection and spawn
    /// one worker per connection
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &DatabaseConfig) -> StoreResponse<Self> {
        debug!(path = %config.path.display(), pool_size = config.pool_size, "JobStore::open: called");

        // Every in-memory connection is its own database, so a pool would split state
        let pool_size = if config.is_memory() {
            if config.pool_size > 1 {
                warn!(requested = config.pool_size, "In-memory database limited to a single connection");
            }
            1
        } else {
            config.pool_size.max(1)
        };

        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            connections.push(sqlite::open_connection(config)?);
        }
        if let Some(first) = connections.first() {
            sqlite::migrate(first)?;
        }
        for conn in &connections {
            sqlite::ping(conn)?;
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let rx = Arc::new(Mutex::new(rx));
        for (worker, conn) in connections.into_iter().enumerate() {
            tokio::spawn(worker_loop(worker, conn, Arc::clone(&rx)));
        }

        info!(path = %config.path.display(), pool_size, "JobStore opened");
        Ok(Self { tx, pool_size })
    }

    /// Number of pooled connections
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StoreResponse<T>>) -> StoreCommand) -> StoreResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Round-trip a trivial query through a pooled connection
    pub async fn ping(&self) -> StoreResponse<()> {
        self.request(|reply| StoreCommand::Ping { reply }).await
    }

    /// Insert a new job
    pub async fn create_job(&self, job: Job) -> StoreResponse<Job> {
        debug!(job_id = %job.id, name = %job.name, "create_job: called");
        self.request(|reply| StoreCommand::CreateJob { job, reply }).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> StoreResponse<Option<Job>> {
        debug!(%id, "get_job: called");
        self.request(|reply| StoreCommand::GetJob {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Apply a patch to a job and return the updated record
    pub async fn update_job(&self, id: &str, patch: JobPatch) -> StoreResponse<Job> {
        debug!(%id, ?patch, "update_job: called");
        self.request(|reply| StoreCommand::UpdateJob {
            id: id.to_string(),
            patch,
            now: Utc::now(),
            reply,
        })
        .await
    }

    /// Delete a job
    pub async fn delete_job(&self, id: &str) -> StoreResponse<()> {
        debug!(%id, "delete_job: called");
        self.request(|reply| StoreCommand::DeleteJob {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// List jobs, optionally only enabled or only disabled ones
    pub async fn list_jobs(&self, enabled: Option<bool>) -> StoreResponse<Vec<Job>> {
        debug!(?enabled, "list_jobs: called");
        self.request(|reply| StoreCommand::ListJobs { enabled, reply }).await
    }

    /// Enabled jobs whose next run is at or before `now`, soonest first
    pub async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResponse<Vec<Job>> {
        self.request(|reply| StoreCommand::DueJobs { now, limit, reply }).await
    }

    /// Mark a job dispatched at `ran_at` and advance its schedule
    pub async fn record_run(&self, id: &str, ran_at: DateTime<Utc>) -> StoreResponse<Job> {
        debug!(%id, %ran_at, "record_run: called");
        self.request(|reply| StoreCommand::RecordRun {
            id: id.to_string(),
            ran_at,
            reply,
        })
        .await
    }
}

/// Worker owning one connection; exits once every JobStore handle is dropped
async fn worker_loop(worker: usize, mut conn: Connection, rx: Arc<Mutex<mpsc::Receiver<StoreCommand>>>) {
    debug!(worker, "worker_loop: started");
    loop {
        let command = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(command) = command else {
            break;
        };
        handle_command(&mut conn, command);
    }
    debug!(worker, "worker_loop: channel closed, exiting");
}

fn handle_command(conn: &mut Connection, command: StoreCommand) {
    // A dropped reply receiver means the caller gave up; nothing to report.
    match command {
        StoreCommand::Ping { reply } => {
            let _ = reply.send(sqlite::ping(conn));
        }
        StoreCommand::CreateJob { job, reply } => {
            let _ = reply.send(sqlite::create_job(conn, &job));
        }
        StoreCommand::GetJob { id, reply } => {
            let _ = reply.send(sqlite::get_job(conn, &id));
        }
        StoreCommand::UpdateJob { id, patch, now, reply } => {
            let _ = reply.send(sqlite::update_job(conn, &id, patch, now));
        }
        StoreCommand::DeleteJob { id, reply } => {
            let _ = reply.send(sqlite::delete_job(conn, &id));
        }
        StoreCommand::ListJobs { enabled, reply } => {
            let _ = reply.send(sqlite::list_jobs(conn, enabled));
        }
        StoreCommand::DueJobs { now, limit, reply } => {
            let _ = reply.send(sqlite::due_jobs(conn, now, limit));
        }
        StoreCommand::RecordRun { id, ran_at, reply } => {
            let _ = reply.send(sqlite::record_run(conn, &id, ran_at));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_DATABASE;
    use crate::domain::NewJob;
    use chrono::Duration;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            path: PathBuf::from(MEMORY_DATABASE),
            pool_size: 4,
            busy_timeout_ms: 1_000,
        }
    }

    fn new_job(name: &str, interval_secs: u64) -> Job {
        Job::from_new(NewJob::new(name, format!("echo {name}"), interval_secs), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_uses_single_connection() {
        let store = JobStore::open(&memory_config()).unwrap();
        assert_eq!(store.pool_size(), 1);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let store = JobStore::open(&memory_config()).unwrap();

        let created = store.create_job(new_job("nightly", 60)).await.unwrap();
        let fetched = store.get_job(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "nightly");

        let updated = store
            .update_job(
                &created.id,
                JobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);

        assert_eq!(store.list_jobs(Some(true)).await.unwrap().len(), 0);
        assert_eq!(store.list_jobs(Some(false)).await.unwrap().len(), 1);
        assert_eq!(store.list_jobs(None).await.unwrap().len(), 1);

        store.delete_job(&created.id).await.unwrap();
        assert!(store.get_job(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let store = JobStore::open(&memory_config()).unwrap();

        assert!(matches!(store.delete_job("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update_job("nope", JobPatch::default()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.record_run("nope", Utc::now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_patch_is_rejected() {
        let store = JobStore::open(&memory_config()).unwrap();
        let job = store.create_job(new_job("a", 10)).await.unwrap();

        let result = store
            .update_job(
                &job.id,
                JobPatch {
                    interval_secs: Some(0),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().interval_secs, 10);
    }

    #[tokio::test]
    async fn test_due_jobs_and_record_run() {
        let store = JobStore::open(&memory_config()).unwrap();
        let short = store.create_job(new_job("short", 1)).await.unwrap();
        store.create_job(new_job("long", 3600)).await.unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let due = store.due_jobs(later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, short.id);

        let ran = store.record_run(&short.id, later).await.unwrap();
        assert_eq!(ran.run_count, 1);
        assert!(store.due_jobs(later, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_run_rejects_job_no_longer_due() {
        let store = JobStore::open(&memory_config()).unwrap();
        let job = store.create_job(new_job("once", 60)).await.unwrap();
        let later = Utc::now() + Duration::seconds(90);

        store.record_run(&job.id, later).await.unwrap();
        assert!(matches!(
            store.record_run(&job.id, later).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().run_count, 1);

        let early = store.create_job(new_job("early", 3600)).await.unwrap();
        assert!(matches!(
            store.record_run(&early.id, Utc::now()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_pool_serves_concurrent_callers() {
        let temp = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: temp.path().join("jobs.db"),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        };
        let store = JobStore::open(&config).unwrap();
        assert_eq!(store.pool_size(), 4);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_job(new_job(&format!("job-{i}"), 30)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_jobs(None).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_open_fails_for_unreachable_path() {
        let config = DatabaseConfig {
            path: PathBuf::from("/nonexistent/dir/jobs.db"),
            ..Default::default()
        };
        assert!(matches!(JobStore::open(&config), Err(StoreError::Open { .. })));
    }
}
