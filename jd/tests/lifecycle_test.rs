//! Lifecycle coordinator tests: startup ordering, single start and shutdown delivery

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Mutex, mpsc, watch};

use jobdaemon::config::{Config, MEMORY_DATABASE};
use jobdaemon::domain::{Job, NewJob};
use jobdaemon::handler::JobHandler;
use jobdaemon::lifecycle::{InitializationError, LifecycleError, LifecyclePhase, RunError, ServiceLifecycle};
use jobdaemon::registry::{FileRegistry, RegistryError, ServiceRecord, ServiceRegistry};
use jobdaemon::rpc::{RpcError, RpcRequest, RpcResponse, ShutdownSignal, Transport};
use jobdaemon::scheduler::{SchedulingLoop, SupervisorState};
use jobdaemon::store::JobStore;
use jobdaemon::telemetry::{SpanStatus, Tracer, read_spans};
use jobdaemon::DependencyBundle;

/// Loop that counts starts and received stop values, and records how many
/// jobs it could see when it started
#[derive(Default)]
struct CountingLoop {
    starts: AtomicUsize,
    stops: AtomicUsize,
    finished: AtomicBool,
    jobs_seen: Mutex<Option<usize>>,
}

#[async_trait]
impl SchedulingLoop for CountingLoop {
    async fn run(&self, bundle: DependencyBundle, mut stop: mpsc::Receiver<()>) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let seen = bundle.store().list_jobs(None).await.ok().map(|jobs| jobs.len());
        *self.jobs_seen.lock().await = seen;
        while stop.recv().await.is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl CountingLoop {
    async fn wait_finished(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.finished.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduling loop did not finish");
    }
}

enum ServeBehavior {
    UntilShutdown,
    Fail,
}

/// Transport that records what the lifecycle did to it
struct MockTransport {
    behavior: ServeBehavior,
    phases: watch::Receiver<LifecyclePhase>,
    handler: Option<JobHandler>,
    serve_calls: usize,
    phase_at_serve: Option<LifecyclePhase>,
    created_during_serve: Option<Job>,
}

impl MockTransport {
    fn new(behavior: ServeBehavior, phases: watch::Receiver<LifecyclePhase>) -> Self {
        Self {
            behavior,
            phases,
            handler: None,
            serve_calls: 0,
            phase_at_serve: None,
            created_during_serve: None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn endpoint(&self) -> String {
        "/tmp/mock-jobd.sock".to_string()
    }

    fn register(&mut self, handler: JobHandler) -> Result<(), RpcError> {
        if self.handler.is_some() {
            return Err(RpcError::HandlerAlreadyRegistered);
        }
        self.handler = Some(handler);
        Ok(())
    }

    async fn serve(&mut self, shutdown: ShutdownSignal) -> Result<(), RpcError> {
        self.serve_calls += 1;
        self.phase_at_serve = Some(*self.phases.borrow());
        let handler = self.handler.clone().ok_or(RpcError::NoHandler)?;
        let request = RpcRequest::CreateJob {
            job: NewJob::new("served", "echo served", 30),
        };
        self.created_during_serve = match handler.handle(request).await {
            RpcResponse::Job { job } => Some(job),
            _ => None,
        };
        match self.behavior {
            ServeBehavior::UntilShutdown => {
                shutdown.await;
                Ok(())
            }
            ServeBehavior::Fail => Err(RpcError::Accept(std::io::Error::other("listener went away"))),
        }
    }
}

struct FailingRegistry;

#[async_trait]
impl ServiceRegistry for FailingRegistry {
    async fn register(&self, _record: &ServiceRecord, _ttl: Duration) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("registry is down".to_string()))
    }

    async fn deregister(&self, _record: &ServiceRecord) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn lookup(&self, _name: &str) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(Vec::new())
    }
}

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.service.name = "jobs.test".to_string();
    config.database.path = PathBuf::from(MEMORY_DATABASE);
    config.registry.dir = temp.path().join("registry");
    config.tracing.spans_file = None;
    config
}

fn memory_bundle() -> DependencyBundle {
    let mut config = Config::default();
    config.database.path = PathBuf::from(MEMORY_DATABASE);
    let store = JobStore::open(&config.database).unwrap();
    DependencyBundle::from_parts(store, Tracer::log_only("jobs.test"))
}

fn immediate() -> ShutdownSignal {
    Box::pin(async {})
}

#[tokio::test]
async fn test_graceful_run_serves_and_stops_loop_once() {
    let temp = TempDir::new().unwrap();
    let spans_file = temp.path().join("spans.jsonl");
    let mut config = test_config(&temp);
    config.tracing.spans_file = Some(spans_file.clone());
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry.clone(), counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown: ShutdownSignal = Box::pin(async move {
        let _ = stop_rx.await;
    });
    let registry_check = registry.clone();
    let trigger = tokio::spawn(async move {
        // Registered while serving
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found = registry_check.lookup("jobs.test").await.unwrap_or_default();
                if !found.is_empty() {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let _ = stop_tx.send(());
        found
    });

    lifecycle.run(&mut transport, shutdown).await.unwrap();

    let found = trigger.await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].endpoint, "/tmp/mock-jobd.sock");

    assert_eq!(transport.serve_calls, 1);
    assert_eq!(transport.phase_at_serve, Some(LifecyclePhase::Serving));
    assert!(transport.created_during_serve.is_some());
    assert_eq!(lifecycle.phase(), LifecyclePhase::Stopped);
    assert_eq!(lifecycle.supervisor().state(), SupervisorState::Stopped);

    // Deregistered on the way out
    assert!(registry.lookup("jobs.test").await.unwrap().is_empty());

    // Spans from served requests are on disk once run returns
    let spans = read_spans(&spans_file).unwrap();
    let created = spans.iter().find(|s| s.operation == "CreateJob").unwrap();
    assert_eq!(created.service, "jobs.test");
    assert_eq!(created.status, SpanStatus::Ok);

    counting.wait_finished().await;
    assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delayed_construction_is_visible_to_loop() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry, counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());

    let construct = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let bundle = memory_bundle();
        let seed = Job::from_new(NewJob::new("seed", "echo seed", 60), chrono::Utc::now()).unwrap();
        bundle.store().create_job(seed).await?;
        Ok::<_, InitializationError>(bundle)
    };

    // Hold serving open until the loop has looked at the store
    let loop_view = counting.clone();
    let shutdown: ShutdownSignal = Box::pin(async move {
        while loop_view.jobs_seen.lock().await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    lifecycle.run_with(construct, &mut transport, shutdown).await.unwrap();

    counting.wait_finished().await;
    assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
    // The seed job (and the one created while serving, if it landed first)
    let seen = counting.jobs_seen.lock().await.unwrap_or(0);
    assert!(seen >= 1, "loop saw {seen} jobs");
}

#[tokio::test]
async fn test_unreachable_database_never_serves() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp);
    config.database.path = PathBuf::from("/nonexistent/dir/jobs.db");
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry.clone(), counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());

    let err = lifecycle.run(&mut transport, immediate()).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Initialization(InitializationError::Database(_))
    ));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(transport.serve_calls, 0);
    assert!(transport.handler.is_none());
    assert!(lifecycle.phase() < LifecyclePhase::Serving);
    assert_eq!(lifecycle.supervisor().state(), SupervisorState::NotStarted);
    assert_eq!(counting.starts.load(Ordering::SeqCst), 0);
    assert!(registry.lookup("jobs.test").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_failure_never_starts_loop() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, Arc::new(FailingRegistry), counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());

    let err = lifecycle.run(&mut transport, immediate()).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Initialization(InitializationError::Registry(_))
    ));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(transport.serve_calls, 0);
    assert_eq!(lifecycle.phase(), LifecyclePhase::Registered);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counting.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_serve_failure_still_signals_stop() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry.clone(), counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::Fail, lifecycle.subscribe());

    let err = lifecycle
        .run(&mut transport, Box::pin(std::future::pending()))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Run(RunError::Serve(RpcError::Accept(_)))));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(lifecycle.phase(), LifecyclePhase::Stopped);
    assert_eq!(lifecycle.supervisor().state(), SupervisorState::Stopped);
    assert!(registry.lookup("jobs.test").await.unwrap().is_empty());

    counting.wait_finished().await;
    assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_config_skips_construction() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp);
    config.scheduler.tick_ms = 0;
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry, counting.clone());
    let mut transport = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());

    let constructed = Arc::new(AtomicBool::new(false));
    let flag = constructed.clone();
    let construct = async move {
        flag.store(true, Ordering::SeqCst);
        Ok::<_, InitializationError>(memory_bundle())
    };

    let err = lifecycle.run_with(construct, &mut transport, immediate()).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Initialization(InitializationError::Config(_))
    ));
    assert_eq!(err.exit_code(), 2);
    assert!(!constructed.load(Ordering::SeqCst));
    assert_eq!(lifecycle.phase(), LifecyclePhase::Init);
}

#[tokio::test]
async fn test_second_run_does_not_restart_loop() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let registry = Arc::new(FileRegistry::new(&config.registry.dir));
    let counting = Arc::new(CountingLoop::default());

    let mut lifecycle = ServiceLifecycle::new(config, registry.clone(), counting.clone());
    let mut first = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());
    lifecycle.run(&mut first, immediate()).await.unwrap();

    let mut second = MockTransport::new(ServeBehavior::UntilShutdown, lifecycle.subscribe());
    let err = lifecycle.run(&mut second, immediate()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Supervisor(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(second.serve_calls, 0);
    assert!(registry.lookup("jobs.test").await.unwrap().is_empty());

    counting.wait_finished().await;
    assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
}
