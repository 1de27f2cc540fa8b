//! ServiceLifecycle - sequences startup, serving and shutdown
//!
//! Startup order: validate config, construct the dependency bundle, register
//! the job handler with the transport, register with the service registry,
//! start the scheduling loop. The bundle is passed by value to each step
//! that needs it, so nothing can observe it before construction finishes.
//!
//! Shutdown is fire-and-forget: once serving ends the loop is signalled to
//! stop, but the coordinator returns without waiting for it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bundle::DependencyBundle;
use crate::config::Config;
use crate::handler::JobHandler;
use crate::registry::{Heartbeat, ServiceRecord, ServiceRegistry};
use crate::rpc::{ShutdownSignal, Transport};
use crate::scheduler::{SchedulerSupervisor, SchedulingLoop};

use super::LifecyclePhase;
use super::error::{InitializationError, LifecycleError, RunError};

/// Coordinator for one run of the service
pub struct ServiceLifecycle {
    config: Config,
    registry: Arc<dyn ServiceRegistry>,
    scheduling_loop: Arc<dyn SchedulingLoop>,
    supervisor: SchedulerSupervisor,
    phase_tx: watch::Sender<LifecyclePhase>,
}

impl ServiceLifecycle {
    pub fn new(config: Config, registry: Arc<dyn ServiceRegistry>, scheduling_loop: Arc<dyn SchedulingLoop>) -> Self {
        let (phase_tx, _) = watch::channel(LifecyclePhase::Init);
        Self {
            config,
            registry,
            scheduling_loop,
            supervisor: SchedulerSupervisor::new(),
            phase_tx,
        }
    }

    /// Watch phase transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase_tx.borrow()
    }

    pub fn supervisor(&self) -> &SchedulerSupervisor {
        &self.supervisor
    }

    fn enter(&self, phase: LifecyclePhase) {
        info!(%phase, "Lifecycle phase");
        self.phase_tx.send_replace(phase);
    }

    /// Run the service, constructing dependencies from the config
    pub async fn run(&mut self, transport: &mut dyn Transport, shutdown: ShutdownSignal) -> Result<(), LifecycleError> {
        let config = self.config.clone();
        self.run_with(
            async move { DependencyBundle::construct(&config).await },
            transport,
            shutdown,
        )
        .await
    }

    /// Run the service with a caller-supplied bundle construction
    ///
    /// `construct` is only polled after the config validates.
    pub async fn run_with<F>(
        &mut self,
        construct: F,
        transport: &mut dyn Transport,
        shutdown: ShutdownSignal,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = Result<DependencyBundle, InitializationError>>,
    {
        debug!(service = %self.config.service.name, "ServiceLifecycle::run_with: called");
        self.enter(LifecyclePhase::Init);

        let bundle = match self.initialize(construct).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(error = %e, "Initialization failed");
                return Err(e.into());
            }
        };

        let record = ServiceRecord::new(
            &self.config.service.name,
            &self.config.service.version,
            transport.endpoint(),
        );
        self.register_handler(&bundle, transport, &record).await.map_err(|e| {
            error!(error = %e, "Initialization failed");
            LifecycleError::from(e)
        })?;

        let heartbeat = Heartbeat::spawn(
            Arc::clone(&self.registry),
            record.clone(),
            self.config.registry.interval(),
            self.config.registry.ttl(),
        );

        if let Err(e) = self.supervisor.start(bundle.clone(), Arc::clone(&self.scheduling_loop)) {
            error!(error = %e, "Failed to start scheduling loop");
            heartbeat.stop().await;
            self.deregister(&record).await;
            self.enter(LifecyclePhase::Stopped);
            return Err(e.into());
        }

        self.enter(LifecyclePhase::Serving);
        let served = transport.serve(shutdown).await;

        self.enter(LifecyclePhase::Draining);
        heartbeat.stop().await;
        self.deregister(&record).await;
        self.supervisor.signal_stop();
        bundle.tracer().flush();
        self.enter(LifecyclePhase::Stopped);

        match served {
            Ok(()) => {
                info!("Service stopped gracefully");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Serving failed");
                Err(RunError::Serve(e).into())
            }
        }
    }

    async fn initialize<F>(&self, construct: F) -> Result<DependencyBundle, InitializationError>
    where
        F: Future<Output = Result<DependencyBundle, InitializationError>>,
    {
        self.config.validate()?;
        let bundle = construct.await?;
        self.enter(LifecyclePhase::DependencyReady);
        Ok(bundle)
    }

    async fn register_handler(
        &self,
        bundle: &DependencyBundle,
        transport: &mut dyn Transport,
        record: &ServiceRecord,
    ) -> Result<(), InitializationError> {
        transport
            .register(JobHandler::bind(bundle))
            .map_err(InitializationError::Registration)?;
        self.enter(LifecyclePhase::Registered);

        self.registry.register(record, self.config.registry.ttl()).await?;
        info!(
            service = %record.name,
            version = %record.version,
            node_id = %record.node_id,
            endpoint = %record.endpoint,
            "Registered with service registry"
        );
        Ok(())
    }

    async fn deregister(&self, record: &ServiceRecord) {
        match self.registry.deregister(record).await {
            Ok(()) => debug!(node_id = %record.node_id, "Deregistered from service registry"),
            Err(e) => warn!(node_id = %record.node_id, error = %e, "Failed to deregister from service registry"),
        }
    }
}
