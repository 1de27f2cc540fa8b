use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::rpc::RpcError;
use crate::scheduler::SupervisorError;
use crate::store::StoreError;
use crate::telemetry::TracerError;

/// Failures before the service starts serving
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create tracer: {0}")]
    Tracer(#[from] TracerError),

    #[error("database unavailable: {0}")]
    Database(#[from] StoreError),

    #[error("failed to register job handler: {0}")]
    Registration(#[source] RpcError),

    #[error("service registry registration failed: {0}")]
    Registry(#[from] RegistryError),
}

/// Failures while serving
#[derive(Debug, Error)]
pub enum RunError {
    #[error("RPC server failed: {0}")]
    Serve(#[source] RpcError),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("failed to start scheduling loop: {0}")]
    Supervisor(#[from] SupervisorError),
}

impl LifecycleError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Initialization(_) => 2,
            Self::Run(_) | Self::Supervisor(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let init = LifecycleError::from(InitializationError::from(ConfigError::ZeroTick));
        assert_eq!(init.exit_code(), 2);

        let run = LifecycleError::from(RunError::Serve(RpcError::NoHandler));
        assert_eq!(run.exit_code(), 1);

        let load = LifecycleError::from(InitializationError::ConfigLoad("bad yaml".to_string()));
        assert_eq!(load.exit_code(), 2);

        let supervisor = LifecycleError::from(SupervisorError::AlreadyRunning);
        assert_eq!(supervisor.exit_code(), 1);
    }

    #[test]
    fn test_initialization_message_names_cause() {
        let err = LifecycleError::from(InitializationError::from(ConfigError::EmptyServiceName));
        assert_eq!(err.to_string(), "invalid configuration: service name must not be empty");
    }
}
