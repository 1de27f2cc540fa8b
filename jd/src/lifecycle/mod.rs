//! Service lifecycle: startup ordering, serving and shutdown

mod coordinator;
mod error;

pub use coordinator::ServiceLifecycle;
pub use error::{InitializationError, LifecycleError, RunError};

use std::fmt;

/// Progress of a single service run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Init,
    DependencyReady,
    Registered,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::DependencyReady => "dependency-ready",
            Self::Registered => "registered",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}
