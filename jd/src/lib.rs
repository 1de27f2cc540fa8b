//! JobDaemon - job scheduling service
//!
//! The core is the [`lifecycle::ServiceLifecycle`] coordinator: it builds the
//! shared [`bundle::DependencyBundle`], binds the [`handler::JobHandler`] to
//! the RPC transport, registers with the service registry, starts the
//! scheduling loop exactly once and signals it to stop when serving ends.

pub mod bundle;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use bundle::DependencyBundle;
pub use config::Config;
pub use handler::JobHandler;
pub use lifecycle::{LifecycleError, LifecyclePhase, ServiceLifecycle};
