//! Background scheduling loop and its supervisor

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bundle::DependencyBundle;

mod supervisor;
mod ticker;

pub use supervisor::{SchedulerSupervisor, SupervisorError, SupervisorState};
pub use ticker::TickScheduler;

/// A long-running loop over the shared dependencies
///
/// Implementations return once `stop` yields a value or is closed.
/// Failures inside the loop are the loop's own concern; nothing restarts it.
#[async_trait]
pub trait SchedulingLoop: Send + Sync + 'static {
    async fn run(&self, bundle: DependencyBundle, stop: mpsc::Receiver<()>);
}
