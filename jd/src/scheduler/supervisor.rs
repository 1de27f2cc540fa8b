//! SchedulerSupervisor - starts the loop once and delivers one stop signal

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bundle::DependencyBundle;

use super::SchedulingLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("scheduling loop is already running")]
    AlreadyRunning,

    #[error("scheduling loop was stopped and cannot be restarted")]
    AlreadyStopped,
}

/// Owner of the scheduling loop's task and stop channel
#[derive(Debug)]
pub struct SchedulerSupervisor {
    state: SupervisorState,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Default for SchedulerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerSupervisor {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::NotStarted,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Spawn the loop with `bundle` and the receive end of the stop channel
    pub fn start(
        &mut self,
        bundle: DependencyBundle,
        scheduling_loop: Arc<dyn SchedulingLoop>,
    ) -> Result<(), SupervisorError> {
        debug!(state = ?self.state, "SchedulerSupervisor::start: called");
        match self.state {
            SupervisorState::Running => return Err(SupervisorError::AlreadyRunning),
            SupervisorState::Stopped => return Err(SupervisorError::AlreadyStopped),
            SupervisorState::NotStarted => {}
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.handle = Some(tokio::spawn(async move {
            scheduling_loop.run(bundle, stop_rx).await;
            debug!("Scheduling loop returned");
        }));
        self.stop_tx = Some(stop_tx);
        self.state = SupervisorState::Running;
        info!("Scheduling loop started");
        Ok(())
    }

    /// Deliver the stop signal without blocking
    ///
    /// Returns `true` only for the call that actually sent the signal.
    /// The sender is dropped afterwards, so the loop also sees the channel close.
    pub fn signal_stop(&mut self) -> bool {
        debug!(state = ?self.state, "SchedulerSupervisor::signal_stop: called");
        let Some(stop_tx) = self.stop_tx.take() else {
            return false;
        };
        self.state = SupervisorState::Stopped;
        match stop_tx.try_send(()) {
            Ok(()) => {
                info!("Stop signal sent to scheduling loop");
                true
            }
            Err(e) => {
                // Loop already returned and dropped its receiver
                warn!(error = %e, "Scheduling loop was not listening for stop");
                false
            }
        }
    }

    /// Whether the loop task has returned (false if never started)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }
}
