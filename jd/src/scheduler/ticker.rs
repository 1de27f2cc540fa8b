//! TickScheduler - advances due jobs on a fixed tick
//!
//! Dispatch here means recording the run and moving `next_run_at` forward.
//! The job's command is never executed by this loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

use crate::bundle::DependencyBundle;
use crate::config::SchedulerConfig;
use crate::store::StoreError;
use crate::telemetry::SpanStatus;

use super::SchedulingLoop;

/// Polls the store for due jobs every tick
#[derive(Debug, Clone)]
pub struct TickScheduler {
    tick: Duration,
    batch_size: usize,
}

impl TickScheduler {
    pub fn new(tick: Duration, batch_size: usize) -> Self {
        Self {
            tick,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.tick(), config.batch_size)
    }

    /// Dispatch every job due now; returns how many were advanced
    pub async fn dispatch_due(&self, bundle: &DependencyBundle) -> Result<usize, StoreError> {
        let now = Utc::now();
        let due = bundle.store().due_jobs(now, self.batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "dispatch_due: jobs due");

        let mut dispatched = 0;
        for job in due {
            let span = bundle.tracer().start_span("scheduler.dispatch");
            let result = bundle
                .store()
                .record_run(&job.id, now)
                .instrument(span.span().clone())
                .await;
            match result {
                Ok(job) => {
                    info!(
                        job_id = %job.id,
                        name = %job.name,
                        run_count = job.run_count,
                        next_run_at = ?job.next_run_at,
                        "Dispatched job"
                    );
                    span.finish(SpanStatus::Ok);
                    dispatched += 1;
                }
                // Deleted between the query and the dispatch
                Err(StoreError::NotFound(id)) => {
                    debug!(job_id = %id, "dispatch_due: job vanished before dispatch");
                    span.finish(SpanStatus::Ok);
                }
                // Disabled, rescheduled or dispatched elsewhere since the query
                Err(StoreError::Conflict(reason)) => {
                    debug!(job_id = %job.id, %reason, "dispatch_due: job no longer due");
                    span.finish(SpanStatus::Ok);
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to record job run");
                    span.finish(SpanStatus::Error);
                }
            }
        }
        Ok(dispatched)
    }
}

#[async_trait]
impl SchedulingLoop for TickScheduler {
    async fn run(&self, bundle: DependencyBundle, mut stop: mpsc::Receiver<()>) {
        info!(tick = ?self.tick, batch_size = self.batch_size, "TickScheduler starting");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    info!("TickScheduler received stop signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_due(&bundle).await {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
        info!("TickScheduler stopped");
    }
}
