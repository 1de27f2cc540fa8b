//! Registry heartbeat - renews a registration until stopped

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ServiceRecord, ServiceRegistry};

/// Background renewal of one service registration
pub struct Heartbeat {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn a task that re-registers `record` with `ttl` every `interval`
    ///
    /// The first renewal happens one interval after spawning; the caller is
    /// expected to have registered already.
    pub fn spawn(
        registry: Arc<dyn ServiceRegistry>,
        record: ServiceRecord,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        debug!(node_id = %record.node_id, ?interval, ?ttl, "Heartbeat::spawn: called");
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(node_id = %record.node_id, "Heartbeat: stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = registry.register(&record, ttl).await {
                            warn!(node_id = %record.node_id, error = %e, "Heartbeat: failed to renew registration");
                        }
                    }
                }
            }
        });
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Stop renewing and wait for the task to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
