//! Periodic retry sweep.

use crate::services::orchestrator::BillingOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs [`BillingOrchestrator::sweep`] every `interval` until cancelled.
pub struct RetrySweeper {
    orchestrator: Arc<BillingOrchestrator>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl RetrySweeper {
    pub fn new(orchestrator: Arc<BillingOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Retry sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Retry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.orchestrator.sweep().await {
                        tracing::error!(error = %e, "Retry sweep failed");
                    }
                    let pruned = self.orchestrator.locks().prune();
                    if pruned > 0 {
                        tracing::debug!(pruned = pruned, "Pruned idle account locks");
                    }
                }
            }
        }
    }
}
