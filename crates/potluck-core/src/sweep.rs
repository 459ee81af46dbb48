//! Periodic CloseExpiredEvents, plus derivation retries for finalized
//! plans that have none.
//!
//! The sweep is owned by whoever spawns it and stops when its cancellation
//! token fires. A failed pass is logged and the next tick tries again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::voting::{SweepReport, VotingCoordinator};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Deadline applied to each pass.
    pub pass_timeout: Option<Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            pass_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
pub struct ExpirySweep {
    coordinator: VotingCoordinator,
    config: SweepConfig,
}

impl ExpirySweep {
    pub fn new(coordinator: VotingCoordinator, config: SweepConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// One pass at the coordinator's current time: decide expired events,
    /// then retry derivation for finalized plans still missing it.
    pub async fn run_once(&self) -> SweepReport {
        let mut ctx = RequestContext::system();
        if let Some(timeout) = self.config.pass_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        let now = self.coordinator.now();
        let mut report = match self.coordinator.close_expired_events(&ctx, now).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "expiry sweep pass failed");
                SweepReport::default()
            }
        };
        match self.coordinator.retry_derivations(&ctx).await {
            Ok(retried) => report.merge(retried),
            Err(err) => warn!(error = %err, "derivation retry pass failed"),
        }
        report
    }

    /// Sweep every interval until `cancel` fires. The first pass runs
    /// immediately. Returns the number of events decided.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut decided = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    decided += report.decided.len();
                }
            }
        }

        debug!(decided, "expiry sweep stopped");
        decided
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(self.run(cancel))
    }
}
