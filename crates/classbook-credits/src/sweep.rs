//! Periodic reconciliation of lapsed accounts.
//!
//! Lazy reconciliation on every read/write path remains the baseline; the
//! sweeper only calls the same `reconcile` primitive ahead of time so that
//! reporting does not show lapsed accounts as still active.

use crate::config::SweepConfig;
use crate::domain::ledger::{CreditOperations, SweepReport};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub struct CreditSweeper {
    ledger: Arc<dyn CreditOperations>,
    batch_size: i64,
    interval: Duration,
}

impl CreditSweeper {
    pub fn new(ledger: Arc<dyn CreditOperations>, config: &SweepConfig) -> Self {
        Self {
            ledger,
            batch_size: config.batch_size,
            interval: config.interval(),
        }
    }

    /// Reconciles one batch of lapsed accounts.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let report = self.ledger.reconcile_lapsed(self.batch_size).await?;

        if report.examined == 0 {
            debug!("No lapsed accounts found");
        } else {
            info!(
                "Sweep completed: {} examined, {} renewed, {} expired, {} failed",
                report.examined, report.renewed, report.expired, report.failed
            );
        }
        Ok(report)
    }

    /// Sweeps every interval until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Credit sweeper started (interval={:?}, batch_size={})",
            self.interval, self.batch_size
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Credit sweep failed: {}", e);
                    }
                }
            }
        }

        info!("Credit sweeper stopped");
    }
}
