//! Periodic presence and waiting-pool cleanup

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::HousekeepingConfig;
use crate::gateway::Gateway;

/// Counts from one housekeeping pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub idle: usize,
    pub orphans: usize,
    pub expired: usize,
}

#[derive(Clone)]
pub struct Housekeeper {
    gateway: Arc<Gateway>,
    config: HousekeepingConfig,
}

impl Housekeeper {
    pub fn new(gateway: Arc<Gateway>, config: HousekeepingConfig) -> Self {
        Self { gateway, config }
    }

    /// Idle connections first, so their waiting sessions are gone before the
    /// orphan scan runs.
    pub async fn run_once(&self) -> SweepReport {
        let idle = self.gateway.reap_idle(self.config.idle_timeout()).await;
        let orphans = self.gateway.reap_orphans().await;
        let expired = match self.config.waiting_timeout() {
            Some(timeout) => self.gateway.expire_waiting(timeout).await,
            None => 0,
        };

        SweepReport {
            idle,
            orphans,
            expired,
        }
    }

    /// Register the sweep on the configured cron schedule and start it
    pub async fn start(&self) -> Result<JobScheduler> {
        let housekeeper = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(self.config.schedule.as_str(), move |_, _| {
            let housekeeper = housekeeper.clone();
            Box::pin(async move {
                let report = housekeeper.run_once().await;
                info!(
                    idle = report.idle,
                    orphans = report.orphans,
                    expired = report.expired,
                    "Housekeeping pass finished"
                );
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!(
            "Started housekeeping scheduler with schedule: {}",
            self.config.schedule
        );
        Ok(scheduler)
    }
}
