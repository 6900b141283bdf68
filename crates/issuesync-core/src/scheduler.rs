//! Cron-driven reconciliation.
//!
//! Webhooks get lost (downtime, delivery failures, misconfiguration),
//! so every group with a `scheduled` section periodically re-syncs all
//! issues updated within its lookback window.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::error::SyncError;
use crate::service::SyncService;

pub struct SyncScheduler {
    scheduler: JobScheduler,
}

impl SyncScheduler {
    /// Registers one reconciliation job per scheduled group and starts
    /// ticking.
    pub async fn start(service: Arc<SyncService>) -> Result<Self, SyncError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        for name in service.group_names() {
            let context = service.context(name)?;
            let Some(scheduled) = &context.group().scheduled else {
                continue;
            };
            let cron = scheduled.cron.clone();
            let group = name.to_string();
            let service = Arc::clone(&service);
            let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let service = Arc::clone(&service);
                let group = group.clone();
                Box::pin(async move {
                    if let Err(e) = service.sync_last_updated(&group).await {
                        error!(group, error = %e, "scheduled sync failed");
                    }
                })
            })
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;
            scheduler.add(job).await.map_err(|e| SyncError::Scheduler(e.to_string()))?;
            info!(group = name, cron = %cron, "scheduled sync registered");
        }

        scheduler.start().await.map_err(|e| SyncError::Scheduler(e.to_string()))?;
        Ok(Self { scheduler })
    }

    pub async fn stop(&mut self) -> Result<(), SyncError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;
        info!("sync scheduler stopped");
        Ok(())
    }
}
