//! Shared handler state.

use std::sync::Arc;

use issuesync_core::{LogCollector, SyncService};
use issuesync_types::config::SyncConfig;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
}

impl AppState {
    pub fn new(config: &SyncConfig) -> anyhow::Result<Self> {
        let service = SyncService::new(config, Arc::new(LogCollector))?;
        Ok(Self { service: Arc::new(service) })
    }
}
