pub mod scheduler;

use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::db::services::queue_service;

pub use scheduler::{CampaignScheduler, QueueStats, SchedulerStats};

const HOUSEKEEPING_INTERVAL_HOURS: u64 = 6;

/// Periodically prunes finished job records past their retention window.
/// Housekeeping, not correctness; it dies with the process.
pub fn spawn_housekeeping(db: DatabaseConnection) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(HOUSEKEEPING_INTERVAL_HOURS * 3600));
        ticker.tick().await; // immediate first tick: prune leftovers from the previous run
        loop {
            if let Err(e) = queue_service::prune_finished(&db, Utc::now()).await {
                warn!(error = %e, "Queue pruning failed");
            }
            ticker.tick().await;
        }
    })
}
