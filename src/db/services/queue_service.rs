use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use tracing::info;

use crate::db::entities::queue_job;
use crate::db::enums::{CampaignKind, QueueJobStatus};

/// How long finished job records are kept before housekeeping deletes them.
const COMPLETED_RETENTION_HOURS: i64 = 24;
const FAILED_RETENTION_DAYS: i64 = 7;

/// Persists the outcome of one executed tick. Bookkeeping only; losing these
/// rows costs observability, never correctness.
pub async fn record_run(
    db: &DatabaseConnection,
    campaign_id: i32,
    kind: CampaignKind,
    status: QueueJobStatus,
    error: Option<String>,
    duration_ms: i64,
) -> Result<(), DbErr> {
    queue_job::ActiveModel {
        campaign_id: Set(campaign_id),
        queue: Set(kind.queue_name().to_string()),
        status: Set(status),
        error: Set(error),
        duration_ms: Set(duration_ms),
        finished_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct FinishedCounts {
    pub completed: u64,
    pub failed: u64,
}

/// Completed/failed totals for one queue, for the health probe.
pub async fn finished_counts(
    db: &DatabaseConnection,
    kind: CampaignKind,
) -> Result<FinishedCounts, DbErr> {
    let completed = queue_job::Entity::find()
        .filter(queue_job::Column::Queue.eq(kind.queue_name()))
        .filter(queue_job::Column::Status.eq(QueueJobStatus::Completed))
        .count(db)
        .await?;
    let failed = queue_job::Entity::find()
        .filter(queue_job::Column::Queue.eq(kind.queue_name()))
        .filter(queue_job::Column::Status.eq(QueueJobStatus::Failed))
        .count(db)
        .await?;
    Ok(FinishedCounts { completed, failed })
}

/// Deletes finished job records past their retention window: completed ones
/// after 24 hours, failed ones after 7 days.
pub async fn prune_finished(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<u64, DbErr> {
    let completed_cutoff = now - Duration::hours(COMPLETED_RETENTION_HOURS);
    let failed_cutoff = now - Duration::days(FAILED_RETENTION_DAYS);

    let completed = queue_job::Entity::delete_many()
        .filter(queue_job::Column::Status.eq(QueueJobStatus::Completed))
        .filter(queue_job::Column::FinishedAt.lt(completed_cutoff))
        .exec(db)
        .await?;
    let failed = queue_job::Entity::delete_many()
        .filter(queue_job::Column::Status.eq(QueueJobStatus::Failed))
        .filter(queue_job::Column::FinishedAt.lt(failed_cutoff))
        .exec(db)
        .await?;

    let pruned = completed.rows_affected + failed.rows_affected;
    if pruned > 0 {
        info!(pruned, "Pruned finished queue jobs");
    }
    Ok(pruned)
}
