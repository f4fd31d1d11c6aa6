use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::info;

use crate::db::entities::campaign;
use crate::db::enums::{CampaignKind, CampaignStatus};
use crate::db::services::subscription_service::{self, QuotaAction, QuotaDecision, QuotaError};
use crate::db::services::target_service::{self, TargetSpec};

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("Campaign {0} not found")]
    NotFound(i32),
    #[error("{}", subscription_service::denial_message(.0))]
    QuotaDenied(QuotaDecision),
    #[error("Cannot {action} a {from} campaign")]
    InvalidTransition {
        from: CampaignStatus,
        action: &'static str,
    },
}

/// Input for campaign creation, as assembled by the (out of scope) wizard.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub account_id: i32,
    pub name: String,
    pub kind: CampaignKind,
    pub target_source: String,
    pub message_template: Option<String>,
    pub per_minute: i32,
    pub delay_min: i32,
    pub delay_max: i32,
    pub daily_cap: i32,
    pub retry_attempts: i32,
    pub targets: Vec<TargetSpec>,
}

/// Creates a campaign in `draft` with its target list. Creation is gated on
/// the plan's active-campaign cap for the kind.
pub async fn create_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    new: NewCampaign,
) -> Result<campaign::Model, CampaignError> {
    let action = match new.kind {
        CampaignKind::Dm => QuotaAction::CreateDmCampaign,
        CampaignKind::Follow => QuotaAction::CreateFollowCampaign,
    };
    let decision = subscription_service::authorize(db, user_id, action).await?;
    if decision != QuotaDecision::Ok {
        return Err(CampaignError::QuotaDenied(decision));
    }

    let now = Utc::now();
    let created = campaign::ActiveModel {
        user_id: Set(user_id),
        account_id: Set(new.account_id),
        name: Set(new.name),
        kind: Set(new.kind),
        status: Set(CampaignStatus::Draft),
        target_source: Set(new.target_source),
        message_template: Set(new.message_template),
        pacing_per_minute: Set(new.per_minute),
        pacing_delay_min: Set(new.delay_min),
        pacing_delay_max: Set(new.delay_max),
        pacing_daily_cap: Set(new.daily_cap),
        pacing_retry_attempts: Set(new.retry_attempts),
        stats_total: Set(0),
        stats_sent: Set(0),
        stats_failed: Set(0),
        pacing_minute_count: Set(0),
        pacing_day_count: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let total = target_service::insert_targets(db, created.id, new.targets).await?;
    info!(campaign_id = created.id, kind = %created.kind, total, "Campaign created");

    get_campaign(db, created.id).await
}

pub async fn get_campaign(
    db: &DatabaseConnection,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    campaign::Entity::find_by_id(campaign_id)
        .one(db)
        .await?
        .ok_or(CampaignError::NotFound(campaign_id))
}

pub async fn get_campaign_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    campaign::Entity::find_by_id(campaign_id)
        .filter(campaign::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(CampaignError::NotFound(campaign_id))
}

/// Campaign listings read the ledger-maintained aggregates as-is; nothing
/// recomputes them from the targets table.
pub async fn list_campaigns_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    kind: Option<CampaignKind>,
) -> Result<Vec<campaign::Model>, CampaignError> {
    let mut query = campaign::Entity::find().filter(campaign::Column::UserId.eq(user_id));
    if let Some(kind) = kind {
        query = query.filter(campaign::Column::Kind.eq(kind));
    }
    Ok(query
        .order_by_desc(campaign::Column::CreatedAt)
        .all(db)
        .await?)
}

/// All campaigns eligible for ticks; the scheduler re-derives its job set
/// from this on process start.
pub async fn list_active_campaigns(
    db: &DatabaseConnection,
) -> Result<Vec<campaign::Model>, DbErr> {
    campaign::Entity::find()
        .filter(campaign::Column::Status.eq(CampaignStatus::Active))
        .all(db)
        .await
}

/// Draft -> active. The caller is responsible for scheduling the queue job.
pub async fn start_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    let found = get_campaign_for_user(db, user_id, campaign_id).await?;
    if found.status != CampaignStatus::Draft {
        return Err(CampaignError::InvalidTransition { from: found.status, action: "start" });
    }
    set_status(db, found, CampaignStatus::Active, None).await
}

/// Paused -> active, clearing the recorded pause reason.
pub async fn resume_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    let found = get_campaign_for_user(db, user_id, campaign_id).await?;
    if found.status != CampaignStatus::Paused {
        return Err(CampaignError::InvalidTransition { from: found.status, action: "resume" });
    }
    set_status(db, found, CampaignStatus::Active, None).await
}

/// Active -> paused at the user's request. The queue job stays scheduled;
/// ticks for a paused campaign do nothing.
pub async fn pause_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    let found = get_campaign_for_user(db, user_id, campaign_id).await?;
    if found.status != CampaignStatus::Active {
        return Err(CampaignError::InvalidTransition { from: found.status, action: "pause" });
    }
    set_status(db, found, CampaignStatus::Paused, Some("Paused by user".to_string())).await
}

/// Active|paused -> stopped. Stopped is terminal for scheduling; the caller
/// must remove the queue job.
pub async fn stop_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<campaign::Model, CampaignError> {
    let found = get_campaign_for_user(db, user_id, campaign_id).await?;
    if !matches!(found.status, CampaignStatus::Active | CampaignStatus::Paused) {
        return Err(CampaignError::InvalidTransition { from: found.status, action: "stop" });
    }
    set_status(db, found, CampaignStatus::Stopped, None).await
}

/// Systemic pause used by the dispatcher (quota denial, failure-rate breach).
/// The reason is user-visible.
pub async fn pause_with_reason(
    db: &DatabaseConnection,
    campaign_id: i32,
    reason: &str,
) -> Result<(), CampaignError> {
    let found = get_campaign(db, campaign_id).await?;
    if found.status != CampaignStatus::Active {
        return Ok(());
    }
    info!(campaign_id, reason, "Pausing campaign");
    set_status(db, found, CampaignStatus::Paused, Some(reason.to_string())).await?;
    Ok(())
}

/// Pauses every active campaign using the account; the credential-failure
/// escalation path.
pub async fn pause_campaigns_for_account(
    db: &DatabaseConnection,
    account_id: i32,
    reason: &str,
) -> Result<u64, DbErr> {
    let result = campaign::Entity::update_many()
        .col_expr(campaign::Column::Status, Expr::value(CampaignStatus::Paused))
        .col_expr(campaign::Column::PauseReason, Expr::value(reason))
        .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(campaign::Column::AccountId.eq(account_id))
        .filter(campaign::Column::Status.eq(CampaignStatus::Active))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        info!(account_id, affected = result.rows_affected, reason, "Paused campaigns for account");
    }
    Ok(result.rows_affected)
}

/// Reached when no eligible targets remain and none are pending retry.
pub async fn mark_completed(
    db: &DatabaseConnection,
    campaign_id: i32,
) -> Result<(), CampaignError> {
    let found = get_campaign(db, campaign_id).await?;
    info!(campaign_id, sent = found.stats_sent, failed = found.stats_failed, "Campaign completed");
    set_status(db, found, CampaignStatus::Completed, None).await?;
    Ok(())
}

/// Removes the campaign; targets go with it via the FK cascade.
pub async fn delete_campaign(
    db: &DatabaseConnection,
    user_id: i32,
    campaign_id: i32,
) -> Result<(), CampaignError> {
    let found = get_campaign_for_user(db, user_id, campaign_id).await?;
    campaign::Entity::delete_by_id(found.id).exec(db).await?;
    info!(campaign_id, "Campaign deleted");
    Ok(())
}

async fn set_status(
    db: &DatabaseConnection,
    found: campaign::Model,
    status: CampaignStatus,
    pause_reason: Option<String>,
) -> Result<campaign::Model, CampaignError> {
    let mut active: campaign::ActiveModel = found.into();
    active.status = Set(status);
    active.pause_reason = Set(pause_reason);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn campaign_row(status: CampaignStatus) -> campaign::Model {
        campaign::Model {
            id: 3,
            user_id: 1,
            account_id: 1,
            name: "spring outreach".to_string(),
            kind: CampaignKind::Dm,
            status,
            target_source: "import".to_string(),
            message_template: Some("Hi {{ name }}".to_string()),
            pacing_per_minute: 3,
            pacing_delay_min: 15,
            pacing_delay_max: 30,
            pacing_daily_cap: 50,
            pacing_retry_attempts: 2,
            stats_total: 0,
            stats_sent: 0,
            stats_failed: 0,
            pause_reason: None,
            pacing_minute_started_at: None,
            pacing_minute_count: 0,
            pacing_day: None,
            pacing_day_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn db_returning(status: CampaignStatus) -> DatabaseConnection {
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![campaign_row(status)]])
            .into_connection()
    }

    #[tokio::test]
    async fn test_start_requires_draft() {
        let db = db_returning(CampaignStatus::Active);
        let err = start_campaign(&db, 1, 3).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InvalidTransition { from: CampaignStatus::Active, action: "start" }
        ));
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        // A stopped campaign never comes back through resume.
        let db = db_returning(CampaignStatus::Stopped);
        let err = resume_campaign(&db, 1, 3).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InvalidTransition { from: CampaignStatus::Stopped, action: "resume" }
        ));
    }

    #[tokio::test]
    async fn test_stop_rejects_completed() {
        let db = db_returning(CampaignStatus::Completed);
        let err = stop_campaign(&db, 1, 3).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InvalidTransition { from: CampaignStatus::Completed, action: "stop" }
        ));
    }

    #[tokio::test]
    async fn test_pause_requires_active() {
        let db = db_returning(CampaignStatus::Draft);
        let err = pause_campaign(&db, 1, 3).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InvalidTransition { from: CampaignStatus::Draft, action: "pause" }
        ));
    }

    #[tokio::test]
    async fn test_systemic_pause_only_touches_active_campaigns() {
        // Already paused: pause_with_reason must not overwrite the original
        // reason or issue an update.
        let db = db_returning(CampaignStatus::Paused);
        pause_with_reason(&db, 3, "quota exhausted").await.unwrap();
    }
}
