use chrono::Utc;
use sea_orm::sea_query::{Expr, NullOrdering};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};

use crate::db::entities::{campaign, target};
use crate::db::enums::TargetStatus;

/// Result of one external action attempt against a target.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Delivered,
    Failed { error: String },
}

/// What an outcome write did to the target's ledger state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeChange {
    /// Terminal success; the target will never be selected again.
    Delivered,
    /// Failure with retry budget left; the target stays eligible.
    RetryScheduled { retry_count: i32 },
    /// Failure that exhausted the retry budget; terminal.
    TerminallyFailed { retry_count: i32 },
}

/// A target row to create in bulk at campaign creation.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub external_id: String,
    pub username: String,
    pub display_name: Option<String>,
}

/// Classifies a failure after the retry counter has been bumped.
fn failure_transition(retry_count: i32, retry_attempts: i32) -> OutcomeChange {
    if retry_count >= retry_attempts {
        OutcomeChange::TerminallyFailed { retry_count }
    } else {
        OutcomeChange::RetryScheduled { retry_count }
    }
}

fn eligibility_condition(campaign: &campaign::Model) -> Condition {
    Condition::any()
        .add(target::Column::Status.eq(TargetStatus::Pending))
        .add(
            Condition::all()
                .add(target::Column::Status.eq(TargetStatus::Failed))
                .add(target::Column::RetryCount.lt(campaign.pacing_retry_attempts)),
        )
}

/// Returns the next batch of workable targets: pending ones and failed ones
/// with retry budget left, longest-waiting first (never-attempted first of
/// all). `limit` is the pacing budget for the tick.
pub async fn next_eligible(
    db: &DatabaseConnection,
    campaign: &campaign::Model,
    limit: u64,
) -> Result<Vec<target::Model>, DbErr> {
    target::Entity::find()
        .filter(target::Column::CampaignId.eq(campaign.id))
        .filter(eligibility_condition(campaign))
        .order_by_with_nulls(target::Column::LastAttemptAt, Order::Asc, NullOrdering::First)
        .limit(limit)
        .all(db)
        .await
}

/// Number of targets still workable for the campaign. Zero means the
/// campaign has nothing left to do and can be completed.
pub async fn eligible_count(
    db: &DatabaseConnection,
    campaign: &campaign::Model,
) -> Result<u64, DbErr> {
    target::Entity::find()
        .filter(target::Column::CampaignId.eq(campaign.id))
        .filter(eligibility_condition(campaign))
        .count(db)
        .await
}

/// Writes one attempt's outcome. The target row and the owning campaign's
/// aggregate counters move in the same transaction, so the aggregates stay
/// consistent with ledger detail by construction.
///
/// Success is terminal. Failure bumps `retry_count` and stamps the error;
/// the target stays eligible until the campaign's retry budget is exhausted,
/// and only a terminal failure counts into `stats_failed`.
pub async fn record_outcome(
    db: &DatabaseConnection,
    campaign: &campaign::Model,
    target_row: &target::Model,
    outcome: &AttemptOutcome,
) -> Result<OutcomeChange, DbErr> {
    let now = Utc::now();
    let txn = db.begin().await?;

    let change = match outcome {
        AttemptOutcome::Delivered => {
            let mut active: target::ActiveModel = target_row.clone().into();
            active.status = Set(campaign.kind.success_status());
            active.last_attempt_at = Set(Some(now));
            active.completed_at = Set(Some(now));
            active.error_message = Set(None);
            active.update(&txn).await?;

            bump_campaign_counter(&txn, campaign.id, campaign::Column::StatsSent).await?;
            OutcomeChange::Delivered
        }
        AttemptOutcome::Failed { error } => {
            let retry_count = target_row.retry_count + 1;
            let mut active: target::ActiveModel = target_row.clone().into();
            active.status = Set(TargetStatus::Failed);
            active.retry_count = Set(retry_count);
            active.last_attempt_at = Set(Some(now));
            active.error_message = Set(Some(error.clone()));
            active.update(&txn).await?;

            let change = failure_transition(retry_count, campaign.pacing_retry_attempts);
            if matches!(change, OutcomeChange::TerminallyFailed { .. }) {
                bump_campaign_counter(&txn, campaign.id, campaign::Column::StatsFailed).await?;
            }
            change
        }
    };

    txn.commit().await?;
    Ok(change)
}

async fn bump_campaign_counter<C: ConnectionTrait>(
    txn: &C,
    campaign_id: i32,
    column: campaign::Column,
) -> Result<(), DbErr> {
    campaign::Entity::update_many()
        .col_expr(column, Expr::col(column).add(1))
        .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(campaign::Column::Id.eq(campaign_id))
        .exec(txn)
        .await?;
    Ok(())
}

/// Bulk-creates the campaign's targets and sets `stats_total`, in one
/// transaction. Called once, at campaign creation.
pub async fn insert_targets(
    db: &DatabaseConnection,
    campaign_id: i32,
    specs: Vec<TargetSpec>,
) -> Result<u64, DbErr> {
    let total = specs.len() as u64;
    if total == 0 {
        return Ok(0);
    }

    let now = Utc::now();
    let rows: Vec<target::ActiveModel> = specs
        .into_iter()
        .map(|spec| target::ActiveModel {
            campaign_id: Set(campaign_id),
            external_id: Set(spec.external_id),
            username: Set(spec.username),
            display_name: Set(spec.display_name),
            status: Set(TargetStatus::Pending),
            retry_count: Set(0),
            created_at: Set(now),
            ..Default::default()
        })
        .collect();

    let txn = db.begin().await?;
    target::Entity::insert_many(rows).exec(&txn).await?;
    campaign::Entity::update_many()
        .col_expr(campaign::Column::StatsTotal, Expr::value(total as i32))
        .col_expr(campaign::Column::UpdatedAt, Expr::value(now))
        .filter(campaign::Column::Id.eq(campaign_id))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    Ok(total)
}

/// Failed fraction of the campaign's most recent `window` attempts, or
/// `None` when fewer than `window` attempts have been recorded. Input for
/// the auto-pause check; computed from persisted state only, so the decision
/// is the same after a restart.
pub async fn recent_failure_rate(
    db: &DatabaseConnection,
    campaign_id: i32,
    window: u64,
) -> Result<Option<f64>, DbErr> {
    if window == 0 {
        return Ok(None);
    }

    let recent = target::Entity::find()
        .filter(target::Column::CampaignId.eq(campaign_id))
        .filter(target::Column::LastAttemptAt.is_not_null())
        .order_by_desc(target::Column::LastAttemptAt)
        .limit(window)
        .all(db)
        .await?;

    if (recent.len() as u64) < window {
        return Ok(None);
    }

    let failed = recent
        .iter()
        .filter(|t| t.status == TargetStatus::Failed)
        .count();
    Ok(Some(failed as f64 / recent.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_stays_eligible_under_budget() {
        assert_eq!(
            failure_transition(1, 2),
            OutcomeChange::RetryScheduled { retry_count: 1 }
        );
    }

    #[test]
    fn test_failure_terminal_at_budget() {
        assert_eq!(
            failure_transition(2, 2),
            OutcomeChange::TerminallyFailed { retry_count: 2 }
        );
    }

    #[test]
    fn test_zero_retry_budget_fails_terminally_on_first_attempt() {
        assert_eq!(
            failure_transition(1, 0),
            OutcomeChange::TerminallyFailed { retry_count: 1 }
        );
    }
}
