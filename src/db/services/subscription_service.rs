use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::info;

use crate::db::entities::{account, campaign, subscription_plan, user_subscription};
use crate::db::enums::{CampaignKind, CampaignStatus};

pub const FREE_PLAN_NAME: &str = "Free";
const PERIOD_DAYS: i64 = 30;

/// Action kinds the quota gate knows how to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaAction {
    SendDm,
    FollowUser,
    CreateDmCampaign,
    CreateFollowCampaign,
    AddAccount,
}

impl QuotaAction {
    pub fn describe(self) -> &'static str {
        match self {
            QuotaAction::SendDm => "monthly DM limit",
            QuotaAction::FollowUser => "monthly follow limit",
            QuotaAction::CreateDmCampaign => "active DM campaign limit",
            QuotaAction::CreateFollowCampaign => "active follow campaign limit",
            QuotaAction::AddAccount => "account limit",
        }
    }
}

/// Which period counter an action consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Dms,
    Follows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Ok,
    QuotaExceeded { action: QuotaAction, limit: i32 },
    PeriodExpired,
}

/// User-visible wording for a denial, recorded as a campaign pause reason.
pub fn denial_message(decision: &QuotaDecision) -> String {
    match decision {
        QuotaDecision::QuotaExceeded { action, limit } => {
            format!("{} reached ({limit}). Please upgrade your plan.", action.describe())
        }
        QuotaDecision::PeriodExpired => {
            "Your subscription period has ended. You have been moved to the Free plan.".to_string()
        }
        QuotaDecision::Ok => "OK".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("No subscription found for user {0}")]
    SubscriptionMissing(i32),
    #[error("Subscription plan {0} not found")]
    PlanMissing(i32),
    #[error("The '{FREE_PLAN_NAME}' plan is not seeded")]
    FreePlanMissing,
}

/// True once the usage counter has reached the plan limit.
fn at_limit(used: i64, limit: i32) -> bool {
    used >= limit as i64
}

/// Authoritative check for whether `user_id` may perform `action` right now.
///
/// Runs read-compare (and, on period expiry, the reset) as one transaction
/// with the subscription row locked, so two concurrent authorizations cannot
/// both observe "under limit" and overshoot the cap. Returns the decision;
/// callers must not perform the action unless it is `Ok`.
pub async fn authorize(
    db: &DatabaseConnection,
    user_id: i32,
    action: QuotaAction,
) -> Result<QuotaDecision, QuotaError> {
    let txn = db.begin().await?;
    let decision = authorize_within(&txn, user_id, action).await?;
    txn.commit().await?;
    Ok(decision)
}

async fn authorize_within<C: ConnectionTrait>(
    txn: &C,
    user_id: i32,
    action: QuotaAction,
) -> Result<QuotaDecision, QuotaError> {
    let subscription = user_subscription::Entity::find()
        .filter(user_subscription::Column::UserId.eq(user_id))
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(QuotaError::SubscriptionMissing(user_id))?;

    let now = Utc::now();
    if subscription.period_end < now {
        reset_to_free_plan(txn, &subscription).await?;
        return Ok(QuotaDecision::PeriodExpired);
    }

    let plan = subscription_plan::Entity::find_by_id(subscription.plan_id)
        .one(txn)
        .await?
        .ok_or(QuotaError::PlanMissing(subscription.plan_id))?;

    let decision = match action {
        QuotaAction::SendDm => {
            counter_decision(action, subscription.dms_used_this_period as i64, plan.max_dms_per_month)
        }
        QuotaAction::FollowUser => counter_decision(
            action,
            subscription.follows_used_this_period as i64,
            plan.max_follows_per_month,
        ),
        QuotaAction::CreateDmCampaign => {
            let live = count_live_campaigns(txn, user_id, CampaignKind::Dm).await?;
            counter_decision(action, live, plan.max_active_dm_campaigns)
        }
        QuotaAction::CreateFollowCampaign => {
            let live = count_live_campaigns(txn, user_id, CampaignKind::Follow).await?;
            counter_decision(action, live, plan.max_active_follow_campaigns)
        }
        QuotaAction::AddAccount => {
            let owned = account::Entity::find()
                .filter(account::Column::UserId.eq(user_id))
                .count(txn)
                .await?;
            counter_decision(action, owned as i64, plan.max_accounts)
        }
    };

    Ok(decision)
}

fn counter_decision(action: QuotaAction, used: i64, limit: i32) -> QuotaDecision {
    if at_limit(used, limit) {
        QuotaDecision::QuotaExceeded { action, limit }
    } else {
        QuotaDecision::Ok
    }
}

/// Campaigns that count against the plan's active-campaign cap: anything a
/// user could resume without re-creating it.
async fn count_live_campaigns<C: ConnectionTrait>(
    txn: &C,
    user_id: i32,
    kind: CampaignKind,
) -> Result<i64, DbErr> {
    let live = campaign::Entity::find()
        .filter(campaign::Column::UserId.eq(user_id))
        .filter(campaign::Column::Kind.eq(kind))
        .filter(campaign::Column::Status.is_in([CampaignStatus::Active, CampaignStatus::Paused]))
        .count(txn)
        .await?;
    Ok(live as i64)
}

/// Consumes one unit of period quota. Called only after the external action
/// actually succeeded, so a failed call never burns quota.
pub async fn increment_usage(
    db: &DatabaseConnection,
    user_id: i32,
    kind: UsageKind,
) -> Result<(), QuotaError> {
    let column = match kind {
        UsageKind::Dms => user_subscription::Column::DmsUsedThisPeriod,
        UsageKind::Follows => user_subscription::Column::FollowsUsedThisPeriod,
    };
    user_subscription::Entity::update_many()
        .col_expr(column, Expr::col(column).add(1))
        .col_expr(
            user_subscription::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(user_subscription::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Expired periods land the user back on the Free plan with zeroed counters
/// and a fresh 30-day period.
async fn reset_to_free_plan<C: ConnectionTrait>(
    txn: &C,
    subscription: &user_subscription::Model,
) -> Result<(), QuotaError> {
    info!(user_id = subscription.user_id, "Subscription period expired, resetting to Free plan");

    let free_plan = subscription_plan::Entity::find()
        .filter(subscription_plan::Column::Name.eq(FREE_PLAN_NAME))
        .one(txn)
        .await?
        .ok_or(QuotaError::FreePlanMissing)?;

    let now = Utc::now();
    let mut active: user_subscription::ActiveModel = subscription.clone().into();
    active.plan_id = Set(free_plan.id);
    active.status = Set("active".to_string());
    active.dms_used_this_period = Set(0);
    active.follows_used_this_period = Set(0);
    active.period_start = Set(now);
    active.period_end = Set(now + Duration::days(PERIOD_DAYS));
    active.updated_at = Set(now);
    active.update(txn).await?;
    Ok(())
}

/// Fetches the user's subscription together with its plan.
pub async fn get_user_subscription(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<(user_subscription::Model, subscription_plan::Model), QuotaError> {
    let subscription = user_subscription::Entity::find()
        .filter(user_subscription::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(QuotaError::SubscriptionMissing(user_id))?;
    let plan = subscription_plan::Entity::find_by_id(subscription.plan_id)
        .one(db)
        .await?
        .ok_or(QuotaError::PlanMissing(subscription.plan_id))?;
    Ok((subscription, plan))
}

/// Creates a Free-plan subscription for a user that has none yet.
pub async fn ensure_subscription(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<user_subscription::Model, QuotaError> {
    if let Some(existing) = user_subscription::Entity::find()
        .filter(user_subscription::Column::UserId.eq(user_id))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let free_plan = subscription_plan::Entity::find()
        .filter(subscription_plan::Column::Name.eq(FREE_PLAN_NAME))
        .one(db)
        .await?
        .ok_or(QuotaError::FreePlanMissing)?;

    let now = Utc::now();
    let created = user_subscription::ActiveModel {
        user_id: Set(user_id),
        plan_id: Set(free_plan.id),
        status: Set("active".to_string()),
        dms_used_this_period: Set(0),
        follows_used_this_period: Set(0),
        period_start: Set(now),
        period_end: Set(now + Duration::days(PERIOD_DAYS)),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

/// Moves a user onto another plan, resetting counters and the period.
pub async fn change_user_plan(
    db: &DatabaseConnection,
    user_id: i32,
    plan_id: i32,
) -> Result<(), QuotaError> {
    subscription_plan::Entity::find_by_id(plan_id)
        .one(db)
        .await?
        .ok_or(QuotaError::PlanMissing(plan_id))?;

    let subscription = user_subscription::Entity::find()
        .filter(user_subscription::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(QuotaError::SubscriptionMissing(user_id))?;

    let now = Utc::now();
    let mut active: user_subscription::ActiveModel = subscription.into();
    active.plan_id = Set(plan_id);
    active.dms_used_this_period = Set(0);
    active.follows_used_this_period = Set(0);
    active.period_start = Set(now);
    active.period_end = Set(now + Duration::days(PERIOD_DAYS));
    active.updated_at = Set(now);
    active.update(db).await?;

    info!(user_id, plan_id, "User plan changed");
    Ok(())
}

/// Zeroes the user's period counters without touching the plan or period.
pub async fn reset_user_usage(db: &DatabaseConnection, user_id: i32) -> Result<(), QuotaError> {
    let subscription = user_subscription::Entity::find()
        .filter(user_subscription::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(QuotaError::SubscriptionMissing(user_id))?;

    let mut active: user_subscription::ActiveModel = subscription.into();
    active.dms_used_this_period = Set(0);
    active.follows_used_this_period = Set(0);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;

    info!(user_id, "User usage reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_allows_under_limit() {
        assert_eq!(counter_decision(QuotaAction::SendDm, 99, 100), QuotaDecision::Ok);
        assert_eq!(counter_decision(QuotaAction::AddAccount, 0, 1), QuotaDecision::Ok);
    }

    #[test]
    fn test_counter_exceeded_at_limit() {
        // A Free-plan user with 100 of 100 DMs used is denied, not "one more".
        assert_eq!(
            counter_decision(QuotaAction::SendDm, 100, 100),
            QuotaDecision::QuotaExceeded { action: QuotaAction::SendDm, limit: 100 }
        );
        assert_eq!(
            counter_decision(QuotaAction::FollowUser, 101, 100),
            QuotaDecision::QuotaExceeded { action: QuotaAction::FollowUser, limit: 100 }
        );
    }

    #[test]
    fn test_zero_limit_always_exceeded() {
        assert_eq!(
            counter_decision(QuotaAction::CreateDmCampaign, 0, 0),
            QuotaDecision::QuotaExceeded { action: QuotaAction::CreateDmCampaign, limit: 0 }
        );
    }
}
