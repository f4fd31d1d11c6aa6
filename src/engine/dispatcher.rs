use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use tracing::{debug, info, warn};

use crate::db::entities::{account, campaign};
use crate::db::enums::{CampaignKind, CampaignStatus};
use crate::db::services::account_service::{self, AccountError, REAUTH_REASON};
use crate::db::services::campaign_service::{self, CampaignError};
use crate::db::services::subscription_service::{
    self, QuotaAction, QuotaDecision, QuotaError, UsageKind,
};
use crate::db::services::target_service::{self, AttemptOutcome};
use crate::engine::executor::{ActionExecutor, ActionTarget};
use crate::engine::pacing::{self, PacingWindows};
use crate::engine::template;
use crate::server::EngineSettings;
use crate::services::CredentialVault;

/// Everything one tick needs, constructed once at startup and shared.
pub struct EngineContext {
    pub db: DatabaseConnection,
    pub vault: Arc<CredentialVault>,
    pub executor: Arc<dyn ActionExecutor>,
    pub settings: EngineSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Lifecycle(#[from] CampaignError),
    #[error(transparent)]
    Account(#[from] AccountError),
}

/// What one evaluation of a campaign did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// Campaign is gone, stopped, or already completed; the job should be
    /// removed.
    Gone,
    /// Campaign exists but is not `active` (draft or paused); the job stays
    /// scheduled and does nothing.
    Skipped,
    /// Active, but the pacing budget for this tick is zero.
    Idle,
    /// A systemic condition paused the campaign this tick.
    Paused { reason: String },
    /// No workable targets remain; the campaign was marked completed and the
    /// job should be removed.
    Completed,
    /// Targets were attempted.
    Progress {
        attempted: u32,
        delivered: u32,
        failed: u32,
    },
}

impl TickReport {
    /// Whether the recurring job for the campaign should be removed.
    pub fn ends_job(&self) -> bool {
        matches!(self, TickReport::Gone | TickReport::Completed)
    }

    /// Whether the tick did anything worth a job bookkeeping record.
    pub fn is_noteworthy(&self) -> bool {
        !matches!(self, TickReport::Skipped | TickReport::Idle)
    }
}

/// Evaluates one campaign once: authorization, pacing, batch selection,
/// external actions, outcome writes. Ticks for the same campaign never
/// overlap (the scheduler runs them sequentially per campaign); ticks for
/// different campaigns run concurrently and share no mutable state.
pub async fn run_tick(ctx: &EngineContext, campaign_id: i32) -> Result<TickReport, DispatchError> {
    let Some(campaign) = campaign::Entity::find_by_id(campaign_id).one(&ctx.db).await? else {
        return Ok(TickReport::Gone);
    };

    match campaign.status {
        CampaignStatus::Active => {}
        CampaignStatus::Draft | CampaignStatus::Paused => return Ok(TickReport::Skipped),
        CampaignStatus::Stopped | CampaignStatus::Completed => return Ok(TickReport::Gone),
    }

    // Resolve the acting account and its session credentials. Any credential
    // failure escalates to every campaign on the account, not just this one.
    let Some(account_row) = account::Entity::find_by_id(campaign.account_id)
        .one(&ctx.db)
        .await?
    else {
        let reason = "Connected account no longer exists".to_string();
        campaign_service::pause_with_reason(&ctx.db, campaign.id, &reason).await?;
        return Ok(TickReport::Paused { reason });
    };

    if !account_row.is_valid {
        campaign_service::pause_with_reason(&ctx.db, campaign.id, REAUTH_REASON).await?;
        return Ok(TickReport::Paused { reason: REAUTH_REASON.to_string() });
    }

    let credentials = match account_service::decrypt_credentials(&ctx.vault, &account_row) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(
                account_id = account_row.id,
                campaign_id = campaign.id,
                error = %e,
                "Credential decryption failed; invalidating account"
            );
            account_service::invalidate_account(&ctx.db, account_row.id).await?;
            campaign_service::pause_campaigns_for_account(&ctx.db, account_row.id, REAUTH_REASON)
                .await?;
            return Ok(TickReport::Paused { reason: REAUTH_REASON.to_string() });
        }
    };

    // Auto-pause before attempting anything when the recent failure rate is
    // over the operator threshold.
    if let Some(rate) =
        target_service::recent_failure_rate(&ctx.db, campaign.id, ctx.settings.failure_window)
            .await?
    {
        if rate >= ctx.settings.failure_threshold {
            let reason = format!(
                "Auto-paused: {:.0}% of the last {} attempts failed",
                rate * 100.0,
                ctx.settings.failure_window
            );
            campaign_service::pause_with_reason(&ctx.db, campaign.id, &reason).await?;
            return Ok(TickReport::Paused { reason });
        }
    }

    let now = Utc::now();
    let mut windows = PacingWindows::from_campaign(&campaign).rolled(now);
    let budget = pacing::budget(campaign.pacing_per_minute, campaign.pacing_daily_cap, &windows);
    if budget == 0 {
        persist_windows(&ctx.db, campaign.id, &windows).await?;
        debug!(campaign_id = campaign.id, "Pacing budget exhausted for this tick");
        return Ok(TickReport::Idle);
    }

    let batch = target_service::next_eligible(&ctx.db, &campaign, budget as u64).await?;
    if batch.is_empty() {
        // Nothing pending and nothing left to retry.
        campaign_service::mark_completed(&ctx.db, campaign.id).await?;
        return Ok(TickReport::Completed);
    }

    let (quota_action, usage_kind) = match campaign.kind {
        CampaignKind::Dm => (QuotaAction::SendDm, UsageKind::Dms),
        CampaignKind::Follow => (QuotaAction::FollowUser, UsageKind::Follows),
    };

    let mut attempted = 0u32;
    let mut delivered = 0u32;
    let mut failed = 0u32;

    for (index, target_row) in batch.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(pacing::jitter(
                campaign.pacing_delay_min,
                campaign.pacing_delay_max,
            ))
            .await;
        }

        // Per-unit authorization: the period counter must be under the plan
        // limit at the moment each action runs, not just at tick start.
        let decision =
            subscription_service::authorize(&ctx.db, campaign.user_id, quota_action).await?;
        if decision != QuotaDecision::Ok {
            let reason = subscription_service::denial_message(&decision);
            campaign_service::pause_with_reason(&ctx.db, campaign.id, &reason).await?;
            return Ok(TickReport::Paused { reason });
        }

        // Count the attempt against both pacing buckets before the call, so
        // a crash mid-call can only undershoot the caps, never overshoot.
        windows = windows.rolled(Utc::now());
        windows.record_attempt();
        persist_windows(&ctx.db, campaign.id, &windows).await?;
        attempted += 1;

        let action_target = ActionTarget {
            external_id: target_row.external_id.clone(),
            username: target_row.username.clone(),
        };

        let result = match campaign.kind {
            CampaignKind::Dm => {
                let template_src = campaign.message_template.as_deref().unwrap_or_default();
                match template::render_message(template_src, target_row) {
                    Ok(text) => {
                        ctx.executor
                            .send_message(&credentials, &action_target, &text)
                            .await
                    }
                    Err(e) => Err(crate::engine::executor::ActionFailure::new(format!(
                        "template error: {e}"
                    ))),
                }
            }
            CampaignKind::Follow => ctx.executor.follow_user(&credentials, &action_target).await,
        };

        // One target's failure never aborts the rest of the batch.
        match result {
            Ok(()) => {
                target_service::record_outcome(
                    &ctx.db,
                    &campaign,
                    target_row,
                    &AttemptOutcome::Delivered,
                )
                .await?;
                subscription_service::increment_usage(&ctx.db, campaign.user_id, usage_kind)
                    .await?;
                delivered += 1;
            }
            Err(failure) => {
                warn!(
                    campaign_id = campaign.id,
                    target_id = target_row.id,
                    reason = %failure.reason,
                    "Action attempt failed"
                );
                target_service::record_outcome(
                    &ctx.db,
                    &campaign,
                    target_row,
                    &AttemptOutcome::Failed { error: failure.reason },
                )
                .await?;
                failed += 1;
            }
        }
    }

    if target_service::eligible_count(&ctx.db, &campaign).await? == 0 {
        campaign_service::mark_completed(&ctx.db, campaign.id).await?;
        return Ok(TickReport::Completed);
    }

    info!(
        campaign_id = campaign.id,
        kind = %campaign.kind,
        attempted,
        delivered,
        failed,
        "Tick finished"
    );
    Ok(TickReport::Progress { attempted, delivered, failed })
}

/// Writes the rolled pacing buckets back to the campaign row. Only the
/// pacing columns move; status and counters are owned by other writes.
async fn persist_windows(
    db: &DatabaseConnection,
    campaign_id: i32,
    windows: &PacingWindows,
) -> Result<(), DbErr> {
    let mut active = campaign::ActiveModel {
        id: Set(campaign_id),
        ..Default::default()
    };
    windows.write_to(&mut active);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{AccountProfile, ActionFailure};
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, MockDatabase};

    struct NoopExecutor;

    #[async_trait]
    impl ActionExecutor for NoopExecutor {
        async fn send_message(
            &self,
            _credentials: &str,
            _target: &ActionTarget,
            _text: &str,
        ) -> Result<(), ActionFailure> {
            Ok(())
        }

        async fn follow_user(
            &self,
            _credentials: &str,
            _target: &ActionTarget,
        ) -> Result<(), ActionFailure> {
            Ok(())
        }

        async fn validate_account(
            &self,
            _credentials: &str,
            username: &str,
        ) -> Result<AccountProfile, ActionFailure> {
            Ok(AccountProfile {
                username: username.to_string(),
                handle: format!("@{username}"),
                display_name: None,
            })
        }
    }

    fn test_context(db: DatabaseConnection) -> EngineContext {
        EngineContext {
            db,
            vault: Arc::new(
                CredentialVault::from_key_hex(
                    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
                )
                .unwrap(),
            ),
            executor: Arc::new(NoopExecutor),
            settings: EngineSettings::default(),
        }
    }

    fn campaign_row(status: CampaignStatus) -> campaign::Model {
        campaign::Model {
            id: 7,
            user_id: 1,
            account_id: 1,
            name: "launch wave".to_string(),
            kind: CampaignKind::Dm,
            status,
            target_source: "followers".to_string(),
            message_template: Some("Hi {{ name }}".to_string()),
            pacing_per_minute: 3,
            pacing_delay_min: 15,
            pacing_delay_max: 30,
            pacing_daily_cap: 50,
            pacing_retry_attempts: 2,
            stats_total: 10,
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

    #[tokio::test]
    async fn test_tick_for_missing_campaign_ends_job() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<campaign::Model, _, _>([Vec::<campaign::Model>::new()])
            .into_connection();
        let ctx = test_context(db);

        let report = run_tick(&ctx, 999).await.unwrap();
        assert_eq!(report, TickReport::Gone);
        assert!(report.ends_job());
    }

    #[tokio::test]
    async fn test_tick_for_paused_campaign_is_skipped() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![campaign_row(CampaignStatus::Paused)]])
            .into_connection();
        let ctx = test_context(db);

        let report = run_tick(&ctx, 7).await.unwrap();
        assert_eq!(report, TickReport::Skipped);
        assert!(!report.ends_job());
        assert!(!report.is_noteworthy());
    }

    #[tokio::test]
    async fn test_tick_for_stopped_campaign_ends_job() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![campaign_row(CampaignStatus::Stopped)]])
            .into_connection();
        let ctx = test_context(db);

        let report = run_tick(&ctx, 7).await.unwrap();
        assert_eq!(report, TickReport::Gone);
    }
}
