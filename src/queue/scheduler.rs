use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::enums::{CampaignKind, QueueJobStatus};
use crate::db::services::{campaign_service, queue_service};
use crate::engine::dispatcher::{self, DispatchError, EngineContext, TickReport};

/// Infrastructure-level retry for a failing tick. Business failures (target
/// retries, quota denials) are handled inside the tick and never reach this.
const TICK_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Queue depth per campaign kind, shaped for the health probe.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerStats {
    pub campaigns: QueueStats,
    pub follows: QueueStats,
}

struct ScheduledJob {
    kind: CampaignKind,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct InFlight {
    dm: AtomicU64,
    follow: AtomicU64,
}

impl InFlight {
    fn counter(&self, kind: CampaignKind) -> &AtomicU64 {
        match kind {
            CampaignKind::Dm => &self.dm,
            CampaignKind::Follow => &self.follow,
        }
    }
}

/// Keeps exactly one recurring evaluation job alive per active campaign.
///
/// The job registry is keyed by campaign id, which makes scheduling
/// idempotent and doubles as the same-campaign mutual exclusion: one task
/// per campaign runs its ticks strictly in sequence, while different
/// campaigns tick concurrently. Durability comes from the database, not the
/// registry: on process start `resume_active` re-derives the job set from
/// the campaigns that are `active`.
pub struct CampaignScheduler {
    ctx: Arc<EngineContext>,
    jobs: Arc<DashMap<i32, ScheduledJob>>,
    in_flight: Arc<InFlight>,
}

impl CampaignScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        CampaignScheduler {
            ctx,
            jobs: Arc::new(DashMap::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Starts the recurring job for a campaign. A no-op when the campaign is
    /// already scheduled; returns whether a new job was created.
    pub fn schedule(&self, campaign_id: i32, kind: CampaignKind) -> bool {
        match self.jobs.entry(campaign_id) {
            Entry::Occupied(_) => {
                debug!(campaign_id, "Campaign already scheduled, ignoring");
                false
            }
            Entry::Vacant(slot) => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let handle = tokio::spawn(run_job(
                    self.ctx.clone(),
                    self.jobs.clone(),
                    self.in_flight.clone(),
                    campaign_id,
                    kind,
                    shutdown_rx,
                ));
                slot.insert(ScheduledJob { kind, shutdown: shutdown_tx, handle });
                info!(campaign_id, kind = %kind, "Campaign scheduled");
                true
            }
        }
    }

    /// Removes the recurring job. An in-flight tick runs to completion; the
    /// shutdown signal is only observed between ticks.
    pub fn unschedule(&self, campaign_id: i32) -> bool {
        if let Some((_, job)) = self.jobs.remove(&campaign_id) {
            let _ = job.shutdown.send(true);
            info!(campaign_id, "Campaign unscheduled");
            true
        } else {
            false
        }
    }

    pub fn is_scheduled(&self, campaign_id: i32) -> bool {
        self.jobs.contains_key(&campaign_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.jobs.len()
    }

    /// Re-derives the job set from the campaigns that are `active` in the
    /// database. This is what makes restarts safe: the registry is
    /// reconstructed, and every campaign picks up exactly where its
    /// persisted ledger and pacing windows say it left off.
    pub async fn resume_active(&self) -> Result<usize, sea_orm::DbErr> {
        let campaigns = campaign_service::list_active_campaigns(&self.ctx.db).await?;
        let mut resumed = 0;
        for campaign in campaigns {
            if self.schedule(campaign.id, campaign.kind) {
                resumed += 1;
            }
        }
        info!(resumed, "Resumed active campaigns from database");
        Ok(resumed)
    }

    /// Queue depth for the health probe.
    pub async fn stats(&self) -> Result<SchedulerStats, sea_orm::DbErr> {
        let mut stats = SchedulerStats::default();
        for kind in [CampaignKind::Dm, CampaignKind::Follow] {
            let scheduled = self
                .jobs
                .iter()
                .filter(|entry| entry.value().kind == kind)
                .count() as u64;
            let active = self.in_flight.counter(kind).load(Ordering::Relaxed);
            let finished = queue_service::finished_counts(&self.ctx.db, kind).await?;
            let entry = QueueStats {
                waiting: scheduled.saturating_sub(active),
                active,
                completed: finished.completed,
                failed: finished.failed,
            };
            match kind {
                CampaignKind::Dm => stats.campaigns = entry,
                CampaignKind::Follow => stats.follows = entry,
            }
        }
        Ok(stats)
    }

    /// Signals every job to stop and waits for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let ids: Vec<i32> = self.jobs.iter().map(|entry| *entry.key()).collect();
        for campaign_id in ids {
            if let Some((_, job)) = self.jobs.remove(&campaign_id) {
                let _ = job.shutdown.send(true);
                if let Err(e) = job.handle.await {
                    warn!(campaign_id, error = %e, "Campaign job did not shut down cleanly");
                }
            }
        }
        info!("Campaign scheduler drained");
    }
}

async fn run_job(
    ctx: Arc<EngineContext>,
    jobs: Arc<DashMap<i32, ScheduledJob>>,
    in_flight: Arc<InFlight>,
    campaign_id: i32,
    kind: CampaignKind,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let cadence = Duration::from_secs(ctx.settings.tick_seconds.max(1));
    // First tick fires one full cadence after scheduling, so a fresh
    // campaign does not front-load its minute budget at schedule time.
    let mut ticker = time::interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        in_flight.counter(kind).fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = run_tick_with_retry(&ctx, campaign_id).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        in_flight.counter(kind).fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(report) => {
                if report.is_noteworthy() {
                    if let Err(e) = queue_service::record_run(
                        &ctx.db,
                        campaign_id,
                        kind,
                        QueueJobStatus::Completed,
                        None,
                        duration_ms,
                    )
                    .await
                    {
                        warn!(campaign_id, error = %e, "Failed to record job run");
                    }
                }
                if let TickReport::Paused { ref reason } = report {
                    info!(campaign_id, reason = %reason, "Campaign paused by tick");
                }
                if report.ends_job() {
                    jobs.remove(&campaign_id);
                    break;
                }
            }
            Err(e) => {
                error!(campaign_id, error = %e, "Campaign tick failed after retries");
                if let Err(e2) = queue_service::record_run(
                    &ctx.db,
                    campaign_id,
                    kind,
                    QueueJobStatus::Failed,
                    Some(e.to_string()),
                    duration_ms,
                )
                .await
                {
                    warn!(campaign_id, error = %e2, "Failed to record failed job run");
                }
            }
        }
    }

    debug!(campaign_id, "Campaign job ended");
}

/// Retries infrastructure failures with exponential backoff before giving
/// the tick up; the next scheduled tick will try again regardless.
async fn run_tick_with_retry(
    ctx: &EngineContext,
    campaign_id: i32,
) -> Result<TickReport, DispatchError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match dispatcher::run_tick(ctx, campaign_id).await {
            Ok(report) => return Ok(report),
            Err(e) if attempt < TICK_ATTEMPTS => {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt - 1));
                warn!(
                    campaign_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Tick failed, backing off before retry"
                );
                time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{AccountProfile, ActionExecutor, ActionFailure, ActionTarget};
    use crate::server::EngineSettings;
    use crate::services::CredentialVault;
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

    fn test_scheduler() -> CampaignScheduler {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let ctx = Arc::new(EngineContext {
            db,
            vault: Arc::new(
                CredentialVault::from_key_hex(
                    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
                )
                .unwrap(),
            ),
            executor: Arc::new(NoopExecutor),
            // A cadence long enough that no tick fires during the test.
            settings: EngineSettings { tick_seconds: 3600, ..EngineSettings::default() },
        });
        CampaignScheduler::new(ctx)
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let scheduler = test_scheduler();

        assert!(scheduler.schedule(42, CampaignKind::Dm));
        assert!(!scheduler.schedule(42, CampaignKind::Dm));
        assert_eq!(scheduler.scheduled_count(), 1);
        assert!(scheduler.is_scheduled(42));

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unschedule_removes_job() {
        let scheduler = test_scheduler();

        scheduler.schedule(7, CampaignKind::Follow);
        assert!(scheduler.unschedule(7));
        assert!(!scheduler.is_scheduled(7));
        assert_eq!(scheduler.scheduled_count(), 0);
        // Unscheduling an unknown campaign is a no-op.
        assert!(!scheduler.unschedule(7));
    }

    #[tokio::test]
    async fn test_jobs_of_both_kinds_coexist() {
        let scheduler = test_scheduler();

        scheduler.schedule(1, CampaignKind::Dm);
        scheduler.schedule(2, CampaignKind::Follow);
        assert_eq!(scheduler.scheduled_count(), 2);

        scheduler.shutdown().await;
        assert_eq!(scheduler.scheduled_count(), 0);
    }
}
