use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use tracing::info;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        email TEXT UNIQUE NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscription_plans (
        id SERIAL PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        price DOUBLE PRECISION NOT NULL DEFAULT 0,
        max_accounts INTEGER NOT NULL DEFAULT 1,
        max_dms_per_month INTEGER NOT NULL DEFAULT 100,
        max_follows_per_month INTEGER NOT NULL DEFAULT 100,
        max_active_dm_campaigns INTEGER NOT NULL DEFAULT 1,
        max_active_follow_campaigns INTEGER NOT NULL DEFAULT 1,
        is_active BOOLEAN NOT NULL DEFAULT true,
        display_order INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_subscriptions (
        id SERIAL PRIMARY KEY,
        user_id INTEGER UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        plan_id INTEGER NOT NULL REFERENCES subscription_plans(id),
        status TEXT NOT NULL DEFAULT 'active',
        dms_used_this_period INTEGER NOT NULL DEFAULT 0,
        follows_used_this_period INTEGER NOT NULL DEFAULT 0,
        period_start TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        period_end TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP + INTERVAL '30 days',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        username TEXT NOT NULL,
        handle TEXT NOT NULL,
        encrypted_credentials TEXT NOT NULL,
        is_valid BOOLEAN NOT NULL DEFAULT true,
        last_validated TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        target_source TEXT NOT NULL,
        message_template TEXT,
        pacing_per_minute INTEGER NOT NULL DEFAULT 3,
        pacing_delay_min INTEGER NOT NULL DEFAULT 15,
        pacing_delay_max INTEGER NOT NULL DEFAULT 30,
        pacing_daily_cap INTEGER NOT NULL DEFAULT 50,
        pacing_retry_attempts INTEGER NOT NULL DEFAULT 2,
        stats_total INTEGER NOT NULL DEFAULT 0,
        stats_sent INTEGER NOT NULL DEFAULT 0,
        stats_failed INTEGER NOT NULL DEFAULT 0,
        pause_reason TEXT,
        pacing_minute_started_at TIMESTAMPTZ,
        pacing_minute_count INTEGER NOT NULL DEFAULT 0,
        pacing_day DATE,
        pacing_day_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS targets (
        id SERIAL PRIMARY KEY,
        campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        external_id TEXT NOT NULL,
        username TEXT NOT NULL,
        display_name TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queue_jobs (
        id BIGSERIAL PRIMARY KEY,
        campaign_id INTEGER NOT NULL,
        queue TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        duration_ms BIGINT NOT NULL DEFAULT 0,
        finished_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_accounts_user_id ON accounts(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_user_id ON campaigns(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_account_id ON campaigns(account_id)",
    "CREATE INDEX IF NOT EXISTS idx_targets_campaign_id ON targets(campaign_id)",
    "CREATE INDEX IF NOT EXISTS idx_targets_eligibility ON targets(campaign_id, status, last_attempt_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_jobs_finished_at ON queue_jobs(finished_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_jobs_queue_status ON queue_jobs(queue, status)",
];

/// Seeded default plan; every user lands here on signup and on period expiry.
const SEED_FREE_PLAN: &str = r#"
    INSERT INTO subscription_plans
        (name, price, max_accounts, max_dms_per_month, max_follows_per_month,
         max_active_dm_campaigns, max_active_follow_campaigns, display_order)
    VALUES ('Free', 0, 1, 100, 100, 1, 1, 0)
    ON CONFLICT (name) DO NOTHING
"#;

/// Creates missing tables and indexes and seeds the Free plan. Idempotent;
/// runs on every startup before anything touches the database.
pub async fn initialize(db: &DatabaseConnection) -> Result<(), DbErr> {
    info!("Initializing database schema");
    for ddl in TABLES {
        db.execute_unprepared(ddl).await?;
    }
    for ddl in INDEXES {
        db.execute_unprepared(ddl).await?;
    }
    db.execute_unprepared(SEED_FREE_PLAN).await?;
    info!("Database schema initialized");
    Ok(())
}
