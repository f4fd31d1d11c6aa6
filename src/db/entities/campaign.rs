use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{CampaignKind, CampaignStatus};

/// A configured unit of outreach (DM or follow) against a target list using
/// one connected account. Aggregate counters are maintained exclusively by
/// the target ledger's outcome writes; the pacing_* window columns persist
/// the minute/day buckets so rate caps survive restarts.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub account_id: i32,
    pub name: String,
    pub kind: CampaignKind,
    pub status: CampaignStatus,
    pub target_source: String,
    /// Tera template for DM campaigns; `None` for follow campaigns.
    pub message_template: Option<String>,
    pub pacing_per_minute: i32,
    pub pacing_delay_min: i32,
    pub pacing_delay_max: i32,
    pub pacing_daily_cap: i32,
    pub pacing_retry_attempts: i32,
    pub stats_total: i32,
    pub stats_sent: i32,
    pub stats_failed: i32,
    pub pause_reason: Option<String>,
    pub pacing_minute_started_at: Option<ChronoDateTimeUtc>,
    pub pacing_minute_count: i32,
    pub pacing_day: Option<Date>,
    pub pacing_day_count: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id",
        on_delete = "Cascade"
    )]
    Account,

    #[sea_orm(has_many = "super::target::Entity")]
    Targets,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Targets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
