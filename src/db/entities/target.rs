use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::TargetStatus;

/// One external user a campaign will attempt to message or follow. A target
/// reaches `sent`/`followed` exactly once, or loops `failed` -> eligible
/// until `retry_count` hits the campaign's retry budget.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "targets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub campaign_id: i32,
    pub external_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub status: TargetStatus,
    pub retry_count: i32,
    pub last_attempt_at: Option<ChronoDateTimeUtc>,
    pub completed_at: Option<ChronoDateTimeUtc>,
    pub error_message: Option<String>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::campaign::Entity",
        from = "Column::CampaignId",
        to = "super::campaign::Column::Id",
        on_delete = "Cascade"
    )]
    Campaign,
}

impl Related<super::campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
