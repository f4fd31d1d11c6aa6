use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription_plans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(column_type = "Double")]
    pub price: f64,
    pub max_accounts: i32,
    pub max_dms_per_month: i32,
    pub max_follows_per_month: i32,
    pub max_active_dm_campaigns: i32,
    pub max_active_follow_campaigns: i32,
    pub is_active: bool,
    pub display_order: i32,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_subscription::Entity")]
    Subscriptions,
}

impl Related<super::user_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
