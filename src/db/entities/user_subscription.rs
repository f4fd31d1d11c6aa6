use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-user subscription state. Usage counters are only ever moved by the
/// quota gate: compared under a row lock during authorization, incremented
/// after an external action succeeds, and zeroed on period rollover.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub user_id: i32,
    pub plan_id: i32,
    pub status: String,
    pub dms_used_this_period: i32,
    pub follows_used_this_period: i32,
    pub period_start: ChronoDateTimeUtc,
    pub period_end: ChronoDateTimeUtc,
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
        belongs_to = "super::subscription_plan::Entity",
        from = "Column::PlanId",
        to = "super::subscription_plan::Column::Id"
    )]
    Plan,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::subscription_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
