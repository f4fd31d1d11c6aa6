use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::QueueJobStatus;

/// Record of one executed campaign tick that did work or failed. Retention
/// is bounded by the housekeeping pruner; these rows are bookkeeping for the
/// health probe, not correctness state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub campaign_id: i32,
    pub queue: String,
    pub status: QueueJobStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub finished_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
