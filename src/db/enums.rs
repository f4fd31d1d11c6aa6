use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "campaign_kind_enum")]
#[serde(rename_all = "lowercase")]
pub enum CampaignKind {
    #[sea_orm(string_value = "dm")]
    Dm,
    #[sea_orm(string_value = "follow")]
    Follow,
}

impl CampaignKind {
    /// Terminal success status for targets of this campaign kind.
    pub fn success_status(self) -> TargetStatus {
        match self {
            CampaignKind::Dm => TargetStatus::Sent,
            CampaignKind::Follow => TargetStatus::Followed,
        }
    }

    /// Queue name used in job bookkeeping and the health probe.
    pub fn queue_name(self) -> &'static str {
        match self {
            CampaignKind::Dm => "dm-campaigns",
            CampaignKind::Follow => "follow-campaigns",
        }
    }
}

impl fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignKind::Dm => write!(f, "dm"),
            CampaignKind::Follow => write!(f, "follow"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "campaign_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "stopped")]
    Stopped,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "target_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "followed")]
    Followed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl TargetStatus {
    pub fn is_terminal_success(self) -> bool {
        matches!(self, TargetStatus::Sent | TargetStatus::Followed)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Sent => "sent",
            TargetStatus::Followed => "followed",
            TargetStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "queue_job_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum QueueJobStatus {
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl fmt::Display for QueueJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueJobStatus::Completed => write!(f, "completed"),
            QueueJobStatus::Failed => write!(f, "failed"),
        }
    }
}
