use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use tracing::info;

use crate::db::entities::user;
use crate::db::services::subscription_service::{self, QuotaError};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("Email already exists: {0}")]
    EmailTaken(String),
    #[error("User {0} not found")]
    NotFound(i32),
}

/// Creates a user row with a Free-plan subscription. Authentication lives
/// upstream; this side only needs an owner for accounts and campaigns.
pub async fn create_user(db: &DatabaseConnection, email: &str) -> Result<user::Model, UserError> {
    if user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await?
        .is_some()
    {
        return Err(UserError::EmailTaken(email.to_string()));
    }

    let created = user::ActiveModel {
        email: Set(email.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    subscription_service::ensure_subscription(db, created.id).await?;
    info!(user_id = created.id, "User created");
    Ok(created)
}

pub async fn get_user(db: &DatabaseConnection, user_id: i32) -> Result<user::Model, UserError> {
    user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(UserError::NotFound(user_id))
}
