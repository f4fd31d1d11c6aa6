use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::{info, warn};

use crate::db::entities::account;
use crate::db::services::campaign_service;
use crate::db::services::subscription_service::{self, QuotaAction, QuotaDecision, QuotaError};
use crate::engine::executor::ActionExecutor;
use crate::services::{CredentialVault, VaultError};

/// Pause reason written to campaigns when their account's credentials stop
/// working. Re-adding the account is the documented remedy; there is no
/// silent retry against a changed key.
pub const REAUTH_REASON: &str = "Account credentials are no longer valid. Re-authenticate this account.";

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("Account limit reached ({limit}). Please upgrade your plan.")]
    QuotaDenied { limit: i32 },
    #[error("Your subscription period has ended. You have been moved to the Free plan.")]
    PeriodExpired,
    #[error("Account {0} not found")]
    NotFound(i32),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("Account validation failed: {0}")]
    Validation(String),
}

/// Validates the session credentials with the platform, seals them, and
/// stores the account. Gated on the plan's account cap.
pub async fn add_account(
    db: &DatabaseConnection,
    vault: &CredentialVault,
    executor: &dyn ActionExecutor,
    user_id: i32,
    username: &str,
    credentials: &str,
) -> Result<account::Model, AccountError> {
    match subscription_service::authorize(db, user_id, QuotaAction::AddAccount).await? {
        QuotaDecision::Ok => {}
        QuotaDecision::QuotaExceeded { limit, .. } => {
            return Err(AccountError::QuotaDenied { limit });
        }
        QuotaDecision::PeriodExpired => return Err(AccountError::PeriodExpired),
    }

    let profile = executor
        .validate_account(credentials, username)
        .await
        .map_err(|e| AccountError::Validation(e.reason))?;

    let sealed = vault.seal(credentials)?;
    let now = Utc::now();
    let created = account::ActiveModel {
        user_id: Set(user_id),
        username: Set(profile.username.clone()),
        handle: Set(profile.handle),
        encrypted_credentials: Set(sealed),
        is_valid: Set(true),
        last_validated: Set(now),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(user_id, account_id = created.id, username = %profile.username, "Account added");
    Ok(created)
}

pub async fn get_account(
    db: &DatabaseConnection,
    account_id: i32,
) -> Result<account::Model, AccountError> {
    account::Entity::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or(AccountError::NotFound(account_id))
}

pub async fn list_accounts_for_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<account::Model>, DbErr> {
    account::Entity::find()
        .filter(account::Column::UserId.eq(user_id))
        .order_by_desc(account::Column::CreatedAt)
        .all(db)
        .await
}

/// Opens the account's sealed credential blob. Decryption failure is a
/// credential failure, not a transient error: the caller is expected to
/// invalidate the account and pause its campaigns.
pub fn decrypt_credentials(
    vault: &CredentialVault,
    account_row: &account::Model,
) -> Result<String, VaultError> {
    vault.open(&account_row.encrypted_credentials)
}

/// Re-checks the stored credentials against the platform and records the
/// verdict. An invalid verdict pauses every campaign using the account.
pub async fn revalidate_account(
    db: &DatabaseConnection,
    vault: &CredentialVault,
    executor: &dyn ActionExecutor,
    account_id: i32,
) -> Result<account::Model, AccountError> {
    let account_row = get_account(db, account_id).await?;

    let credentials = match decrypt_credentials(vault, &account_row) {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(account_id, error = %e, "Credential decryption failed during revalidation");
            invalidate_account(db, account_id).await?;
            campaign_service::pause_campaigns_for_account(db, account_id, REAUTH_REASON).await?;
            return Err(AccountError::Vault(e));
        }
    };

    match executor.validate_account(&credentials, &account_row.username).await {
        Ok(profile) => {
            let mut active: account::ActiveModel = account_row.into();
            active.username = Set(profile.username);
            active.handle = Set(profile.handle);
            active.is_valid = Set(true);
            active.last_validated = Set(Utc::now());
            Ok(active.update(db).await?)
        }
        Err(failure) => {
            warn!(account_id, reason = %failure.reason, "Account validation failed");
            let updated = invalidate_account(db, account_id).await?;
            campaign_service::pause_campaigns_for_account(db, account_id, REAUTH_REASON).await?;
            Ok(updated)
        }
    }
}

/// Flags the account as unusable until the user re-authenticates it.
pub async fn invalidate_account(
    db: &DatabaseConnection,
    account_id: i32,
) -> Result<account::Model, AccountError> {
    let account_row = get_account(db, account_id).await?;
    let mut active: account::ActiveModel = account_row.into();
    active.is_valid = Set(false);
    active.last_validated = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// Removes the account; campaigns and their targets cascade with it.
pub async fn delete_account(
    db: &DatabaseConnection,
    user_id: i32,
    account_id: i32,
) -> Result<(), AccountError> {
    let account_row = account::Entity::find_by_id(account_id)
        .filter(account::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(AccountError::NotFound(account_id))?;
    account::Entity::delete_by_id(account_row.id).exec(db).await?;
    info!(user_id, account_id, "Account deleted");
    Ok(())
}
