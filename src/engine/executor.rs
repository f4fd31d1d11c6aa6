use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Opaque failure from the external platform capability. The engine never
/// interprets `reason` beyond logging it and storing it on the target.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ActionFailure {
    pub reason: String,
}

impl ActionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        ActionFailure { reason: reason.into() }
    }
}

/// The external user an action is aimed at.
#[derive(Debug, Clone)]
pub struct ActionTarget {
    pub external_id: String,
    pub username: String,
}

/// Profile returned by a successful account validation.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountProfile {
    pub username: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// External capability that performs the actual platform calls. The
/// credentials string is the decrypted session blob, passed through opaquely.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn send_message(
        &self,
        credentials: &str,
        target: &ActionTarget,
        text: &str,
    ) -> Result<(), ActionFailure>;

    async fn follow_user(
        &self,
        credentials: &str,
        target: &ActionTarget,
    ) -> Result<(), ActionFailure>;

    async fn validate_account(
        &self,
        credentials: &str,
        username: &str,
    ) -> Result<AccountProfile, ActionFailure>;
}

/// Production executor: delegates every platform call to the automation
/// gateway over HTTP. The gateway owns the platform mechanics (sessions,
/// pagination, scraping); this side only relays and reports.
pub struct GatewayExecutor {
    client: Client,
    base_url: String,
}

impl GatewayExecutor {
    pub fn new(base_url: &str) -> Self {
        GatewayExecutor {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, ActionFailure> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ActionFailure::new(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            Err(ActionFailure::new(format!("gateway returned {status}: {detail}")))
        }
    }
}

#[async_trait]
impl ActionExecutor for GatewayExecutor {
    async fn send_message(
        &self,
        credentials: &str,
        target: &ActionTarget,
        text: &str,
    ) -> Result<(), ActionFailure> {
        self.post(
            "/actions/message",
            json!({
                "credentials": credentials,
                "target": { "id": target.external_id, "username": target.username },
                "text": text,
            }),
        )
        .await?;
        Ok(())
    }

    async fn follow_user(
        &self,
        credentials: &str,
        target: &ActionTarget,
    ) -> Result<(), ActionFailure> {
        self.post(
            "/actions/follow",
            json!({
                "credentials": credentials,
                "target": { "id": target.external_id, "username": target.username },
            }),
        )
        .await?;
        Ok(())
    }

    async fn validate_account(
        &self,
        credentials: &str,
        username: &str,
    ) -> Result<AccountProfile, ActionFailure> {
        let response = self
            .post(
                "/accounts/validate",
                json!({ "credentials": credentials, "username": username }),
            )
            .await?;
        response
            .json::<AccountProfile>()
            .await
            .map_err(|e| ActionFailure::new(format!("invalid gateway response: {e}")))
    }
}
