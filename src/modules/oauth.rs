use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{OAuthProviderConfig, SignedInUser, UserAuth};
use crate::modules::db::Store;
use crate::proxy::token_cache::Clock;
use crate::proxy::upstream::TokenClient;

/// Stored tokens are refreshed when they expire within this many seconds
const REFRESH_MARGIN_SECS: i64 = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Forwards the signed-in user's own OAuth token to the backend
pub struct OAuthTokenService {
    store: Arc<Store>,
    providers: HashMap<String, OAuthProviderConfig>,
    client: Arc<dyn TokenClient>,
    clock: Arc<dyn Clock>,
}

impl OAuthTokenService {
    pub fn new(
        store: Arc<Store>,
        providers: HashMap<String, OAuthProviderConfig>,
        client: Arc<dyn TokenClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            providers,
            client,
            clock,
        }
    }

    /// `Authorization` value for the user, refreshing the stored token
    /// when needed. `None` when the user has no usable token.
    pub async fn authorization_header(&self, user: &SignedInUser) -> Option<String> {
        if user.is_anonymous || user.is_service_account() {
            return None;
        }

        let auth = match self.store.get_user_auth(user.user_id) {
            Ok(Some(auth)) => auth,
            Ok(None) => {
                tracing::warn!("No stored OAuth token for user {}", user.login);
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to load OAuth token for user {}: {}", user.login, e);
                return None;
            }
        };

        let auth = match self.ensure_fresh_token(auth).await {
            Ok(auth) => auth,
            Err(e) => {
                tracing::error!("Failed to refresh OAuth token for user {}: {}", user.login, e);
                return None;
            }
        };

        if auth.access_token.is_empty() {
            return None;
        }

        let token_type = if auth.token_type.is_empty() {
            "Bearer"
        } else {
            auth.token_type.as_str()
        };
        Some(format!("{} {}", token_type, auth.access_token))
    }

    /// Return the stored token, refreshed and persisted when it is about
    /// to expire. Tokens without an expiry never refresh.
    pub async fn ensure_fresh_token(&self, current: UserAuth) -> AppResult<UserAuth> {
        let now = self.clock.now();
        if current.expiry == 0 || current.expiry > now + REFRESH_MARGIN_SECS {
            return Ok(current);
        }
        if current.refresh_token.is_empty() {
            tracing::warn!("OAuth token of user {} expired without refresh token", current.user_id);
            return Ok(current);
        }

        let provider_name = current
            .auth_module
            .strip_prefix("oauth_")
            .unwrap_or(&current.auth_module);
        let provider = self.providers.get(provider_name).ok_or_else(|| {
            AppError::Config(format!("Unknown OAuth provider: {}", provider_name))
        })?;

        tracing::info!("Refreshing OAuth token of user {}", current.user_id);
        let params = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), current.refresh_token.clone()),
            ("client_id".to_string(), provider.client_id.clone()),
            ("client_secret".to_string(), provider.client_secret.clone()),
        ];
        let body = self.client.post_form(&provider.token_url, &params).await?;
        let response: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AppError::TokenRequest(format!("invalid refresh response: {}", e)))?;

        let refreshed = UserAuth {
            access_token: response.access_token,
            // providers may omit a rotated refresh token
            refresh_token: response.refresh_token.unwrap_or(current.refresh_token.clone()),
            token_type: if response.token_type.is_empty() {
                current.token_type.clone()
            } else {
                response.token_type
            },
            expiry: if response.expires_in > 0 {
                now + response.expires_in
            } else {
                0
            },
            ..current
        };

        self.store.upsert_user_auth(&refreshed)?;
        tracing::info!(
            "OAuth token of user {} refreshed, expires on {}",
            refreshed.user_id,
            refreshed.expiry
        );
        Ok(refreshed)
    }
}
