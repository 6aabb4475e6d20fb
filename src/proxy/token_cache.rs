use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::proxy::upstream::TokenClient;

/// Cached tokens are refreshed this many seconds before they expire
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Source of "now" as a unix timestamp (seconds)
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Form POST to send to a token endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    /// Unix timestamp (seconds)
    pub expires_on: i64,
}

/// Process-local cache of route bearer tokens.
///
/// Each key owns an async mutex, so concurrent requests for the same
/// route wait for a single token endpoint call while other routes
/// proceed independently.
pub struct TokenCache {
    entries: DashMap<String, Arc<Mutex<Option<CachedToken>>>>,
    client: Arc<dyn TokenClient>,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    pub fn new(client: Arc<dyn TokenClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            client,
            clock,
        }
    }

    /// Return the cached token for `key`, or fetch a new one.
    ///
    /// `build_request` only runs on a miss.
    pub async fn get_or_fetch<F>(&self, key: &str, build_request: F) -> AppResult<String>
    where
        F: FnOnce(i64) -> AppResult<TokenRequest>,
    {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut cached = slot.lock().await;
        let now = self.clock.now();

        if let Some(token) = cached.as_ref() {
            if token.expires_on > now + EXPIRY_MARGIN_SECS {
                tracing::debug!("Using cached access token for {}", key);
                return Ok(token.access_token.clone());
            }
        }

        let request = build_request(now)?;
        let body = self.client.post_form(&request.url, &request.params).await?;
        let token = parse_token_response(&body, now)?;

        tracing::info!(
            "Got new access token for {}, expires on {}",
            key,
            token.expires_on
        );

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop every token of the datasource, all versions included
    pub fn invalidate_datasource(&self, ds_id: i64) {
        let prefix = format!("{}_", ds_id);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `expires_on` is absolute epoch seconds, `expires_in` is relative to now.
/// Both may arrive as strings. Without either, the token is not reused.
pub fn parse_token_response(body: &Value, now: i64) -> AppResult<CachedToken> {
    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::TokenRequest("response has no access_token".to_string()))?
        .to_string();

    let expires_on = if let Some(epoch) = body.get("expires_on").and_then(json_i64) {
        epoch
    } else if let Some(secs) = body.get("expires_in").and_then(json_i64) {
        now + secs
    } else {
        now
    };

    Ok(CachedToken {
        access_token,
        expires_on,
    })
}

fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
