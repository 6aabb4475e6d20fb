// Token endpoint client
// Form-encoded POSTs to OAuth2 token endpoints

use futures::future::BoxFuture;
use reqwest::{header, Client};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::proxy::config::UpstreamProxyConfig;

/// Outbound token endpoint calls, swappable in tests
pub trait TokenClient: Send + Sync {
    fn post_form<'a>(
        &'a self,
        url: &'a str,
        params: &'a [(String, String)],
    ) -> BoxFuture<'a, AppResult<Value>>;
}

pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(timeout_secs: u64, proxy_config: Option<&UpstreamProxyConfig>) -> AppResult<Self> {
        let http_client = crate::utils::http::create_client_with_proxy(timeout_secs, proxy_config)?;
        Ok(Self { http_client })
    }

    async fn send_form(&self, url: &str, params: &[(String, String)]) -> AppResult<Value> {
        let response = self
            .http_client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::TokenRequest(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TokenRequest(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::TokenRequest(format!("invalid token response: {}", e)))
    }
}

impl TokenClient for UpstreamClient {
    fn post_form<'a>(
        &'a self,
        url: &'a str,
        params: &'a [(String, String)],
    ) -> BoxFuture<'a, AppResult<Value>> {
        Box::pin(self.send_form(url, params))
    }
}
