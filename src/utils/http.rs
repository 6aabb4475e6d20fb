use crate::error::{AppError, AppResult};
use base64::{engine::general_purpose, Engine as _};
use crate::proxy::config::UpstreamProxyConfig;
use reqwest::{redirect, ClientBuilder, Proxy};
use std::time::Duration;

/// Base builder for every outbound client.
///
/// Environment proxies are ignored; only the configured upstream proxy is used.
/// Redirects are handed back to the caller instead of being followed.
pub fn client_builder(timeout_secs: u64, proxy_config: Option<&UpstreamProxyConfig>) -> ClientBuilder {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(redirect::Policy::none())
        .no_proxy();

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            match Proxy::all(&config.url) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    tracing::debug!("HTTP client upstream proxy enabled: {}", config.url);
                }
                Err(e) => {
                    tracing::error!("Invalid proxy address: {}, error: {}", config.url, e);
                }
            }
        }
    }

    builder
}

/// Create an HTTP client with specified proxy configuration
pub fn create_client_with_proxy(
    timeout_secs: u64,
    proxy_config: Option<&UpstreamProxyConfig>,
) -> AppResult<reqwest::Client> {
    client_builder(timeout_secs, proxy_config)
        .build()
        .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))
}

pub fn basic_auth_header(user: &str, password: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}
