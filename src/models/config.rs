use crate::models::OrgRole;
use crate::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Providers used to refresh stored user tokens (key: auth module without `oauth_`)
    #[serde(default)]
    pub oauth_providers: HashMap<String, OAuthProviderConfig>,
    /// Directory scanned for `*/plugin.json`, defaults to `<data_dir>/plugins`
    #[serde(default)]
    pub plugins_dir: Option<String>,
    /// SQLite file, defaults to `<data_dir>/datasource_proxy.db`
    #[serde(default)]
    pub database_path: Option<String>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            auth: AuthConfig::default(),
            oauth_providers: HashMap::new(),
            plugins_dir: None,
            database_path: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub anonymous_enabled: bool,
    #[serde(default = "default_anonymous_org_id")]
    pub anonymous_org_id: i64,
    #[serde(default = "default_anonymous_org_role")]
    pub anonymous_org_role: OrgRole,
    /// Plaintext key guaranteed to exist as an org 1 admin key
    #[serde(default)]
    pub bootstrap_admin_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_enabled: false,
            anonymous_org_id: default_anonymous_org_id(),
            anonymous_org_role: default_anonymous_org_role(),
            bootstrap_admin_key: None,
        }
    }
}

fn default_anonymous_org_id() -> i64 {
    1
}

fn default_anonymous_org_role() -> OrgRole {
    OrgRole::Viewer
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub token_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "auth": { "anonymous_enabled": true }, "proxy": { "port": 9000 } }"#,
        )
        .unwrap();
        assert!(config.auth.anonymous_enabled);
        assert_eq!(config.auth.anonymous_org_role, OrgRole::Viewer);
        assert_eq!(config.proxy.port, 9000);
        assert_eq!(config.proxy.request_timeout, 30);
        assert!(config.oauth_providers.is_empty());
    }
}
