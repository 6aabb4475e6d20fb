use serde::{Deserialize, Serialize};

/// Datasource proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Allow LAN access
    /// - false: loopback only, 127.0.0.1 (default)
    /// - true: all interfaces, 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for outbound datasource and token calls (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Idle keep-alive of pooled backend connections (seconds)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    /// Send `X-Grafana-User` with the caller's login
    #[serde(default)]
    pub send_user_header: bool,

    /// Log every proxied request
    #[serde(default)]
    pub logging: bool,

    /// Allowed backend `host[:port]` values, empty allows all
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Version advertised in the outbound User-Agent
    #[serde(default = "default_build_version")]
    pub build_version: String,

    /// Upstream proxy configuration
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Enabled
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            request_timeout: default_request_timeout(),
            keep_alive_seconds: default_keep_alive(),
            send_user_header: false,
            logging: false,
            whitelist: Vec::new(),
            build_version: default_build_version(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8045
}

fn default_request_timeout() -> u64 {
    30
}

fn default_keep_alive() -> u64 {
    30
}

fn default_build_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl ProxyConfig {
    /// Get the actual listening address
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    pub fn user_agent(&self) -> String {
        format!("Grafana/{}", self.build_version)
    }

    /// Empty whitelist allows every host
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}
