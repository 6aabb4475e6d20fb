// Per-datasource HTTP clients

use dashmap::DashMap;
use reqwest::{Certificate, Client, Identity};
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::DataSource;
use crate::proxy::config::ProxyConfig;

/// One `reqwest::Client` per datasource, rebuilt when the datasource
/// version changes so edited TLS settings take effect.
pub struct TransportCache {
    clients: DashMap<i64, (i64, Client)>,
}

impl TransportCache {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn get_or_build(&self, ds: &DataSource, config: &ProxyConfig) -> AppResult<Client> {
        if let Some(entry) = self.clients.get(&ds.id) {
            let (version, client) = entry.value();
            if *version == ds.version {
                return Ok(client.clone());
            }
        }

        let client = build_client(ds, config)?;
        tracing::debug!(
            "Built HTTP transport for datasource {} (version {})",
            ds.id,
            ds.version
        );
        self.clients.insert(ds.id, (ds.version, client.clone()));
        Ok(client)
    }

    pub fn remove(&self, ds_id: i64) {
        self.clients.remove(&ds_id);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

impl Default for TransportCache {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(ds: &DataSource, config: &ProxyConfig) -> AppResult<Client> {
    let mut builder = crate::utils::http::client_builder(
        config.request_timeout,
        Some(&config.upstream_proxy),
    )
    .pool_idle_timeout(Duration::from_secs(config.keep_alive_seconds));

    if ds.json_bool("tlsSkipVerify") {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if ds.json_bool("tlsAuthWithCACert") {
        let pem = ds.secure_json_data.get("tlsCACert").cloned().unwrap_or_default();
        let cert = Certificate::from_pem(pem.as_bytes()).map_err(tls_error)?;
        builder = builder.add_root_certificate(cert);
    }

    if ds.json_bool("tlsAuth") {
        let cert = ds.secure_json_data.get("tlsClientCert").cloned().unwrap_or_default();
        let key = ds.secure_json_data.get("tlsClientKey").cloned().unwrap_or_default();
        let identity =
            Identity::from_pkcs8_pem(cert.as_bytes(), key.as_bytes()).map_err(tls_error)?;
        builder = builder.identity(identity);
    }

    builder.build().map_err(tls_error)
}

fn tls_error(e: reqwest::Error) -> AppError {
    tracing::error!("Failed to build datasource transport: {}", e);
    AppError::BadRequest("Unable to load TLS certificate".to_string())
}
