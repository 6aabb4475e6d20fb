pub mod error;
pub mod models;
pub mod modules;
pub mod proxy; // Proxy service module
pub mod utils;

use std::sync::Arc;
use tracing::{error, info};

use error::{AppError, AppResult};
use models::AppConfig;
use modules::db::Store;
use modules::logger;
use modules::oauth::OAuthTokenService;
use modules::plugins::PluginRegistry;
use proxy::server::AppState;
use proxy::token_cache::{SystemClock, TokenCache};
use proxy::transport::TransportCache;
use proxy::upstream::UpstreamClient;
use proxy::{AxumServer, ProxyServices};

/// Start the datasource proxy and serve until Ctrl-C
pub async fn run() -> AppResult<()> {
    // Initialize logger
    logger::init_logger();

    let data_dir = modules::get_data_dir()?;
    let config = modules::load_app_config()?;
    info!("Data directory: {:?}", data_dir);

    let state = build_state(&config, &data_dir)?;
    let (server, handle) = AxumServer::start(
        config.proxy.get_bind_address().to_string(),
        config.proxy.port,
        state,
    )
    .await
    .map_err(AppError::Config)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.stop();
    if let Err(e) = handle.await {
        error!("Server task ended abnormally: {}", e);
    }
    Ok(())
}

fn build_state(config: &AppConfig, data_dir: &std::path::Path) -> AppResult<AppState> {
    let db_path = modules::database_path(config, data_dir);
    let store = Arc::new(Store::open(&db_path)?);
    info!("Database opened at {:?}", db_path);

    if let Some(key) = &config.auth.bootstrap_admin_key {
        store.ensure_api_key(key)?;
    }

    let plugins = PluginRegistry::load(&modules::plugins_dir(config, data_dir));
    info!("{} datasource plugin(s) registered", plugins.len());

    let token_client = Arc::new(UpstreamClient::new(
        config.proxy.request_timeout,
        Some(&config.proxy.upstream_proxy),
    )?);
    let clock = Arc::new(SystemClock);

    let services = ProxyServices {
        tokens: Arc::new(TokenCache::new(token_client.clone(), clock.clone())),
        oauth: Arc::new(OAuthTokenService::new(
            store.clone(),
            config.oauth_providers.clone(),
            token_client,
            clock,
        )),
        transports: Arc::new(TransportCache::new()),
    };

    Ok(AppState {
        store,
        plugins: Arc::new(plugins),
        proxy_config: Arc::new(config.proxy.clone()),
        auth_config: Arc::new(config.auth.clone()),
        services,
    })
}
