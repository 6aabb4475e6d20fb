use crate::models::AuthConfig;
use crate::modules::db::Store;
use crate::modules::plugins::PluginRegistry;
use crate::proxy::ds_proxy::ProxyServices;
use crate::proxy::ProxyConfig;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub plugins: Arc<PluginRegistry>,
    pub proxy_config: Arc<ProxyConfig>,
    pub auth_config: Arc<AuthConfig>,
    pub services: ProxyServices,
}

/// Routes of the service. Everything except `/healthz` goes through the
/// identity middleware.
pub fn build_router(state: AppState) -> Router {
    use crate::proxy::handlers::datasource;

    let api = Router::new()
        .route("/api/datasources/proxy/:id", any(datasource::handle_proxy))
        .route("/api/datasources/proxy/:id/*path", any(datasource::handle_proxy))
        .route(
            "/api/datasources",
            get(datasource::handle_list_datasources).post(datasource::handle_create_datasource),
        )
        .route(
            "/api/datasources/:id",
            get(datasource::handle_get_datasource)
                .put(datasource::handle_update_datasource)
                .delete(datasource::handle_delete_datasource),
        )
        .route("/api/auth/keys", post(datasource::handle_create_api_key))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::proxy::middleware::auth_middleware,
        ));

    Router::new()
        .merge(api)
        .route("/healthz", get(health_check_handler))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        host: String,
        port: u16,
        state: AppState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = build_router(state);

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        tracing::info!("Datasource proxy started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;
            use tower::ServiceExt;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, peer)) => {
                                let io = TokioIo::new(stream);
                                // Peer address for X-Forwarded-For
                                let app = app.clone().map_request(move |mut req: hyper::Request<hyper::body::Incoming>| {
                                    req.extensions_mut().insert(ConnectInfo(peer));
                                    req
                                });
                                let service = TowerToHyperService::new(app);

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Datasource proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
