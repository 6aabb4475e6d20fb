// Datasource reverse proxy
//
// Validates a proxied call, rewrites it for the datasource backend and
// streams the backend response back to the caller.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

use crate::error::{AppError, AppResult};
use crate::models::datasource::{DS_ES, DS_PROMETHEUS};
use crate::models::{DataSource, DataSourcePlugin, PluginRoute, SignedInUser};
use crate::modules::oauth::OAuthTokenService;
use crate::proxy::config::ProxyConfig;
use crate::proxy::outgoing::OutgoingRequest;
use crate::proxy::route;
use crate::proxy::token_cache::TokenCache;
use crate::proxy::transport::TransportCache;

/// Headers meaningful for a single connection only
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared services used while proxying
#[derive(Clone)]
pub struct ProxyServices {
    pub tokens: Arc<TokenCache>,
    pub oauth: Arc<OAuthTokenService>,
    pub transports: Arc<TransportCache>,
}

impl ProxyServices {
    /// Forget cached tokens and clients of an edited or deleted datasource
    pub fn forget_datasource(&self, ds_id: i64) {
        self.tokens.invalidate_datasource(ds_id);
        self.transports.remove(ds_id);
    }
}

/// Request extension carrying a `Set-Cookie` value that was pending on the
/// caller's response before it reached the proxy.
///
/// Nothing in this crate produces it. A host application that nests
/// `build_router` behind its own session layer inserts it when that layer
/// has rotated a session cookie, so the proxied response still delivers it.
#[derive(Debug, Clone)]
pub struct PendingSetCookie(pub HeaderValue);

/// The inbound call as seen by the proxy
#[derive(Debug, Clone)]
pub struct ReqContext {
    pub user: SignedInUser,
    pub remote_addr: Option<IpAddr>,
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Option<String>,
    /// `Set-Cookie` the caller's response already carried before proxying
    pub pending_set_cookie: Option<HeaderValue>,
}

pub struct DataSourceProxy {
    pub(crate) ds: Arc<DataSource>,
    pub(crate) plugin: Arc<DataSourcePlugin>,
    pub(crate) ctx: ReqContext,
    pub(crate) proxy_path: String,
    pub(crate) target_url: Url,
    pub(crate) cfg: Arc<ProxyConfig>,
    pub(crate) route: Option<PluginRoute>,
    pub(crate) services: ProxyServices,
}

impl DataSourceProxy {
    pub fn new(
        ds: Arc<DataSource>,
        plugin: Arc<DataSourcePlugin>,
        ctx: ReqContext,
        proxy_path: String,
        cfg: Arc<ProxyConfig>,
        services: ProxyServices,
    ) -> AppResult<Self> {
        let target_url = Url::parse(&ds.url).map_err(|e| {
            tracing::warn!("Invalid url of datasource {}: {}", ds.name, e);
            AppError::BadRequest("Invalid data source url".to_string())
        })?;

        Ok(Self {
            ds,
            plugin,
            ctx,
            proxy_path,
            target_url,
            cfg,
            route: None,
            services,
        })
    }

    /// Proxy the call. Every failure is turned into a `{"message"}` response.
    pub async fn handle_request(mut self, body: Bytes) -> Response {
        match self.forward(body).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn forward(&mut self, body: Bytes) -> AppResult<Response> {
        self.validate_request()?;

        let client = self.services.transports.get_or_build(&self.ds, &self.cfg)?;
        self.log_request(&body);

        let mut req = OutgoingRequest::new(
            self.ctx.method.clone(),
            self.target_url.clone(),
            self.ctx.headers.clone(),
        );
        self.direct(&mut req).await?;
        strip_hop_by_hop(&mut req.headers);
        req.headers.remove(header::HOST);
        req.headers.remove(header::CONTENT_LENGTH);

        let upstream = client
            .request(req.method, req.url)
            .headers(req.headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Datasource {} request failed: {}", self.ds.name, e);
                AppError::Network(e)
            })?;

        Ok(self.build_response(upstream))
    }

    /// Whitelist, per-type method restrictions and route selection
    pub fn validate_request(&mut self) -> AppResult<()> {
        if !self.check_whitelist() {
            return Err(AppError::AccessDenied(
                "Target url is not a valid target".to_string(),
            ));
        }

        let method = &self.ctx.method;
        let path = self.proxy_path.as_str();

        if self.ds.ds_type == DS_ES {
            if method == Method::DELETE {
                return Err(AppError::AccessDenied(
                    "Deletes not allowed on proxied Elasticsearch datasource".to_string(),
                ));
            }
            if method == Method::PUT {
                return Err(AppError::AccessDenied(
                    "Puts not allowed on proxied Elasticsearch datasource".to_string(),
                ));
            }
            if method == Method::POST && path != "_msearch" {
                return Err(AppError::AccessDenied(
                    "Posts not allowed on proxied Elasticsearch datasource except on /_msearch"
                        .to_string(),
                ));
            }
        }

        if self.ds.ds_type == DS_PROMETHEUS {
            if method == Method::DELETE {
                return Err(AppError::AccessDenied(
                    "Deletes not allowed on proxied Prometheus datasource".to_string(),
                ));
            }
            if method == Method::PUT {
                return Err(AppError::AccessDenied(
                    "Puts not allowed on proxied Prometheus datasource".to_string(),
                ));
            }
            if method == Method::POST && !(path == "api/v1/query" || path == "api/v1/query_range")
            {
                return Err(AppError::AccessDenied(
                    "Posts not allowed on proxied Prometheus datasource except on /query and /query_range"
                        .to_string(),
                ));
            }
        }

        if let Some(matched) = route::match_route(&self.plugin.routes, path, method.as_str()) {
            route::authorize_route(matched, &self.ctx.user)?;
            self.route = Some(matched.clone());
        }

        Ok(())
    }

    fn check_whitelist(&self) -> bool {
        let host = match (self.target_url.host_str(), self.target_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return false,
        };
        self.cfg.is_host_allowed(&host)
    }

    fn log_request(&self, body: &Bytes) {
        if !self.cfg.logging {
            return;
        }

        let user = &self.ctx.user;
        tracing::info!(
            user_id = user.user_id,
            org_id = user.org_id,
            uname = %user.login,
            path = %self.proxy_path,
            remote_addr = ?self.ctx.remote_addr,
            datasource = %self.ds.name,
            ds_type = %self.ds.ds_type,
            body = %String::from_utf8_lossy(body),
            "Proxying incoming request"
        );
    }

    fn build_response(&self, upstream: reqwest::Response) -> Response {
        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        if !self.ds.json_bool("allowSetCookie") {
            headers.remove(header::SET_COOKIE);
        }
        if let Some(original) = &self.ctx.pending_set_cookie {
            headers.append(header::SET_COOKIE, original.clone());
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Remove hop-by-hop headers, including those named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}
