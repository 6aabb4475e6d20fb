// Datasource handlers: data proxy endpoint and admin API
use axum::{
    extract::{ConnectInfo, Json, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::user::SERVICE_ACCOUNT_USER_ID;
use crate::models::{DataSourceCommand, DataSourceDto, OrgRole, SignedInUser};
use crate::proxy::ds_proxy::{DataSourceProxy, PendingSetCookie, ReqContext};
use crate::proxy::server::AppState;

const PROXY_PREFIX: &str = "/api/datasources/proxy/";
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// `ANY /api/datasources/proxy/:id/*path`
pub async fn handle_proxy(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    match proxy_request(state, user, params, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn proxy_request(
    state: AppState,
    user: SignedInUser,
    params: HashMap<String, String>,
    request: Request,
) -> AppResult<Response> {
    let id: i64 = params
        .get("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| AppError::BadRequest("id is invalid".to_string()))?;

    let ds = state.store.get_datasource(id, user.org_id)?;
    let plugin = state
        .plugins
        .get(&ds.ds_type)
        .ok_or_else(|| AppError::Internal("Unable to find datasource plugin".to_string()))?;

    let (parts, body) = request.into_parts();
    let proxy_path = proxy_path(parts.uri.path());
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;

    let ctx = ReqContext {
        user,
        remote_addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        method: parts.method,
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        pending_set_cookie: parts
            .extensions
            .get::<PendingSetCookie>()
            .map(|pending| pending.0.clone()),
    };

    let proxy = DataSourceProxy::new(
        Arc::new(ds),
        plugin,
        ctx,
        proxy_path,
        state.proxy_config.clone(),
        state.services.clone(),
    )?;
    Ok(proxy.handle_request(body).await)
}

/// Raw sub-path after the datasource id, trailing slash included
fn proxy_path(uri_path: &str) -> String {
    uri_path
        .strip_prefix(PROXY_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .map(|(_, path)| path.to_string())
        .unwrap_or_default()
}

fn require_admin(user: &SignedInUser) -> AppResult<()> {
    if user.has_role(OrgRole::Admin) {
        Ok(())
    } else {
        Err(AppError::AccessDenied("Permission denied".to_string()))
    }
}

pub async fn handle_list_datasources(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
) -> AppResult<Json<Vec<DataSourceDto>>> {
    require_admin(&user)?;
    let list = state.store.list_datasources(user.org_id)?;
    Ok(Json(list.iter().map(DataSourceDto::from).collect()))
}

pub async fn handle_get_datasource(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<DataSourceDto>> {
    require_admin(&user)?;
    let ds = state.store.get_datasource(id, user.org_id)?;
    Ok(Json(DataSourceDto::from(&ds)))
}

pub async fn handle_create_datasource(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Json(cmd): Json<DataSourceCommand>,
) -> AppResult<impl IntoResponse> {
    require_admin(&user)?;
    let ds = state.store.add_datasource(user.org_id, &cmd)?;
    Ok((StatusCode::OK, Json(DataSourceDto::from(&ds))))
}

pub async fn handle_update_datasource(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Path(id): Path<i64>,
    Json(cmd): Json<DataSourceCommand>,
) -> AppResult<Json<DataSourceDto>> {
    require_admin(&user)?;
    let ds = state.store.update_datasource(id, user.org_id, &cmd)?;
    state.services.forget_datasource(ds.id);
    Ok(Json(DataSourceDto::from(&ds)))
}

pub async fn handle_delete_datasource(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&user)?;
    state.store.delete_datasource(id, user.org_id)?;
    state.services.forget_datasource(id);
    Ok(Json(json!({ "message": "Data source deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default = "default_key_role")]
    pub role: OrgRole,
}

fn default_key_role() -> OrgRole {
    OrgRole::Viewer
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub name: String,
    pub key: String,
}

/// `POST /api/auth/keys`. The key is only ever returned here.
///
/// Keys act as a service account of the org, not as the admin who
/// created them.
pub async fn handle_create_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<SignedInUser>,
    Json(req): Json<CreateKeyRequest>,
) -> AppResult<Json<CreateKeyResponse>> {
    require_admin(&user)?;
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Key name is required".to_string()));
    }
    let key = state
        .store
        .add_api_key(
            user.org_id,
            &req.name,
            req.role,
            SERVICE_ACCOUNT_USER_ID,
            &req.name,
        )?;
    Ok(Json(CreateKeyResponse {
        name: req.name,
        key,
    }))
}
