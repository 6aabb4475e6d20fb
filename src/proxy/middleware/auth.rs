// API key authentication middleware
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};

use crate::error::{AppError, AppResult};
use crate::models::SignedInUser;
use crate::proxy::server::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolve the caller to a `SignedInUser` request extension.
///
/// The key comes from `Authorization: Bearer` or `X-API-Key`. Without a
/// key the caller is anonymous when that is enabled.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    tracing::debug!("Request: {} {}", request.method(), request.uri().path());

    let api_key = extract_api_key(request.headers());

    let user = match api_key {
        Some((key, carrier)) => {
            let user = state
                .store
                .lookup_api_key(&key)?
                .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;
            // the key authenticates against this service only
            request.headers_mut().remove(carrier);
            user
        }
        None if state.auth_config.anonymous_enabled => SignedInUser::anonymous(
            state.auth_config.anonymous_org_id,
            state.auth_config.anonymous_org_role,
        ),
        None => return Err(AppError::Unauthorized("Unauthorized".to_string())),
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// The caller's key and the header that carried it
fn extract_api_key(headers: &HeaderMap) -> Option<(String, HeaderName)> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|key| (key, header::AUTHORIZATION))
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(|key| (key, HeaderName::from_static(API_KEY_HEADER)))
        })
        .map(|(key, carrier)| (key.trim().to_string(), carrier))
        .filter(|(key, _)| !key.is_empty())
}
