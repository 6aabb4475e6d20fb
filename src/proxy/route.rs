// Plugin route matching and application

use url::Url;

use crate::error::{AppError, AppResult};
use crate::models::{DataSource, PluginRoute, SignedInUser};
use crate::proxy::interpolate::{interpolate_string, TemplateData};
use crate::proxy::outgoing::OutgoingRequest;
use crate::proxy::token_cache::TokenCache;
use crate::proxy::token_source;
use crate::utils::path::join_url_fragments;

/// First route, in declaration order, whose prefix matches `proxy_path`
/// and whose method accepts `method`
pub fn match_route<'a>(
    routes: &'a [PluginRoute],
    proxy_path: &str,
    method: &str,
) -> Option<&'a PluginRoute> {
    routes
        .iter()
        .find(|route| route.matches_method(method) && proxy_path.starts_with(route.path.as_str()))
}

/// Reject callers whose org role is below the route's required role
pub fn authorize_route(route: &PluginRoute, user: &SignedInUser) -> AppResult<()> {
    match route.req_role {
        Some(role) if !user.has_role(role) => Err(AppError::AccessDenied(
            "Plugin proxy route access denied".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Point the request at the route target and add route headers and tokens.
///
/// An unparseable route URL leaves the request on the datasource URL.
/// Token failures are returned so the request is not forwarded.
pub async fn apply_route(
    req: &mut OutgoingRequest,
    proxy_path: &str,
    route: &PluginRoute,
    ds: &DataSource,
    tokens: &TokenCache,
) -> AppResult<()> {
    let sub_path = proxy_path
        .strip_prefix(route.path.as_str())
        .unwrap_or(proxy_path);
    let data = TemplateData::from_datasource(ds);

    let interpolated_url = interpolate_string(&route.url, &data);
    let route_url = match Url::parse(&interpolated_url) {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(
                "Error parsing plugin route url for datasource {}: {}",
                ds.name,
                e
            );
            return Ok(());
        }
    };

    let query = req.url.query().map(|q| q.to_string());
    let mut target = route_url.clone();
    target.set_path(&join_url_fragments(route_url.path(), sub_path));
    target.set_query(query.as_deref());
    req.url = target;

    for header in &route.headers {
        let value = interpolate_string(&header.content, &data);
        req.set_header(&header.name, &value);
    }

    if let Some(token_auth) = &route.token_auth {
        let key = token_source::cache_key(ds, route);
        let token = tokens
            .get_or_fetch(&key, |_| {
                Ok(token_source::client_credentials_request(token_auth, &data))
            })
            .await?;
        req.set_header("Authorization", &format!("Bearer {}", token));
    }

    let authentication_type = ds.json_str("authenticationType").unwrap_or("jwt");
    if let Some(jwt_auth) = &route.jwt_token_auth {
        if authentication_type == "jwt" {
            let key = token_source::cache_key(ds, route);
            let token = tokens
                .get_or_fetch(&key, |now| token_source::jwt_bearer_request(jwt_auth, &data, now))
                .await?;
            req.set_header("Authorization", &format!("Bearer {}", token));
        }
    }

    tracing::debug!("Requesting {}", req.redacted_url());
    Ok(())
}
