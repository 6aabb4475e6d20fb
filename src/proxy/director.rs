// Outgoing request rewriting

use axum::http::{header, HeaderValue};

use crate::error::AppResult;
use crate::models::datasource::DS_INFLUXDB_08;
use crate::models::AuthMode;
use crate::proxy::auth;
use crate::proxy::ds_proxy::DataSourceProxy;
use crate::proxy::middleware::auth::API_KEY_HEADER;
use crate::proxy::outgoing::OutgoingRequest;
use crate::proxy::route;
use crate::utils::path::join_url_fragments;

impl DataSourceProxy {
    /// Rewrite `req` for the datasource backend.
    ///
    /// Method, body and unrelated headers pass through untouched.
    pub async fn direct(&self, req: &mut OutgoingRequest) -> AppResult<()> {
        let ds = &self.ds;

        // target
        let mut url = self.target_url.clone();
        let path = if ds.ds_type == DS_INFLUXDB_08 {
            join_url_fragments(
                self.target_url.path(),
                &format!("db/{}/{}", ds.database, self.proxy_path),
            )
        } else {
            join_url_fragments(self.target_url.path(), &self.proxy_path)
        };
        url.set_path(&path);
        url.set_query(self.ctx.query.as_deref().filter(|q| !q.is_empty()));
        req.url = url;

        // service credential, never meant for the backend
        req.remove_header(API_KEY_HEADER);
        auth::apply_auth_mode(req, ds);

        if let Some(ds_auth) = req.header_str("x-ds-authorization").map(str::to_string) {
            req.remove_header("x-ds-authorization");
            req.set_header("Authorization", &ds_auth);
        }

        req.remove_header("x-grafana-user");
        if self.cfg.send_user_header && !self.ctx.user.is_anonymous {
            req.set_header("X-Grafana-User", &self.ctx.user.login);
        }

        let keep_cookies = ds.json_string_array("keepCookies");
        filter_cookies(req, &keep_cookies);

        req.remove_header("x-forwarded-host");
        req.remove_header("x-forwarded-port");
        req.remove_header("x-forwarded-proto");
        req.set_header("User-Agent", &self.cfg.user_agent());
        req.remove_header(header::ORIGIN.as_str());
        req.remove_header(header::REFERER.as_str());
        if let Some(ip) = self.ctx.remote_addr {
            append_forwarded_for(req, &ip.to_string());
        }

        auth::apply_custom_headers(req, ds);

        if let Some(matched) = &self.route {
            route::apply_route(req, &self.proxy_path, matched, ds, &self.services.tokens).await?;
        }

        if ds.auth == AuthMode::OAuthPassThrough {
            match self.services.oauth.authorization_header(&self.ctx.user).await {
                Some(value) => req.set_header("Authorization", &value),
                None => tracing::warn!(
                    "No OAuth token to pass through for datasource {}",
                    ds.name
                ),
            }
        }

        Ok(())
    }
}

/// Keep only cookies named in `keep`. The header is dropped when nothing remains.
fn filter_cookies(req: &mut OutgoingRequest, keep: &[String]) {
    let kept: Vec<String> = req
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or_default().trim();
            !name.is_empty() && keep.iter().any(|k| k == name)
        })
        .map(str::to_string)
        .collect();

    req.remove_header(header::COOKIE.as_str());
    if !kept.is_empty() {
        req.set_header(header::COOKIE.as_str(), &kept.join("; "));
    }
}

fn append_forwarded_for(req: &mut OutgoingRequest, ip: &str) {
    let prior: Vec<&str> = req
        .headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };
    if let Ok(v) = HeaderValue::from_str(&value) {
        req.headers.insert("x-forwarded-for", v);
    }
}
