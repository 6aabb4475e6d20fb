// Datasource credential application

use crate::models::datasource::DS_INFLUXDB_08;
use crate::models::{AuthMode, DataSource};
use crate::proxy::outgoing::OutgoingRequest;
use crate::utils::http::basic_auth_header;

/// Apply the datasource's resolved credential strategy.
///
/// OAuth pass-through needs the caller's stored token and is applied by
/// the director after route handling.
pub fn apply_auth_mode(req: &mut OutgoingRequest, ds: &DataSource) {
    match &ds.auth {
        AuthMode::PasswordAsQuery { user, password } => {
            req.url
                .query_pairs_mut()
                .append_pair("u", user)
                .append_pair("p", password);
        }
        AuthMode::PasswordAsHeader { user, password } => {
            req.set_header("Authorization", &basic_auth_header(user, password));
        }
        AuthMode::BasicAuthHeader { user, password } => {
            // 0.8 servers still read their own credentials from the query
            if ds.ds_type == DS_INFLUXDB_08 {
                req.url
                    .query_pairs_mut()
                    .append_pair("u", &ds.user)
                    .append_pair("p", &ds.decrypted_password());
            }
            req.set_header("Authorization", &basic_auth_header(user, password));
        }
        // carried by the custom headers
        AuthMode::CustomHeaderSecret => {}
        AuthMode::OAuthPassThrough | AuthMode::Direct => {}
    }
}

/// Set every `httpHeaderName<N>` header of the datasource
pub fn apply_custom_headers(req: &mut OutgoingRequest, ds: &DataSource) {
    for (name, value) in ds.custom_headers() {
        tracing::debug!("Adding custom header {} for datasource {}", name, ds.name);
        req.set_header(&name, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasource::DS_INFLUXDB;
    use axum::http::{HeaderMap, Method};
    use url::Url;

    fn request(url: &str) -> OutgoingRequest {
        OutgoingRequest::new(Method::GET, Url::parse(url).unwrap(), HeaderMap::new())
    }

    #[test]
    fn test_influxdb_password_as_basic_header() {
        let mut ds = DataSource::new(DS_INFLUXDB, "http://influx:8086");
        ds.user = "user".into();
        ds.secure_json_data.insert("password".into(), "password".into());
        let ds = ds.resolved();

        let mut req = request("http://influx:8086/query?db=site");
        apply_auth_mode(&mut req, &ds);
        assert_eq!(req.header_str("authorization"), Some("Basic dXNlcjpwYXNzd29yZA=="));
        assert_eq!(req.url.query(), Some("db=site"));
    }

    #[test]
    fn test_influxdb_08_password_as_query() {
        let mut ds = DataSource::new(DS_INFLUXDB_08, "http://influx:8083");
        ds.user = "user".into();
        ds.password = "password".into();
        let ds = ds.resolved();

        let mut req = request("http://influx:8083/db/site/series");
        apply_auth_mode(&mut req, &ds);
        assert_eq!(req.url.query(), Some("u=user&p=password"));
        assert!(req.header_str("authorization").is_none());
    }

    #[test]
    fn test_influxdb_08_basic_auth_keeps_query_credentials() {
        let mut ds = DataSource::new(DS_INFLUXDB_08, "http://influx:8083");
        ds.user = "user".into();
        ds.password = "password".into();
        ds.basic_auth = true;
        ds.basic_auth_user = "proxyuser".into();
        ds.basic_auth_password = "proxypass".into();
        let ds = ds.resolved();

        let mut req = request("http://influx:8083/db/site/series");
        apply_auth_mode(&mut req, &ds);
        assert_eq!(req.url.query(), Some("u=user&p=password"));
        assert_eq!(
            req.header_str("authorization"),
            Some(basic_auth_header("proxyuser", "proxypass").as_str())
        );
    }

    #[test]
    fn test_basic_auth_uses_basic_auth_credentials() {
        let mut ds = DataSource::new("graphite", "http://graphite:8080");
        ds.user = "ignored".into();
        ds.basic_auth = true;
        ds.basic_auth_user = "user".into();
        ds.secure_json_data
            .insert("basicAuthPassword".into(), "password".into());
        let ds = ds.resolved();

        let mut req = request("http://graphite:8080/render");
        apply_auth_mode(&mut req, &ds);
        assert_eq!(req.header_str("authorization"), Some("Basic dXNlcjpwYXNzd29yZA=="));
    }

    #[test]
    fn test_custom_headers_are_applied() {
        let mut ds = DataSource::new("prometheus", "http://prometheus:9090");
        ds.json_data
            .insert("httpHeaderName1".into(), "Authorization".into());
        ds.secure_json_data
            .insert("httpHeaderValue1".into(), "Bearer xf5yhfkpsnmgo".into());
        let ds = ds.resolved();

        let mut req = request("http://prometheus:9090/api/v1/query");
        apply_auth_mode(&mut req, &ds);
        assert!(req.header_str("authorization").is_none());
        apply_custom_headers(&mut req, &ds);
        assert_eq!(req.header_str("authorization"), Some("Bearer xf5yhfkpsnmgo"));
    }
}
