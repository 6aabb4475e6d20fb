use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Method};
use url::Url;

/// The request under construction. Each proxy stage mutates it in place
/// before it is handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
        }
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace every value of `name`. Names or values that are not valid
    /// HTTP are skipped; the value is never logged.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let header_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("Skipping invalid header name: {}", name);
                return;
            }
        };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(header_name, v);
            }
            Err(_) => {
                tracing::warn!("Skipping header {} with an invalid value", name);
            }
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    /// URL without query string, safe for logs
    pub fn redacted_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default(),
            self.url.path()
        )
    }
}
