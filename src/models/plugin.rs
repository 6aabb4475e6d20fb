use super::user::OrgRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Datasource plugin manifest (`plugin.json`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSourcePlugin {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(default)]
    pub routes: Vec<PluginRoute>,
}

impl DataSourcePlugin {
    pub fn builtin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            plugin_type: "datasource".to_string(),
            routes: Vec::new(),
        }
    }
}

/// Static proxy rule mapping a path prefix to a backend URL
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginRoute {
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub req_role: Option<OrgRole>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Vec<RouteHeader>,
    #[serde(default)]
    pub token_auth: Option<TokenAuth>,
    #[serde(default)]
    pub jwt_token_auth: Option<JwtTokenAuth>,
}

impl PluginRoute {
    /// Empty or `*` accepts any method
    pub fn matches_method(&self, method: &str) -> bool {
        self.method.is_empty() || self.method == "*" || self.method.eq_ignore_ascii_case(method)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RouteHeader {
    pub name: String,
    pub content: String,
}

/// OAuth2 client-credentials token endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TokenAuth {
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Service-account JWT bearer exchange
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct JwtTokenAuth {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_routes() {
        let manifest = r#"{
            "type": "datasource",
            "id": "grafana-azure-monitor-datasource",
            "name": "Azure Monitor",
            "routes": [
                {
                    "path": "azuremonitor",
                    "method": "GET",
                    "reqRole": "Editor",
                    "url": "https://management.azure.com",
                    "tokenAuth": {
                        "url": "https://login.microsoftonline.com/{{.JsonData.tenantId}}/oauth2/token",
                        "params": {
                            "grant_type": "client_credentials",
                            "client_id": "{{.JsonData.clientId}}",
                            "client_secret": "{{.SecureJsonData.clientSecret}}",
                            "resource": "https://management.azure.com/"
                        }
                    },
                    "headers": [{ "name": "x-ms-app", "content": "Grafana" }]
                },
                {
                    "path": "stackdriver",
                    "url": "https://monitoring.googleapis.com",
                    "jwtTokenAuth": {
                        "scopes": ["https://www.googleapis.com/auth/monitoring.read"],
                        "params": { "token_uri": "{{.JsonData.tokenUri}}" }
                    }
                }
            ]
        }"#;

        let plugin: DataSourcePlugin = serde_json::from_str(manifest).unwrap();
        assert_eq!(plugin.routes.len(), 2);

        let first = &plugin.routes[0];
        assert_eq!(first.req_role, Some(OrgRole::Editor));
        assert_eq!(first.headers[0].name, "x-ms-app");
        let token_auth = first.token_auth.as_ref().unwrap();
        assert_eq!(token_auth.params.len(), 4);
        assert!(first.matches_method("get"));
        assert!(!first.matches_method("POST"));

        let second = &plugin.routes[1];
        assert!(second.req_role.is_none());
        assert!(second.matches_method("DELETE"));
        assert_eq!(second.jwt_token_auth.as_ref().unwrap().scopes.len(), 1);
    }
}
