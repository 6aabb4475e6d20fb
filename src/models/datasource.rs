use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DS_GRAPHITE: &str = "graphite";
pub const DS_INFLUXDB: &str = "influxdb";
pub const DS_INFLUXDB_08: &str = "influxdb_08";
pub const DS_ES: &str = "elasticsearch";
pub const DS_PROMETHEUS: &str = "prometheus";
pub const DS_OPENTSDB: &str = "opentsdb";
pub const DS_CLOUDWATCH: &str = "cloudwatch";
pub const DS_STACKDRIVER: &str = "stackdriver";
pub const DS_MYSQL: &str = "mysql";
pub const DS_POSTGRES: &str = "postgres";
pub const DS_MSSQL: &str = "mssql";
pub const DS_LOKI: &str = "loki";
pub const DS_TESTDATA: &str = "testdata";

/// Core datasource types that ship without a plugin manifest
pub const CORE_TYPES: &[&str] = &[
    DS_GRAPHITE,
    DS_INFLUXDB,
    DS_INFLUXDB_08,
    DS_ES,
    DS_PROMETHEUS,
    DS_OPENTSDB,
    DS_CLOUDWATCH,
    DS_STACKDRIVER,
    DS_MYSQL,
    DS_POSTGRES,
    DS_MSSQL,
    DS_LOKI,
    DS_TESTDATA,
];

/// Credential strategy of a datasource.
///
/// Resolved once when the record is loaded; the director only dispatches
/// on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Direct,
    /// `u`/`p` query parameters (InfluxDB 0.8)
    PasswordAsQuery { user: String, password: String },
    /// Basic auth header built from the datasource user (InfluxDB)
    PasswordAsHeader { user: String, password: String },
    /// Basic auth header built from the basic-auth credentials
    BasicAuthHeader { user: String, password: String },
    /// An `Authorization` value stored as a custom header secret
    CustomHeaderSecret,
    /// Forward the signed-in user's own OAuth token
    OAuthPassThrough,
}

/// A configured backend. `secure_json_data` holds decrypted values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default)]
    pub basic_auth_user: String,
    #[serde(default)]
    pub basic_auth_password: String,
    #[serde(default)]
    pub json_data: Map<String, Value>,
    #[serde(default)]
    pub secure_json_data: HashMap<String, String>,
    #[serde(skip)]
    pub auth: AuthMode,
}

impl DataSource {
    pub fn new(ds_type: &str, url: &str) -> Self {
        Self {
            ds_type: ds_type.to_string(),
            url: url.to_string(),
            version: 1,
            ..Default::default()
        }
    }

    /// Password from secure storage, falling back to the legacy column
    pub fn decrypted_password(&self) -> String {
        self.secure_json_data
            .get("password")
            .cloned()
            .unwrap_or_else(|| self.password.clone())
    }

    pub fn decrypted_basic_auth_password(&self) -> String {
        self.secure_json_data
            .get("basicAuthPassword")
            .cloned()
            .unwrap_or_else(|| self.basic_auth_password.clone())
    }

    pub fn json_str(&self, key: &str) -> Option<&str> {
        self.json_data.get(key).and_then(|v| v.as_str())
    }

    pub fn json_bool(&self, key: &str) -> bool {
        self.json_data
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn json_string_array(&self, key: &str) -> Vec<String> {
        self.json_data
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Headers declared as `httpHeaderName<N>` with the value in
    /// `httpHeaderValue<N>`, numbered from 1 without gaps.
    pub fn custom_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        let mut index = 1;
        while let Some(name) = self.json_str(&format!("httpHeaderName{}", index)) {
            let value = self
                .secure_json_data
                .get(&format!("httpHeaderValue{}", index))
                .cloned()
                .unwrap_or_default();
            if !name.is_empty() {
                headers.push((name.to_string(), value));
            }
            index += 1;
        }
        headers
    }

    /// Pick the credential strategy from type and flags
    pub fn resolve_auth(&mut self) {
        self.auth = if self.json_bool("oauthPassThru") {
            AuthMode::OAuthPassThrough
        } else if self.basic_auth {
            AuthMode::BasicAuthHeader {
                user: self.basic_auth_user.clone(),
                password: self.decrypted_basic_auth_password(),
            }
        } else if self.ds_type == DS_INFLUXDB_08 {
            AuthMode::PasswordAsQuery {
                user: self.user.clone(),
                password: self.decrypted_password(),
            }
        } else if self.ds_type == DS_INFLUXDB {
            AuthMode::PasswordAsHeader {
                user: self.user.clone(),
                password: self.decrypted_password(),
            }
        } else if self
            .custom_headers()
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        {
            AuthMode::CustomHeaderSecret
        } else {
            AuthMode::Direct
        };
    }

    pub fn resolved(mut self) -> Self {
        self.resolve_auth();
        self
    }
}

/// Datasource as returned by the admin API. Secrets are reduced to flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDto {
    pub id: i64,
    pub org_id: i64,
    pub version: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: String,
    pub url: String,
    pub database: String,
    pub user: String,
    pub basic_auth: bool,
    pub basic_auth_user: String,
    pub json_data: Map<String, Value>,
    pub secure_json_fields: HashMap<String, bool>,
}

impl From<&DataSource> for DataSourceDto {
    fn from(ds: &DataSource) -> Self {
        Self {
            id: ds.id,
            org_id: ds.org_id,
            version: ds.version,
            name: ds.name.clone(),
            ds_type: ds.ds_type.clone(),
            url: ds.url.clone(),
            database: ds.database.clone(),
            user: ds.user.clone(),
            basic_auth: ds.basic_auth,
            basic_auth_user: ds.basic_auth_user.clone(),
            json_data: ds.json_data.clone(),
            secure_json_fields: ds
                .secure_json_data
                .keys()
                .map(|k| (k.clone(), true))
                .collect(),
        }
    }
}

/// Create/update payload of the admin API
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceCommand {
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default)]
    pub basic_auth_user: String,
    #[serde(default)]
    pub basic_auth_password: String,
    #[serde(default)]
    pub json_data: Map<String, Value>,
    #[serde(default)]
    pub secure_json_data: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_json(ds_type: &str, data: Value) -> DataSource {
        let mut ds = DataSource::new(ds_type, "http://localhost:9090");
        ds.json_data = data.as_object().cloned().unwrap_or_default();
        ds
    }

    #[test]
    fn test_secure_password_wins_over_legacy() {
        let mut ds = DataSource::new(DS_INFLUXDB, "http://influx:8086");
        ds.password = "legacy".into();
        assert_eq!(ds.decrypted_password(), "legacy");
        ds.secure_json_data
            .insert("password".into(), "secret".into());
        assert_eq!(ds.decrypted_password(), "secret");
    }

    #[test]
    fn test_custom_headers_stop_at_first_gap() {
        let mut ds = with_json(
            DS_PROMETHEUS,
            json!({
                "httpHeaderName1": "Authorization",
                "httpHeaderName2": "X-Scope-OrgID",
                "httpHeaderName4": "X-Ignored"
            }),
        );
        ds.secure_json_data
            .insert("httpHeaderValue1".into(), "Bearer xf5yhfkpsnmgo".into());
        ds.secure_json_data
            .insert("httpHeaderValue2".into(), "tenant-a".into());

        let headers = ds.custom_headers();
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_string(), "Bearer xf5yhfkpsnmgo".to_string()),
                ("X-Scope-OrgID".to_string(), "tenant-a".to_string()),
            ]
        );
    }

    #[test]
    fn test_auth_mode_resolution() {
        let ds = DataSource::new(DS_INFLUXDB_08, "http://influx:8083").resolved();
        assert!(matches!(ds.auth, AuthMode::PasswordAsQuery { .. }));

        let ds = DataSource::new(DS_INFLUXDB, "http://influx:8086").resolved();
        assert!(matches!(ds.auth, AuthMode::PasswordAsHeader { .. }));

        let mut ds = DataSource::new(DS_INFLUXDB, "http://influx:8086");
        ds.basic_auth = true;
        ds.basic_auth_user = "user".into();
        let ds = ds.resolved();
        assert_eq!(
            ds.auth,
            AuthMode::BasicAuthHeader {
                user: "user".into(),
                password: String::new()
            }
        );

        let ds = with_json("custom", json!({ "oauthPassThru": true })).resolved();
        assert_eq!(ds.auth, AuthMode::OAuthPassThrough);

        let ds = with_json(DS_PROMETHEUS, json!({ "httpHeaderName1": "authorization" })).resolved();
        assert_eq!(ds.auth, AuthMode::CustomHeaderSecret);

        let ds = DataSource::new(DS_GRAPHITE, "http://graphite:8080").resolved();
        assert_eq!(ds.auth, AuthMode::Direct);
    }

    #[test]
    fn test_dto_hides_secret_values() {
        let mut ds = DataSource::new(DS_PROMETHEUS, "http://prometheus:9090");
        ds.secure_json_data.insert("token".into(), "hunter2".into());
        let dto = DataSourceDto::from(&ds);
        let body = serde_json::to_string(&dto).unwrap();
        assert!(!body.contains("hunter2"));
        assert_eq!(dto.secure_json_fields.get("token"), Some(&true));
    }
}
