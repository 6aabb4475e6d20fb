// Route template interpolation
//
// Templates reference datasource configuration as `{{.JsonData.key}}` or
// `{{.SecureJsonData.key}}`. Unknown keys render as empty strings.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::DataSource;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.(JsonData|SecureJsonData)\.([A-Za-z0-9_\-]+)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Lookup tables available to route templates
#[derive(Debug, Clone, Copy)]
pub struct TemplateData<'a> {
    pub json_data: &'a Map<String, Value>,
    pub secure_json_data: &'a HashMap<String, String>,
}

impl<'a> TemplateData<'a> {
    pub fn new(json_data: &'a Map<String, Value>, secure_json_data: &'a HashMap<String, String>) -> Self {
        Self {
            json_data,
            secure_json_data,
        }
    }

    pub fn from_datasource(ds: &'a DataSource) -> Self {
        Self::new(&ds.json_data, &ds.secure_json_data)
    }

    fn lookup(&self, section: &str, key: &str) -> String {
        match section {
            "JsonData" => self
                .json_data
                .get(key)
                .map(render_json_value)
                .unwrap_or_default(),
            _ => self.secure_json_data.get(key).cloned().unwrap_or_default(),
        }
    }
}

fn render_json_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Expand every placeholder in `template`
pub fn interpolate_string(template: &str, data: &TemplateData<'_>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| data.lookup(&caps[1], &caps[2]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_secure_placeholder() {
        let json_data = Map::new();
        let secure = HashMap::from([("key".to_string(), "123".to_string())]);
        let data = TemplateData::new(&json_data, &secure);
        assert_eq!(
            interpolate_string("my secret {{.SecureJsonData.key}}", &data),
            "my secret 123"
        );
    }

    #[test]
    fn test_json_placeholders_and_whitespace() {
        let json_data = json_map(json!({
            "dynamicUrl": "https://dynamic.example.com",
            "tenantId": "mytenantId",
            "port": 9090,
            "tls": true
        }));
        let secure = HashMap::new();
        let data = TemplateData::new(&json_data, &secure);

        assert_eq!(
            interpolate_string("{{.JsonData.dynamicUrl}}", &data),
            "https://dynamic.example.com"
        );
        assert_eq!(
            interpolate_string("https://login.server.com/{{ .JsonData.tenantId }}/oauth2/token", &data),
            "https://login.server.com/mytenantId/oauth2/token"
        );
        assert_eq!(interpolate_string("{{.JsonData.port}}/{{.JsonData.tls}}", &data), "9090/true");
    }

    #[test]
    fn test_missing_keys_render_empty() {
        let json_data = json_map(json!({ "nested": { "a": 1 } }));
        let secure = HashMap::new();
        let data = TemplateData::new(&json_data, &secure);

        assert_eq!(interpolate_string("a{{.JsonData.absent}}b", &data), "ab");
        assert_eq!(interpolate_string("a{{.SecureJsonData.absent}}b", &data), "ab");
        assert_eq!(interpolate_string("{{.JsonData.nested}}", &data), "");
    }

    #[test]
    fn test_unknown_syntax_left_literal() {
        let json_data = Map::new();
        let secure = HashMap::new();
        let data = TemplateData::new(&json_data, &secure);
        assert_eq!(interpolate_string("{{.Other.key}} {{", &data), "{{.Other.key}} {{");
    }
}
