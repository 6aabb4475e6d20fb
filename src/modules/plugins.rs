// Datasource plugin registry

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::models::datasource::CORE_TYPES;
use crate::models::DataSourcePlugin;

const MANIFEST_FILE: &str = "plugin.json";

/// Plugins by id. Loaded once at startup and read-only afterwards.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<DataSourcePlugin>>,
}

impl PluginRegistry {
    /// Route-less plugins for the core datasource types
    pub fn builtin() -> Self {
        let plugins = CORE_TYPES
            .iter()
            .map(|id| (id.to_string(), Arc::new(DataSourcePlugin::builtin(id))))
            .collect();
        Self { plugins }
    }

    /// Core plugins plus every `<dir>/*/plugin.json` datasource manifest.
    /// A manifest with a known id replaces the existing entry.
    pub fn load(dir: &Path) -> Self {
        let mut registry = Self::builtin();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Plugin directory {:?} not readable: {}", dir, e);
                return registry;
            }
        };

        for entry in entries.flatten() {
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }

            let plugin = match fs::read_to_string(&manifest_path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<DataSourcePlugin>(&content).map_err(|e| e.to_string())
                }) {
                Ok(plugin) => plugin,
                Err(e) => {
                    tracing::warn!("Skipping invalid plugin manifest {:?}: {}", manifest_path, e);
                    continue;
                }
            };

            if plugin.plugin_type != "datasource" {
                continue;
            }

            tracing::info!(
                "Loaded datasource plugin {} with {} route(s)",
                plugin.id,
                plugin.routes.len()
            );
            registry.register(plugin);
        }

        registry
    }

    pub fn register(&mut self, plugin: DataSourcePlugin) {
        self.plugins.insert(plugin.id.clone(), Arc::new(plugin));
    }

    pub fn get(&self, id: &str) -> Option<Arc<DataSourcePlugin>> {
        self.plugins.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plugin_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dsproxy-plugins-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_manifest(root: &Path, name: &str, content: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), content).unwrap();
    }

    #[test]
    fn test_builtin_covers_core_types() {
        let registry = PluginRegistry::builtin();
        assert_eq!(registry.len(), CORE_TYPES.len());
        assert!(registry.get("prometheus").unwrap().routes.is_empty());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_load_manifests() {
        let root = plugin_dir();
        write_manifest(
            &root,
            "azure",
            r#"{"type": "datasource", "id": "azure-monitor", "name": "Azure Monitor",
                "routes": [{"path": "azuremonitor", "url": "https://management.azure.com"}]}"#,
        );
        write_manifest(
            &root,
            "prom-override",
            r#"{"type": "datasource", "id": "prometheus",
                "routes": [{"path": "api/", "url": "http://prom"}]}"#,
        );
        write_manifest(&root, "panel", r#"{"type": "panel", "id": "graph"}"#);
        write_manifest(&root, "broken", "{ nope");

        let registry = PluginRegistry::load(&root);
        assert_eq!(registry.get("azure-monitor").unwrap().routes.len(), 1);
        assert_eq!(registry.get("prometheus").unwrap().routes.len(), 1);
        assert!(registry.get("graph").is_none());
        assert_eq!(registry.len(), CORE_TYPES.len() + 1);

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_missing_dir_keeps_builtins() {
        let registry = PluginRegistry::load(Path::new("/nonexistent/dsproxy/plugins"));
        assert_eq!(registry.len(), CORE_TYPES.len());
    }
}
