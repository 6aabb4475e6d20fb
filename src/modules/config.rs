use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;

const DATA_DIR: &str = ".datasource_proxy";
const DATA_DIR_ENV: &str = "DSPROXY_DATA_DIR";
const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "datasource_proxy.db";
const PLUGINS_DIR: &str = "plugins";

/// Get data directory path, `$DSPROXY_DATA_DIR` or `~/.datasource_proxy`
pub fn get_data_dir() -> AppResult<PathBuf> {
    let data_dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or_else(|| AppError::Config("Failed to get user home directory".to_string()))?
            .join(DATA_DIR),
    };

    // Ensure directory exists
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

/// Load application config
pub fn load_app_config() -> AppResult<AppConfig> {
    load_app_config_from(&get_data_dir()?)
}

/// First run writes the defaults so the operator has a file to edit
pub fn load_app_config_from(data_dir: &Path) -> AppResult<AppConfig> {
    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = AppConfig::new();
        save_app_config_to(data_dir, &config)?;
        tracing::info!("Default config written to {:?}", config_path);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
}

/// Save application config
pub fn save_app_config_to(data_dir: &Path, config: &AppConfig) -> AppResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(data_dir.join(CONFIG_FILE), content)?;
    Ok(())
}

pub fn database_path(config: &AppConfig, data_dir: &Path) -> PathBuf {
    config
        .database_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
}

pub fn plugins_dir(config: &AppConfig, data_dir: &Path) -> PathBuf {
    config
        .plugins_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(PLUGINS_DIR))
}
