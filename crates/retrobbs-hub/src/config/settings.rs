use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub cors_origins: Option<Vec<String>>,
    pub remote_app_hosts: Option<Vec<String>>,
    pub session_ttl_days: Option<i64>,
}

pub fn settings_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

/// Read settings from file. Returns defaults if the file doesn't exist;
/// errs if it exists but cannot be parsed (to avoid silent data loss).
pub fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(settings)
}
