pub mod settings;

use anyhow::Result;
use std::path::PathBuf;

pub const DEFAULT_REMOTE_HOSTS: &[&str] = &["github.com", "raw.githubusercontent.com"];
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct Configuration {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub apps_dir: PathBuf,
    pub settings_file: PathBuf,
    pub listen_host: String,
    pub listen_port: u16,
    pub cors_origins: Vec<String>,
    pub remote_app_hosts: Vec<String>,
    pub session_ttl_days: i64,
}

impl Configuration {
    /// Resolution order: environment > settings file > default.
    pub fn create() -> Result<Self> {
        // Resolve data directory: RETROBBS_HOME env or ~/.retrobbs
        let data_dir = if let Ok(home) = std::env::var("RETROBBS_HOME") {
            PathBuf::from(home)
        } else {
            let home = dirs_next::home_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
            home.join(".retrobbs")
        };
        std::fs::create_dir_all(&data_dir)?;

        // Resolve database path: DB_PATH env or {data_dir}/retrobbs.db
        let db_path = if let Ok(p) = std::env::var("DB_PATH") {
            PathBuf::from(p)
        } else {
            data_dir.join("retrobbs.db")
        };

        let settings_file = settings::settings_file_path(&data_dir);
        let ss = settings::read_settings(&settings_file)?;

        let listen_host = std::env::var("HOST")
            .ok()
            .or(ss.listen_host)
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let listen_port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(ss.listen_port)
            .unwrap_or(2323);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .or(ss.cors_origins)
            .unwrap_or_else(|| vec!["*".to_string()]);

        let remote_app_hosts = std::env::var("REMOTE_APP_HOSTS")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .or(ss.remote_app_hosts)
            .unwrap_or_else(|| {
                DEFAULT_REMOTE_HOSTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let session_ttl_days = std::env::var("SESSION_TTL_DAYS")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(ss.session_ttl_days)
            .unwrap_or(DEFAULT_SESSION_TTL_DAYS);

        Ok(Configuration {
            apps_dir: data_dir.join("apps"),
            data_dir,
            db_path,
            settings_file,
            listen_host,
            listen_port,
            cors_origins,
            remote_app_hosts,
            session_ttl_days,
        })
    }
}
