//! Discovery of locally installed apps.
//!
//! Each subdirectory of the apps directory holding an `app.json` manifest
//! tagged `bbs-app` is a candidate. Its main source file goes through the
//! same analysis/isolate/validation pipeline as remote code — local only
//! means "no network fetch", not "trusted".

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::sandbox::isolate::IsolateLimits;
use crate::sandbox::{load_source_app, AppManifest, LoadSpec, DEFAULT_MAIN_FILE, MANIFEST_FILE};
use crate::session::SessionService;
use crate::store::Store;

use super::contract::AppOrigin;
use super::registry::AppRegistry;

pub const BBS_APP_TAG: &str = "bbs-app";

/// Scan the apps directory and admit every tagged package. Per-package
/// failures are collected, not fatal.
pub async fn load_local_apps(
    apps_dir: &Path,
    limits: IsolateLimits,
    store: &Arc<Store>,
    sessions: &Arc<SessionService>,
    registry: &Arc<AppRegistry>,
) -> Vec<String> {
    let mut errors = Vec::new();

    if !apps_dir.exists() {
        debug!(dir = %apps_dir.display(), "no local apps directory");
        return errors;
    }

    let entries = match std::fs::read_dir(apps_dir) {
        Ok(entries) => entries,
        Err(e) => {
            let err = format!("failed to read apps directory {}: {e}", apps_dir.display());
            warn!("{err}");
            errors.push(err);
            return errors;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_one(&path, limits, store, sessions, registry).await {
            Ok(Some(id)) => info!(app = %id, dir = %path.display(), "local app loaded"),
            Ok(None) => {}
            Err(e) => {
                let err = format!("failed to load {}: {e:#}", path.display());
                warn!("{err}");
                errors.push(err);
            }
        }
    }

    errors
}

async fn load_one(
    dir: &Path,
    limits: IsolateLimits,
    store: &Arc<Store>,
    sessions: &Arc<SessionService>,
    registry: &Arc<AppRegistry>,
) -> anyhow::Result<Option<String>> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        debug!(dir = %dir.display(), "skipping directory without manifest");
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: AppManifest = serde_json::from_str(&raw)?;
    if !manifest.tags.iter().any(|t| t == BBS_APP_TAG) {
        debug!(dir = %dir.display(), "manifest lacks the {BBS_APP_TAG} tag, skipping");
        return Ok(None);
    }

    let main_file = manifest
        .main
        .clone()
        .unwrap_or_else(|| DEFAULT_MAIN_FILE.to_string());
    let source = std::fs::read_to_string(dir.join(&main_file))?;

    let allowed_modules = crate::sandbox::allowed_dependencies_of(&manifest);

    let loaded = load_source_app(LoadSpec {
        source,
        allowed_modules,
        limits,
        id_override: None,
        origin: AppOrigin::Local,
        source_url: None,
        store: store.clone(),
        sessions: sessions.clone(),
        registry: registry.clone(),
    })
    .await?;

    Ok(Some(loaded.meta.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_APP: &str = r#"
        local app = {
            id = "notes",
            name = "Notes",
            version = "0.1.0",
            description = "local scratch pad",
            author = "sysop",
        }
        function app.get_welcome_screen() return "NOTES" end
        function app.get_help(s) return "type anything" end
        function app.handle_command(screen, command, session)
            return { screen = screen or "home", response = "noted: " .. command, refresh = false }
        end
        return app
    "#;

    fn fixtures() -> (Arc<Store>, Arc<SessionService>, Arc<AppRegistry>) {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let sessions = Arc::new(SessionService::new(store.clone()));
        (store, sessions, Arc::new(AppRegistry::new()))
    }

    fn limits() -> IsolateLimits {
        IsolateLimits {
            memory_bytes: 16 * 1024 * 1024,
            wall: std::time::Duration::from_millis(500),
            cpu: std::time::Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn tagged_packages_are_loaded() {
        let (store, sessions, registry) = fixtures();
        let dir = tempfile::tempdir().unwrap();

        let app_dir = dir.path().join("notes");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("app.json"),
            r#"{"tags": ["bbs-app"], "main": "notes.lua"}"#,
        )
        .unwrap();
        std::fs::write(app_dir.join("notes.lua"), LOCAL_APP).unwrap();

        let errors = load_local_apps(dir.path(), limits(), &store, &sessions, &registry).await;
        assert!(errors.is_empty(), "{errors:?}");
        let loaded = registry.get("notes").unwrap();
        assert_eq!(loaded.meta.origin, AppOrigin::Local);
        assert_eq!(loaded.meta.name, "Notes");
    }

    #[tokio::test]
    async fn untagged_packages_are_skipped() {
        let (store, sessions, registry) = fixtures();
        let dir = tempfile::tempdir().unwrap();

        let app_dir = dir.path().join("other");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("app.json"), r#"{"tags": ["something-else"]}"#).unwrap();
        std::fs::write(app_dir.join("main.lua"), LOCAL_APP).unwrap();

        let errors = load_local_apps(dir.path(), limits(), &store, &sessions, &registry).await;
        assert!(errors.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn unsafe_local_source_is_rejected() {
        let (store, sessions, registry) = fixtures();
        let dir = tempfile::tempdir().unwrap();

        let app_dir = dir.path().join("sneaky");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("app.json"), r#"{"tags": ["bbs-app"]}"#).unwrap();
        std::fs::write(app_dir.join("main.lua"), "eval('1+1')").unwrap();

        let errors = load_local_apps(dir.path(), limits(), &store, &sessions, &registry).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("dangerous method: eval"));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn missing_directory_is_fine() {
        let (store, sessions, registry) = fixtures();
        let errors = load_local_apps(
            Path::new("/definitely/not/here"),
            limits(),
            &store,
            &sessions,
            &registry,
        )
        .await;
        assert!(errors.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
