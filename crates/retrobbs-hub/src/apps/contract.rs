//! The shape every BBS app satisfies, plus the admission checks applied
//! before an app enters the registry.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use retrobbs_shared::schemas::{CommandOutcome, SessionView};

use super::capabilities::CapabilityFacade;

pub const MAX_ID_LEN: usize = 50;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_VERSION_LEN: usize = 20;
pub const MAX_AUTHOR_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_SCREEN_TEXT_LEN: usize = 10_000;
pub const MAX_COMMAND_LEN: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppOrigin {
    Builtin,
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub origin: AppOrigin,
    /// Origin URL for remote apps; absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AppMeta {
    pub fn origin_label(&self) -> String {
        match (self.origin, &self.source) {
            (AppOrigin::Remote, Some(url)) => format!("remote:{url}"),
            (AppOrigin::Remote, None) => "remote".to_string(),
            (AppOrigin::Local, _) => "local".to_string(),
            (AppOrigin::Builtin, _) => "builtin".to_string(),
        }
    }
}

/// Contract every app satisfies, builtin or sandboxed. Handlers are sync;
/// the shell moves them to the blocking pool.
pub trait BbsApp: Send + Sync {
    fn meta(&self) -> &AppMeta;

    fn welcome_screen(&self) -> Result<String>;

    fn handle_command(
        &self,
        screen: Option<&str>,
        command: &str,
        session: &SessionView,
    ) -> Result<CommandOutcome>;

    fn help(&self, screen: Option<&str>) -> Result<String>;

    fn on_init(&self, _caps: &Arc<CapabilityFacade>) -> Result<()> {
        Ok(())
    }

    fn on_user_enter(&self, _user_id: &str, _session: &SessionView) -> Result<()> {
        Ok(())
    }

    fn on_user_exit(&self, _user_id: &str, _session: &SessionView) -> Result<()> {
        Ok(())
    }

    /// Periodic housekeeping hook (sandboxed apps run a GC cycle here).
    fn collect_garbage(&self) {}
}

pub fn valid_app_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Screen ids are restricted to `[A-Za-z0-9_-]`; everything else is dropped.
pub fn sanitize_screen_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_ID_LEN)
        .collect()
}

/// The throwaway session used for the admission probe.
pub fn probe_session() -> SessionView {
    SessionView::anonymous("sess_probe", "main")
}

/// Admission checks 1–4. Any failure rejects the candidate with the precise
/// reason; there is no partial admission.
pub fn validate_app(app: &dyn BbsApp) -> Result<(), String> {
    let meta = app.meta();

    if !valid_app_id(&meta.id) {
        return Err(format!("invalid app id {:?}", meta.id));
    }
    if meta.name.is_empty() || meta.name.len() > MAX_NAME_LEN {
        return Err(format!("app name out of bounds ({} bytes)", meta.name.len()));
    }
    if meta.version.len() > MAX_VERSION_LEN {
        return Err("app version out of bounds".to_string());
    }
    if meta.author.len() > MAX_AUTHOR_LEN {
        return Err("app author out of bounds".to_string());
    }
    if meta.description.len() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "app description out of bounds ({} bytes)",
            meta.description.len()
        ));
    }

    let welcome = app
        .welcome_screen()
        .map_err(|e| format!("get_welcome_screen failed: {e}"))?;
    if welcome.is_empty() || welcome.len() > MAX_SCREEN_TEXT_LEN {
        return Err(format!(
            "welcome screen out of bounds ({} bytes)",
            welcome.len()
        ));
    }

    let help = app
        .help(None)
        .map_err(|e| format!("get_help failed: {e}"))?;
    if help.len() > MAX_SCREEN_TEXT_LEN {
        return Err(format!("help text out of bounds ({} bytes)", help.len()));
    }

    let probe = app
        .handle_command(None, "HELP", &probe_session())
        .map_err(|e| format!("probe handle_command failed: {e}"))?;
    if probe.response.len() > MAX_SCREEN_TEXT_LEN {
        return Err(format!(
            "probe response out of bounds ({} bytes)",
            probe.response.len()
        ));
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::EchoApp;
    use super::*;

    #[test]
    fn echo_app_passes_validation() {
        let app = EchoApp::new("echo");
        assert!(validate_app(&app).is_ok());
    }

    #[test]
    fn bad_ids_are_rejected() {
        assert!(!valid_app_id(""));
        assert!(!valid_app_id("has space"));
        assert!(!valid_app_id(&"x".repeat(51)));
        assert!(valid_app_id("remote_owner_repo-1"));
    }

    #[test]
    fn oversized_description_is_rejected() {
        let mut app = EchoApp::new("echo");
        app.meta.description = "d".repeat(MAX_DESCRIPTION_LEN + 1);
        let err = validate_app(&app).unwrap_err();
        assert!(err.contains("description"));
    }

    #[test]
    fn screen_id_sanitization() {
        assert_eq!(sanitize_screen_id("ho me!"), "home");
        assert_eq!(sanitize_screen_id("../../etc"), "etc");
        assert_eq!(sanitize_screen_id("play-2"), "play-2");
    }
}
