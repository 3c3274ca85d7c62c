//! The top-level command dispatcher: a per-session state machine over the
//! areas `main` and `<appId>:<screenId>`.

pub mod screens;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Map;
use tracing::{debug, warn};

use retrobbs_shared::schemas::SessionView;

use crate::apps::registry::{AppRegistry, LoadedApp};
use crate::sandbox::isolate::DEFAULT_WALL_BUDGET_MS;
use crate::sandbox::RemoteLoader;
use crate::session::SessionService;
use crate::store::types::StoredSession;
use crate::store::{sessions as session_store, users, Store};

const APP_CALL_SLACK_MS: u64 = 1_000;

/// A session's conversational location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Area {
    Main,
    App { app_id: String, screen: String },
}

/// Tolerant of absent or null-ish values; both mean `main`. An app id with
/// no screen lands on its `home` screen.
pub fn parse_area(raw: Option<&str>) -> Area {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("main") || raw.eq_ignore_ascii_case("null") {
        return Area::Main;
    }
    match raw.split_once(':') {
        Some((app_id, screen)) if !app_id.is_empty() => Area::App {
            app_id: app_id.to_string(),
            screen: if screen.is_empty() {
                "home".to_string()
            } else {
                screen.to_string()
            },
        },
        _ => Area::App {
            app_id: raw.to_string(),
            screen: "home".to_string(),
        },
    }
}

pub fn render_area(area: &Area) -> String {
    match area {
        Area::Main => "main".to_string(),
        Area::App { app_id, screen } => format!("{app_id}:{screen}"),
    }
}

#[derive(Debug, Clone)]
pub struct ShellReply {
    pub area: String,
    pub response: String,
    pub refresh: bool,
    pub screen: Option<String>,
    /// Set only when an admin verb failed; the endpoint maps it to a
    /// `success:false` envelope.
    pub error: Option<String>,
}

impl ShellReply {
    fn in_area(area: &Area, response: String, refresh: bool) -> Self {
        Self {
            area: render_area(area),
            response,
            refresh,
            screen: match area {
                Area::Main => None,
                Area::App { screen, .. } => Some(screen.clone()),
            },
            error: None,
        }
    }
}

pub struct Shell {
    store: Arc<Store>,
    sessions: Arc<SessionService>,
    registry: Arc<AppRegistry>,
    loader: Arc<RemoteLoader>,
}

impl Shell {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionService>,
        registry: Arc<AppRegistry>,
        loader: Arc<RemoteLoader>,
    ) -> Self {
        Self {
            store,
            sessions,
            registry,
            loader,
        }
    }

    /// Process one command line for one session, serially per session key.
    pub async fn dispatch(&self, session_key: &str, raw_command: &str) -> Result<ShellReply> {
        let lock = self.sessions.lock_for(session_key);
        let _serial = lock.lock().await;

        let session = self.sessions.create(Some(session_key), None, None)?;
        let raw = raw_command.trim().to_string();
        let cmd = raw.to_uppercase();
        let area = parse_area(Some(&session.current_area));

        debug!(session = session_key, area = %render_area(&area), command = %cmd, "dispatch");

        let reply = self.route(&session, &area, &raw, &cmd).await;

        if !raw.is_empty() {
            self.sessions.append_history(session_key, &raw);
        }
        if let Ok(reply) = &reply {
            if reply.area != session.current_area {
                self.sessions.set_current_area(session_key, &reply.area);
            }
        }
        reply
    }

    async fn route(
        &self,
        session: &StoredSession,
        area: &Area,
        raw: &str,
        cmd: &str,
    ) -> Result<ShellReply> {
        // Universal verbs take precedence in every state.
        match cmd {
            "HELP" => return self.help_reply(area).await,
            "MAIN" | "MENU" => return Ok(self.goto_main(session, area).await),
            "EXIT" | "QUIT" | "X" | "LOGOFF" => {
                return Ok(ShellReply::in_area(
                    area,
                    screens::logoff_text(session.username.as_deref()),
                    true,
                ));
            }
            "DEBUG" => return Ok(self.debug_reply(session, area)),
            _ => {}
        }

        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if let Some(reply) = self.admin_verb(session, area, &tokens).await {
            return Ok(reply);
        }

        match area {
            Area::Main => self.dispatch_main(session, cmd).await,
            Area::App { app_id, screen } => {
                self.dispatch_app(session, area, app_id, screen, raw, cmd)
                    .await
            }
        }
    }

    async fn dispatch_main(&self, session: &StoredSession, cmd: &str) -> Result<ShellReply> {
        if let Ok(selection) = cmd.parse::<usize>() {
            if let Some(app) = self.registry.nth(selection) {
                return self.enter_app(session, app).await;
            }
        }
        Ok(ShellReply::in_area(
            &Area::Main,
            screens::unknown_command(self.registry.len()),
            false,
        ))
    }

    async fn enter_app(&self, session: &StoredSession, app: Arc<LoadedApp>) -> Result<ShellReply> {
        let handler = app.handler.clone();
        let welcome = match self.run_app(move || handler.welcome_screen()).await {
            Ok(welcome) => welcome,
            Err(e) => {
                warn!(app = %app.meta.id, "welcome screen failed: {e}");
                format!("{} is not answering. Type B to go back.", app.meta.name)
            }
        };

        if let Some(user_id) = session.user_id.clone() {
            let view = self.sessions.view_for_app(session, &app.meta.id);
            let handler = app.handler.clone();
            if let Err(e) = self
                .run_app(move || handler.on_user_enter(&user_id, &view))
                .await
            {
                warn!(app = %app.meta.id, "on_user_enter failed: {e}");
            }
        }

        let area = Area::App {
            app_id: app.meta.id.clone(),
            screen: "home".to_string(),
        };
        Ok(ShellReply::in_area(&area, welcome, true))
    }

    async fn dispatch_app(
        &self,
        session: &StoredSession,
        area: &Area,
        app_id: &str,
        screen: &str,
        raw: &str,
        cmd: &str,
    ) -> Result<ShellReply> {
        let Some(app) = self.registry.get(app_id) else {
            // The app vanished mid-session (uninstall); fall back to main.
            return Ok(ShellReply::in_area(
                &Area::Main,
                format!(
                    "That app is no longer installed.\n\n{}",
                    self.main_menu(session)
                ),
                true,
            ));
        };

        if cmd == "B" || cmd == "BACK" {
            return Ok(self.goto_main(session, area).await);
        }

        let view = self.sessions.view_for_app(session, app_id);
        let handler = app.handler.clone();
        let screen_owned = screen.to_string();
        let raw_owned = raw.to_string();
        let outcome = self
            .run_app(move || handler.handle_command(Some(&screen_owned), &raw_owned, &view))
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(app = %app_id, "handle_command failed at the shell boundary: {e}");
                return Ok(ShellReply::in_area(
                    area,
                    "This app hit an error handling your command. Type B to go back.".to_string(),
                    false,
                ));
            }
        };

        if let Some(data) = &outcome.data {
            let mut patch = Map::new();
            patch.insert(app_id.to_string(), data.clone());
            self.sessions.merge_data(&session.id, &patch);
        }

        match outcome.screen.as_deref() {
            None => {
                self.fire_user_exit(session, &app).await;
                let menu = self.main_menu(session);
                let response = if outcome.response.is_empty() {
                    menu
                } else {
                    format!("{}\n\n{menu}", outcome.response)
                };
                Ok(ShellReply::in_area(&Area::Main, response, true))
            }
            Some(next) if next == screen => {
                Ok(ShellReply::in_area(area, outcome.response, outcome.refresh))
            }
            Some(next) => {
                let area = Area::App {
                    app_id: app_id.to_string(),
                    screen: next.to_string(),
                };
                Ok(ShellReply::in_area(&area, outcome.response, outcome.refresh))
            }
        }
    }

    async fn help_reply(&self, area: &Area) -> Result<ShellReply> {
        match area {
            Area::Main => Ok(ShellReply::in_area(
                area,
                screens::shell_help(None),
                false,
            )),
            Area::App { app_id, screen } => {
                let help = match self.registry.get(app_id) {
                    Some(app) => {
                        let handler = app.handler.clone();
                        let screen = screen.clone();
                        self.run_app(move || handler.help(Some(&screen)))
                            .await
                            .unwrap_or_else(|_| screens::shell_help(Some(app_id)))
                    }
                    None => screens::shell_help(Some(app_id)),
                };
                Ok(ShellReply::in_area(area, help, false))
            }
        }
    }

    async fn goto_main(&self, session: &StoredSession, area: &Area) -> ShellReply {
        if let Area::App { app_id, .. } = area {
            if let Some(app) = self.registry.get(app_id) {
                self.fire_user_exit(session, &app).await;
            }
        }
        ShellReply::in_area(&Area::Main, self.main_menu(session), true)
    }

    async fn fire_user_exit(&self, session: &StoredSession, app: &Arc<LoadedApp>) {
        let Some(user_id) = session.user_id.clone() else {
            return;
        };
        let view = self.sessions.view_for_app(session, &app.meta.id);
        let handler = app.handler.clone();
        let app_id = app.meta.id.clone();
        if let Err(e) = self
            .run_app(move || handler.on_user_exit(&user_id, &view))
            .await
        {
            warn!(app = %app_id, "on_user_exit failed: {e}");
        }
    }

    fn main_menu(&self, session: &StoredSession) -> String {
        screens::main_menu(&self.registry.list_all(), session.username.as_deref())
    }

    fn debug_reply(&self, session: &StoredSession, area: &Area) -> ShellReply {
        let conn = self.store.conn();
        let session_count = session_store::count_sessions(&conn);
        let user_count = users::count_users(&conn);
        drop(conn);

        let dump = screens::debug_dump(
            &self.registry.list_all(),
            &self.sessions.check(&session.id),
            session_count,
            user_count,
        );
        ShellReply::in_area(area, dump, false)
    }

    /// INSTALL / UNINSTALL / LIST — sysop verbs driving the loaders.
    async fn admin_verb(
        &self,
        session: &StoredSession,
        area: &Area,
        tokens: &[&str],
    ) -> Option<ShellReply> {
        let verb = tokens.first()?.to_uppercase();
        if !matches!(verb.as_str(), "INSTALL" | "UNINSTALL" | "LIST" | "REFRESH") {
            return None;
        }
        let host = tokens.get(1)?.to_uppercase();
        if !matches!(host.as_str(), "GITHUB" | "REMOTE") {
            return None;
        }

        if session.role.as_deref() != Some("admin") {
            return Some(ShellReply::in_area(
                area,
                "That command requires sysop privileges.".to_string(),
                false,
            ));
        }

        match (verb.as_str(), tokens.get(2)) {
            ("LIST", Some(&"APPS")) | ("LIST", Some(&"apps")) => {
                let urls = self.registry.list_remote_urls();
                let mut out = format!("{} remote app(s) installed.\n", urls.len());
                for url in urls {
                    let id = self
                        .registry
                        .find_by_source(&url)
                        .map(|app| app.meta.id.clone())
                        .unwrap_or_else(|| "?".to_string());
                    out.push_str(&format!("  {id}  <-  {url}\n"));
                }
                Some(ShellReply::in_area(area, out, false))
            }
            ("INSTALL", Some(url)) => match self.loader.install(url).await {
                Ok(app) => Some(ShellReply::in_area(
                    area,
                    format!(
                        "Installed {} v{} - {}",
                        app.meta.id, app.meta.version, app.meta.name
                    ),
                    false,
                )),
                Err(e) => Some(self.admin_error(area, format!("install failed: {e:#}"))),
            },
            ("REFRESH", Some(&"APPS")) | ("REFRESH", Some(&"apps")) => {
                let results = self.loader.refresh_all().await;
                let mut out = String::new();
                for (url, outcome) in &results {
                    match outcome {
                        Ok(app) => out.push_str(&format!("refreshed {}  <-  {url}\n", app.meta.id)),
                        Err(e) => out.push_str(&format!("failed {url}: {e:#}\n")),
                    }
                }
                if results.is_empty() {
                    out.push_str("No remote apps to refresh.\n");
                }
                Some(ShellReply::in_area(area, out, false))
            }
            ("UNINSTALL", Some(url)) => match self.loader.uninstall(url) {
                Some(app) => Some(ShellReply::in_area(
                    area,
                    format!("Uninstalled {}.", app.meta.id),
                    false,
                )),
                None => Some(self.admin_error(
                    area,
                    format!("uninstall failed: no app installed from {url}"),
                )),
            },
            _ => Some(self.admin_error(
                area,
                format!("usage: {verb} GITHUB <url>  |  LIST GITHUB APPS"),
            )),
        }
    }

    fn admin_error(&self, area: &Area, message: String) -> ShellReply {
        let mut reply = ShellReply::in_area(area, message.clone(), false);
        reply.error = Some(message);
        reply
    }

    /// Run an app callable on the blocking pool with a hard upper timeout.
    /// The in-isolate budget hook is the real cancellation; this is the
    /// shell's backstop.
    async fn run_app<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let backstop = Duration::from_millis(DEFAULT_WALL_BUDGET_MS + APP_CALL_SLACK_MS);
        match tokio::time::timeout(backstop, tokio::task::spawn_blocking(f)).await {
            Err(_) => Err(anyhow!("app call timed out")),
            Ok(Err(join)) => Err(anyhow!("app call aborted: {join}")),
            Ok(Ok(result)) => result,
        }
    }
}
