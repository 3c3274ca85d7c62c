//! The bundled bulletin wall: a minimal app that exercises the capability
//! facade end to end.

use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use retrobbs_shared::schemas::{CommandOutcome, SessionView};
use retrobbs_shared::text;

use crate::apps::capabilities::CapabilityFacade;
use crate::apps::contract::{AppMeta, AppOrigin, BbsApp};

const MAX_POSTS: usize = 50;
const MAX_POST_LEN: usize = 280;

pub struct BulletinApp {
    meta: AppMeta,
    caps: OnceLock<Arc<CapabilityFacade>>,
}

impl BulletinApp {
    pub fn new() -> Self {
        Self {
            meta: AppMeta {
                id: "bulletin".to_string(),
                name: "Bulletin Wall".to_string(),
                version: "1.0.0".to_string(),
                description: "Public wall of short notes from fellow callers".to_string(),
                author: "sysop".to_string(),
                origin: AppOrigin::Builtin,
                source: None,
            },
            caps: OnceLock::new(),
        }
    }

    fn caps(&self) -> Result<&Arc<CapabilityFacade>> {
        self.caps
            .get()
            .ok_or_else(|| anyhow!("bulletin app is not initialized"))
    }

    fn posts(&self) -> Result<Vec<Value>> {
        Ok(self
            .caps()?
            .storage_get("posts")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default())
    }

    fn render_wall(&self, posts: &[Value]) -> String {
        let mut out = text::ascii_boxed_title("BULLETIN WALL");
        out.push('\n');
        if posts.is_empty() {
            out.push_str("\nThe wall is empty. Be the first: POST <your note>\n");
        } else {
            for post in posts.iter().rev() {
                let author = post["author"].as_str().unwrap_or("anonymous");
                let body = post["text"].as_str().unwrap_or("");
                let at = post["at"].as_i64().unwrap_or(0);
                out.push_str(&format!(
                    "\n<{author}> {body}\n    {}\n",
                    text::format_date(at)
                ));
            }
        }
        out.push('\n');
        out.push_str(&text::separator('-', 40));
        out.push_str("\nCommands: LIST, POST <text>, HELP, B to go back\n");
        out
    }
}

impl Default for BulletinApp {
    fn default() -> Self {
        Self::new()
    }
}

impl BbsApp for BulletinApp {
    fn meta(&self) -> &AppMeta {
        &self.meta
    }

    fn welcome_screen(&self) -> Result<String> {
        let posts = self.posts().unwrap_or_default();
        Ok(self.render_wall(&posts))
    }

    fn handle_command(
        &self,
        screen: Option<&str>,
        command: &str,
        session: &SessionView,
    ) -> Result<CommandOutcome> {
        let screen = screen.unwrap_or("home");
        let trimmed = command.trim();
        let upper = trimmed.to_uppercase();

        if upper == "LIST" || upper.is_empty() {
            return Ok(CommandOutcome::stay(screen, self.render_wall(&self.posts()?)));
        }

        if upper == "HELP" {
            return Ok(CommandOutcome::stay(screen, self.help(Some(screen))?));
        }

        if let Some(body) = trimmed.strip_prefix("POST ").or_else(|| trimmed.strip_prefix("post ")) {
            let Some(username) = session.username.as_deref() else {
                return Ok(CommandOutcome::stay(
                    screen,
                    "You need to log in before posting to the wall.",
                ));
            };
            let body = text::clip(body.trim(), MAX_POST_LEN);
            if body.is_empty() {
                return Ok(CommandOutcome::stay(screen, "Nothing to post."));
            }

            let mut posts = self.posts()?;
            posts.push(json!({
                "author": username,
                "text": body,
                "at": crate::apps::now_millis(),
            }));
            if posts.len() > MAX_POSTS {
                let drop = posts.len() - MAX_POSTS;
                posts.drain(..drop);
            }

            if !self.caps()?.storage_set("posts", &Value::Array(posts.clone())) {
                return Ok(CommandOutcome::stay(
                    screen,
                    "The wall refused your note. Try again later.",
                ));
            }
            return Ok(CommandOutcome::stay(screen, self.render_wall(&posts)));
        }

        Ok(CommandOutcome::stay(
            screen,
            "Unknown wall command. LIST shows the wall, POST <text> pins a note.",
        ))
    }

    fn help(&self, _screen: Option<&str>) -> Result<String> {
        Ok([
            "BULLETIN WALL HELP",
            "  LIST         show the wall",
            "  POST <text>  pin a note (login required)",
            "  B            back to the main menu",
        ]
        .join("\n"))
    }

    fn on_init(&self, caps: &Arc<CapabilityFacade>) -> Result<()> {
        let _ = self.caps.set(caps.clone());
        Ok(())
    }
}
