//! The wrapper every sandboxed app call goes through.
//!
//! Inputs are sanitized, per-operation rate limits enforced, errors caught
//! and translated into well-formed command results, and outputs sanitized.
//! Errors never escape into the host's control flow.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use retrobbs_shared::schemas::{CommandOutcome, SessionView};
use retrobbs_shared::text;

use crate::apps::capabilities::CapabilityFacade;
use crate::apps::contract::{
    sanitize_screen_id, AppMeta, BbsApp, MAX_COMMAND_LEN, MAX_SCREEN_TEXT_LEN,
};
use crate::apps::rate_limit::{RateLimiter, RateOp};

use super::isolate::LuaIsolate;

const IN_APP_ERROR: &str = "This app hit an error handling your command. Type B to go back.";
const RATE_LIMITED: &str = "Rate limit exceeded, try later.";

pub struct GuardedLuaApp {
    meta: AppMeta,
    isolate: Arc<LuaIsolate>,
    limiter: Arc<RateLimiter>,
}

impl GuardedLuaApp {
    pub fn new(meta: AppMeta, isolate: Arc<LuaIsolate>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            meta,
            isolate,
            limiter,
        }
    }

    /// Hand timers the app scheduled during the last call to the runtime.
    /// Outside a runtime (unit tests, shutdown) they are discarded with their
    /// references released.
    fn schedule_timers(&self) {
        for timer in self.isolate.take_pending_timers() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let isolate = self.isolate.clone();
                    let delay = timer.delay;
                    handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tokio::task::spawn_blocking(move || isolate.run_timer(timer)).await;
                    });
                }
                Err(_) => {
                    warn!(app = %self.meta.id, "no runtime for app timer, discarding");
                    self.isolate.discard_timer(timer);
                }
            }
        }
    }

    fn clean_screen(raw: Option<String>) -> Option<String> {
        raw.map(|s| sanitize_screen_id(&s)).filter(|s| !s.is_empty())
    }
}

impl BbsApp for GuardedLuaApp {
    fn meta(&self) -> &AppMeta {
        &self.meta
    }

    fn welcome_screen(&self) -> Result<String> {
        let welcome = self.isolate.call_welcome()?;
        self.schedule_timers();
        Ok(text::clip(&welcome, MAX_SCREEN_TEXT_LEN))
    }

    fn handle_command(
        &self,
        screen: Option<&str>,
        command: &str,
        session: &SessionView,
    ) -> Result<CommandOutcome> {
        let screen = Self::clean_screen(screen.map(str::to_string));

        if !self.limiter.check(RateOp::CommandExecution) {
            return Ok(CommandOutcome {
                screen,
                response: RATE_LIMITED.to_string(),
                refresh: false,
                data: None,
            });
        }

        let command = text::clip(command, MAX_COMMAND_LEN);

        let outcome = self
            .isolate
            .call_handle(screen.as_deref(), &command, session);
        self.schedule_timers();

        match outcome {
            Ok(mut outcome) => {
                outcome.screen = Self::clean_screen(outcome.screen);
                outcome.response = text::clip(&outcome.response, MAX_SCREEN_TEXT_LEN);
                Ok(outcome)
            }
            Err(e) => {
                warn!(app = %self.meta.id, "app command failed: {e}");
                Ok(CommandOutcome {
                    screen,
                    response: IN_APP_ERROR.to_string(),
                    refresh: false,
                    data: None,
                })
            }
        }
    }

    fn help(&self, screen: Option<&str>) -> Result<String> {
        let screen = Self::clean_screen(screen.map(str::to_string));
        match self.isolate.call_help(screen.as_deref()) {
            Ok(help) => Ok(text::clip(&help, MAX_SCREEN_TEXT_LEN)),
            Err(e) => {
                warn!(app = %self.meta.id, "app help failed: {e}");
                Ok("No help available here. Type B to go back.".to_string())
            }
        }
    }

    fn on_init(&self, caps: &Arc<CapabilityFacade>) -> Result<()> {
        self.isolate.install_capabilities(caps)
    }

    fn on_user_enter(&self, user_id: &str, session: &SessionView) -> Result<()> {
        let result = self.isolate.call_user_hook("on_user_enter", user_id, session);
        self.schedule_timers();
        result
    }

    fn on_user_exit(&self, user_id: &str, session: &SessionView) -> Result<()> {
        let result = self.isolate.call_user_hook("on_user_exit", user_id, session);
        self.schedule_timers();
        result
    }

    fn collect_garbage(&self) {
        self.isolate.gc();
    }
}
