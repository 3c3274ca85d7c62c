//! The isolate: one restricted Lua interpreter per sandboxed app.
//!
//! The interpreter gets a hard memory ceiling and an instruction-count hook
//! that aborts execution once the per-call budget is spent. Its global scope
//! holds only what the host injects: `console`, `json`, `set_timeout`, an
//! allow-list `require`, and (after admission) the `bbs` capability table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use mlua::{
    Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, RegistryKey, StdLib, Table,
    Value as LuaValue,
};
use serde_json::Value;
use tracing::{debug, warn};

use retrobbs_shared::schemas::{CommandOutcome, SessionView};

use crate::apps::capabilities::CapabilityFacade;

use super::modules;

pub const DEFAULT_MEMORY_LIMIT: usize = 128 * 1024 * 1024;
pub const DEFAULT_WALL_BUDGET_MS: u64 = 5_000;
pub const DEFAULT_CPU_BUDGET_MS: u64 = 3_000;

const TIMER_MIN_MS: u64 = 100;
const TIMER_MAX_MS: u64 = 30_000;
const MAX_ACTIVE_TIMERS: usize = 10;
const HOOK_INSTRUCTION_INTERVAL: u32 = 4096;

/// Globals present in the base library that the sandbox must not expose.
const REMOVED_GLOBALS: &[&str] = &[
    "load",
    "loadstring",
    "loadfile",
    "dofile",
    "collectgarbage",
    "setmetatable",
    "getmetatable",
    "rawset",
    "rawget",
    "rawequal",
    "rawlen",
];

#[derive(Debug, Clone, Copy)]
pub struct IsolateLimits {
    pub memory_bytes: usize,
    pub wall: Duration,
    pub cpu: Duration,
}

impl Default for IsolateLimits {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_LIMIT,
            wall: Duration::from_millis(DEFAULT_WALL_BUDGET_MS),
            cpu: Duration::from_millis(DEFAULT_CPU_BUDGET_MS),
        }
    }
}

impl IsolateLimits {
    /// Per-call deadline: CPU budget, never past the wall clock allowance.
    fn call_budget(&self) -> Duration {
        self.cpu.min(self.wall)
    }
}

/// A timer the app scheduled; the host decides when (and whether) to run it.
#[derive(Debug)]
pub struct PendingTimer {
    pub key: RegistryKey,
    pub delay: Duration,
}

#[derive(Default, Debug)]
struct TimerSet {
    active: AtomicUsize,
    pending: Mutex<Vec<PendingTimer>>,
}

/// Fields the app script declares about itself.
#[derive(Debug, Clone)]
pub struct RawAppMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

#[derive(Debug)]
pub struct LuaIsolate {
    app_tag: String,
    lua: Mutex<Lua>,
    app_key: RegistryKey,
    limits: IsolateLimits,
    timers: Arc<TimerSet>,
}

impl LuaIsolate {
    /// Compile and run `source` inside a fresh restricted interpreter. The
    /// chunk must return the app table.
    pub fn load(
        app_tag: &str,
        source: &str,
        limits: IsolateLimits,
        allowed_modules: &[String],
    ) -> Result<Self> {
        let timers = Arc::new(TimerSet::default());
        let lua = build_lua(app_tag, limits, timers.clone(), allowed_modules)
            .context("failed to build isolate")?;

        let app_key = {
            let deadline = Instant::now() + limits.call_budget();
            install_budget_hook(&lua, deadline);
            let exports = lua
                .load(source)
                .set_name(app_tag)
                .eval::<LuaValue>();
            lua.remove_hook();

            let exports = exports.map_err(|e| anyhow!("app script failed: {e}"))?;
            let LuaValue::Table(table) = exports else {
                bail!("app script must return its app table");
            };
            lua.create_registry_value(table)
                .context("failed to pin app table")?
        };

        debug!(app = app_tag, "isolate loaded");
        Ok(Self {
            app_tag: app_tag.to_string(),
            lua: Mutex::new(lua),
            app_key,
            limits,
            timers,
        })
    }

    /// Read the app's self-declared metadata and confirm the callable shape.
    pub fn extract_meta(&self) -> Result<RawAppMeta> {
        let lua = self.lua.lock().unwrap();
        let app: Table = lua.registry_value(&self.app_key)?;

        let meta = RawAppMeta {
            id: required_string(&app, "id")?,
            name: required_string(&app, "name")?,
            version: required_string(&app, "version")?,
            description: required_string(&app, "description")?,
            author: required_string(&app, "author")?,
        };

        for name in ["get_welcome_screen", "handle_command", "get_help"] {
            let value: LuaValue = app.get(name)?;
            if !matches!(value, LuaValue::Function(_)) {
                bail!("app is missing function `{name}`");
            }
        }

        Ok(meta)
    }

    pub fn call_welcome(&self) -> Result<String> {
        let lua = self.lua.lock().unwrap();
        let app: Table = lua.registry_value(&self.app_key)?;
        let f: Function = app.get("get_welcome_screen")?;
        self.with_budget(&lua, || f.call::<_, String>(()))
            .map_err(|e| anyhow!("get_welcome_screen failed: {e}"))
    }

    pub fn call_help(&self, screen: Option<&str>) -> Result<String> {
        let lua = self.lua.lock().unwrap();
        let app: Table = lua.registry_value(&self.app_key)?;
        let f: Function = app.get("get_help")?;
        let screen = screen.map(str::to_string);
        self.with_budget(&lua, || f.call::<_, String>((screen,)))
            .map_err(|e| anyhow!("get_help failed: {e}"))
    }

    pub fn call_handle(
        &self,
        screen: Option<&str>,
        command: &str,
        session: &SessionView,
    ) -> Result<CommandOutcome> {
        let lua = self.lua.lock().unwrap();
        let app: Table = lua.registry_value(&self.app_key)?;
        let f: Function = app.get("handle_command")?;

        let screen = screen.map(str::to_string);
        let session_value = lua
            .to_value(session)
            .context("failed to project session into isolate")?;

        let result: LuaValue = self
            .with_budget(&lua, || {
                f.call((screen, command.to_string(), session_value))
            })
            .map_err(|e| anyhow!("handle_command failed: {e}"))?;

        let json: Value = lua
            .from_value(result)
            .map_err(|e| anyhow!("malformed command result: {e}"))?;
        serde_json::from_value(json).map_err(|e| anyhow!("malformed command result: {e}"))
    }

    /// Inject the `bbs` capability table and run the app's optional
    /// `on_init`.
    pub fn install_capabilities(&self, caps: &Arc<CapabilityFacade>) -> Result<()> {
        let lua = self.lua.lock().unwrap();
        let bbs = build_capability_table(&lua, caps).context("failed to build capability table")?;
        lua.globals().set("bbs", bbs.clone())?;

        let app: Table = lua.registry_value(&self.app_key)?;
        let hook: Option<Function> = app.get("on_init")?;
        if let Some(f) = hook {
            self.with_budget(&lua, || f.call::<_, ()>(bbs))
                .map_err(|e| anyhow!("on_init failed: {e}"))?;
        }
        Ok(())
    }

    /// Run an optional `on_user_enter` / `on_user_exit` hook.
    pub fn call_user_hook(&self, name: &str, user_id: &str, session: &SessionView) -> Result<()> {
        let lua = self.lua.lock().unwrap();
        let app: Table = lua.registry_value(&self.app_key)?;
        let hook: Option<Function> = app.get(name)?;
        let Some(f) = hook else {
            return Ok(());
        };
        let session_value = lua.to_value(session)?;
        self.with_budget(&lua, || {
            f.call::<_, ()>((user_id.to_string(), session_value))
        })
        .map_err(|e| anyhow!("{name} failed: {e}"))
    }

    /// Timers scheduled during the last call, handed to the host runtime.
    pub fn take_pending_timers(&self) -> Vec<PendingTimer> {
        std::mem::take(&mut *self.timers.pending.lock().unwrap())
    }

    /// Fire one scheduled timer callback under the usual budget, then release
    /// its reference.
    pub fn run_timer(&self, timer: PendingTimer) {
        let lua = self.lua.lock().unwrap();
        let outcome = match lua.registry_value::<Function>(&timer.key) {
            Ok(f) => self.with_budget(&lua, || f.call::<_, ()>(())),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(app = %self.app_tag, "timer callback failed: {e}");
        }
        let _ = lua.remove_registry_value(timer.key);
        self.timers.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drop a timer without running it (no runtime available).
    pub fn discard_timer(&self, timer: PendingTimer) {
        let lua = self.lua.lock().unwrap();
        let _ = lua.remove_registry_value(timer.key);
        self.timers.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Periodic housekeeping: collect garbage and expire dropped registry
    /// references.
    pub fn gc(&self) {
        let lua = self.lua.lock().unwrap();
        let _ = lua.gc_collect();
        lua.expire_registry_values();
    }

    fn with_budget<R>(&self, lua: &Lua, f: impl FnOnce() -> mlua::Result<R>) -> mlua::Result<R> {
        let deadline = Instant::now() + self.limits.call_budget();
        install_budget_hook(lua, deadline);
        let outcome = f();
        lua.remove_hook();
        outcome
    }
}

fn install_budget_hook(lua: &Lua, deadline: Instant) {
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() > deadline {
                Err(mlua::Error::RuntimeError(
                    "execution budget exceeded".to_string(),
                ))
            } else {
                Ok(())
            }
        },
    );
}

fn required_string(app: &Table, field: &str) -> Result<String> {
    let value: Option<String> = app
        .get(field)
        .map_err(|_| anyhow!("app field `{field}` must be a string"))?;
    value.ok_or_else(|| anyhow!("app is missing string field `{field}`"))
}

fn build_lua(
    app_tag: &str,
    limits: IsolateLimits,
    timers: Arc<TimerSet>,
    allowed_modules: &[String],
) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(limits.memory_bytes)?;

    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(*name, LuaValue::Nil)?;
    }

    // console.* — prefixed with the app id, lands in the host log
    let console = lua.create_table()?;
    for (level, name) in [("info", "log"), ("warn", "warn"), ("error", "error")] {
        let tag = app_tag.to_string();
        let level = level.to_string();
        console.set(
            name,
            lua.create_function(move |_, args: MultiValue| {
                let line = args
                    .iter()
                    .map(lua_display)
                    .collect::<Vec<_>>()
                    .join(" ");
                match level.as_str() {
                    "warn" => warn!(app = %tag, "{line}"),
                    "error" => tracing::error!(app = %tag, "{line}"),
                    _ => tracing::info!(app = %tag, "{line}"),
                }
                Ok(())
            })?,
        )?;
    }
    globals.set("console", console.clone())?;
    // print aliases console.log
    globals.set("print", console.get::<_, Function>("log")?)?;

    // json.encode / json.decode
    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let json: Value = lua
                .from_value(value)
                .map_err(|e| mlua::Error::RuntimeError(format!("json.encode: {e}")))?;
            serde_json::to_string(&json)
                .map_err(|e| mlua::Error::RuntimeError(format!("json.encode: {e}")))
        })?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, raw: String| {
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| mlua::Error::RuntimeError(format!("json.decode: {e}")))?;
            lua.to_value(&value)
        })?,
    )?;
    globals.set("json", json)?;

    // set_timeout(delay_ms, fn) — clamped, capped, released on completion
    let timer_set = timers.clone();
    globals.set(
        "set_timeout",
        lua.create_function(move |lua, (delay_ms, callback): (u64, Function)| {
            if timer_set.active.load(Ordering::SeqCst) >= MAX_ACTIVE_TIMERS {
                return Err(mlua::Error::RuntimeError(format!(
                    "timer limit reached ({MAX_ACTIVE_TIMERS})"
                )));
            }
            let delay = delay_ms.clamp(TIMER_MIN_MS, TIMER_MAX_MS);
            let key = lua.create_registry_value(callback)?;
            timer_set.active.fetch_add(1, Ordering::SeqCst);
            timer_set.pending.lock().unwrap().push(PendingTimer {
                key,
                delay: Duration::from_millis(delay),
            });
            Ok(())
        })?,
    )?;

    // require restricted to the host's allow-listed stand-ins
    let allowed: Vec<String> = allowed_modules.to_vec();
    globals.set(
        "require",
        lua.create_function(move |lua, name: String| {
            if allowed.iter().any(|m| m == &name) {
                if let Some(module) = modules::build_module(lua, &name)? {
                    return Ok(module);
                }
            }
            Err(mlua::Error::RuntimeError(format!(
                "module '{name}' is not available in the sandbox"
            )))
        })?,
    )?;

    drop(globals);
    drop(console);
    Ok(lua)
}

fn build_capability_table<'a>(lua: &'a Lua, caps: &Arc<CapabilityFacade>) -> mlua::Result<Table<'a>> {
    let bbs = lua.create_table()?;

    bbs.set("storage", storage_table(lua, caps.clone(), None)?)?;

    let facade = caps.clone();
    bbs.set(
        "user_storage",
        lua.create_function(move |lua, user_id: String| {
            storage_table(lua, facade.clone(), Some(Scope::User(user_id)))
        })?,
    )?;

    let facade = caps.clone();
    bbs.set(
        "namespaced_storage",
        lua.create_function(move |lua, namespace: String| {
            storage_table(lua, facade.clone(), Some(Scope::Namespace(namespace)))
        })?,
    )?;

    let facade = caps.clone();
    bbs.set(
        "current_user",
        lua.create_function(move |lua, session_id: String| {
            match facade.current_user(&session_id) {
                Some(user) => lua.to_value(&user),
                None => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    let utils = lua.create_table()?;
    let facade = caps.clone();
    utils.set(
        "format_date",
        lua.create_function(move |_, millis: i64| Ok(facade.format_date(millis)))?,
    )?;
    let facade = caps.clone();
    utils.set(
        "ascii_boxed_title",
        lua.create_function(move |_, title: String| Ok(facade.ascii_boxed_title(&title)))?,
    )?;
    let facade = caps.clone();
    utils.set(
        "separator",
        lua.create_function(move |_, (ch, width): (String, usize)| {
            Ok(facade.separator(ch.chars().next().unwrap_or('-'), width))
        })?,
    )?;
    bbs.set("utils", utils)?;

    Ok(bbs)
}

#[derive(Clone)]
enum Scope {
    User(String),
    Namespace(String),
}

fn storage_table(
    lua: &Lua,
    caps: Arc<CapabilityFacade>,
    scope: Option<Scope>,
) -> mlua::Result<Table<'_>> {
    let table = lua.create_table()?;

    let facade = caps.clone();
    let get_scope = scope.clone();
    table.set(
        "get",
        lua.create_function(move |lua, key: String| {
            let value = match &get_scope {
                None => facade.storage_get(&key),
                Some(Scope::User(user)) => facade.user_storage_get(user, &key),
                Some(Scope::Namespace(ns)) => facade.namespaced_get(ns, &key),
            };
            match value {
                Some(v) => lua.to_value(&v),
                None => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    let facade = caps.clone();
    let set_scope = scope.clone();
    table.set(
        "set",
        lua.create_function(move |lua, (key, value): (String, LuaValue)| {
            // Function-typed values cannot cross into storage.
            let Ok(json) = lua.from_value::<Value>(value) else {
                return Ok(false);
            };
            let ok = match &set_scope {
                None => facade.storage_set(&key, &json),
                Some(Scope::User(user)) => facade.user_storage_set(user, &key, &json),
                Some(Scope::Namespace(ns)) => facade.namespaced_set(ns, &key, &json),
            };
            Ok(ok)
        })?,
    )?;

    let facade = caps;
    table.set(
        "delete",
        lua.create_function(move |_, key: String| {
            let ok = match &scope {
                None => facade.storage_delete(&key),
                Some(Scope::User(user)) => facade.user_storage_delete(user, &key),
                Some(Scope::Namespace(ns)) => facade.namespaced_delete(ns, &key),
            };
            Ok(ok)
        })?,
    )?;

    Ok(table)
}

fn lua_display(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().into_owned(),
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO_APP: &str = r#"
        local app = {
            id = "demo",
            name = "Demo App",
            version = "1.2.3",
            description = "exercises the isolate",
            author = "sysop",
        }

        function app.get_welcome_screen()
            return "WELCOME TO DEMO"
        end

        function app.handle_command(screen, command, session)
            if command == "WHO" then
                return { screen = screen, response = "you are " .. (session.username or "guest"), refresh = false }
            end
            if command == "SPIN" then
                while true do end
            end
            if command == "STASH" then
                return { screen = screen, response = "noted", refresh = false, data = { last = command } }
            end
            return { screen = "home", response = "demo: " .. command, refresh = false }
        end

        function app.get_help(screen)
            return "demo help for " .. (screen or "top")
        end

        return app
    "#;

    fn tight_limits() -> IsolateLimits {
        IsolateLimits {
            memory_bytes: 16 * 1024 * 1024,
            wall: Duration::from_millis(250),
            cpu: Duration::from_millis(250),
        }
    }

    fn load_demo() -> LuaIsolate {
        LuaIsolate::load("demo", DEMO_APP, tight_limits(), &allowed()).unwrap()
    }

    fn allowed() -> Vec<String> {
        modules::ALLOWED_MODULES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn loads_and_extracts_meta() {
        let isolate = load_demo();
        let meta = isolate.extract_meta().unwrap();
        assert_eq!(meta.id, "demo");
        assert_eq!(meta.version, "1.2.3");
        assert_eq!(isolate.call_welcome().unwrap(), "WELCOME TO DEMO");
        assert_eq!(isolate.call_help(Some("play")).unwrap(), "demo help for play");
        assert_eq!(isolate.call_help(None).unwrap(), "demo help for top");
    }

    #[test]
    fn handle_command_roundtrips_session_and_data() {
        let isolate = load_demo();
        let mut view = SessionView::anonymous("sess_1", "demo:home");
        view.username = Some("ada".to_string());

        let outcome = isolate
            .call_handle(Some("home"), "WHO", &view)
            .unwrap();
        assert_eq!(outcome.response, "you are ada");
        assert_eq!(outcome.screen.as_deref(), Some("home"));
        assert!(!outcome.refresh);

        let outcome = isolate
            .call_handle(Some("home"), "STASH", &view)
            .unwrap();
        assert_eq!(outcome.data.unwrap()["last"], "STASH");
    }

    #[test]
    fn runaway_loop_hits_budget() {
        let isolate = load_demo();
        let view = SessionView::anonymous("sess_1", "demo:home");
        let started = Instant::now();
        let err = isolate
            .call_handle(Some("home"), "SPIN", &view)
            .unwrap_err();
        assert!(err.to_string().contains("budget"), "{err}");
        // The hook fires close to the configured budget, far under a second.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn script_not_returning_table_is_rejected() {
        let err = LuaIsolate::load("bad", "return 42", tight_limits(), &allowed()).unwrap_err();
        assert!(err.to_string().contains("app table"), "{err}");
    }

    #[test]
    fn missing_fields_are_reported() {
        let source = r#"
            return {
                id = "x", name = "X", version = "1", description = "d", author = "a",
                get_welcome_screen = function() return "w" end,
                get_help = function() return "h" end,
            }
        "#;
        let isolate = LuaIsolate::load("x", source, tight_limits(), &allowed()).unwrap();
        let err = isolate.extract_meta().unwrap_err();
        assert!(err.to_string().contains("handle_command"), "{err}");
    }

    #[test]
    fn dangerous_globals_are_absent() {
        let checks = r#"
            local app = { id="g", name="G", version="1", description="d", author="a" }
            function app.get_welcome_screen() return "w" end
            function app.get_help(s) return "h" end
            function app.handle_command(screen, command, session)
                local missing = {}
                for _, name in ipairs({"os", "io", "load", "dofile", "setmetatable", "package", "debug"}) do
                    if _G[name] ~= nil then
                        missing[#missing + 1] = name
                    end
                end
                return { screen = screen, response = table.concat(missing, ","), refresh = false }
            end
            return app
        "#;
        let isolate = LuaIsolate::load("g", checks, tight_limits(), &allowed()).unwrap();
        let view = SessionView::anonymous("sess_1", "g:home");
        let outcome = isolate.call_handle(Some("home"), "X", &view).unwrap();
        assert_eq!(outcome.response, "", "leaked globals: {}", outcome.response);
    }

    #[test]
    fn json_and_require_are_injected() {
        let source = r#"
            local toolkit = require("toolkit")
            local app = { id="j", name="J", version="1", description="d", author="a" }
            function app.get_welcome_screen() return "w" end
            function app.get_help(s) return "h" end
            function app.handle_command(screen, command, session)
                local decoded = json.decode('{"n": 2}')
                local merged = toolkit.merge({a = 1}, {b = decoded.n})
                return { screen = screen, response = json.encode(merged), refresh = false }
            end
            return app
        "#;
        let isolate = LuaIsolate::load("j", source, tight_limits(), &allowed()).unwrap();
        let view = SessionView::anonymous("sess_1", "j:home");
        let outcome = isolate.call_handle(Some("home"), "X", &view).unwrap();
        assert!(outcome.response.contains("\"b\":2"), "{}", outcome.response);
    }

    #[test]
    fn require_outside_allow_list_raises() {
        let source = r#"
            local app = { id="r", name="R", version="1", description="d", author="a" }
            function app.get_welcome_screen() return "w" end
            function app.get_help(s) return "h" end
            function app.handle_command(screen, command, session)
                local ok, err = pcall(function() return require("socket") end)
                return { screen = screen, response = ok and "leaked" or "blocked", refresh = false }
            end
            return app
        "#;
        let isolate = LuaIsolate::load("r", source, tight_limits(), &allowed()).unwrap();
        let view = SessionView::anonymous("sess_1", "r:home");
        let outcome = isolate.call_handle(Some("home"), "X", &view).unwrap();
        assert_eq!(outcome.response, "blocked");
    }

    #[test]
    fn timers_are_clamped_and_capped() {
        let source = r#"
            local app = { id="t", name="T", version="1", description="d", author="a" }
            function app.get_welcome_screen() return "w" end
            function app.get_help(s) return "h" end
            function app.handle_command(screen, command, session)
                local scheduled = 0
                for i = 1, 12 do
                    local ok = pcall(function() set_timeout(1, function() end) end)
                    if ok then scheduled = scheduled + 1 end
                end
                return { screen = screen, response = tostring(scheduled), refresh = false }
            end
            return app
        "#;
        let isolate = LuaIsolate::load("t", source, tight_limits(), &allowed()).unwrap();
        let view = SessionView::anonymous("sess_1", "t:home");
        let outcome = isolate.call_handle(Some("home"), "X", &view).unwrap();
        assert_eq!(outcome.response, "10");

        let pending = isolate.take_pending_timers();
        assert_eq!(pending.len(), 10);
        // Clamped up to the 100ms floor
        assert!(pending.iter().all(|t| t.delay >= Duration::from_millis(100)));
        for timer in pending {
            isolate.discard_timer(timer);
        }
        // Capacity is released once discarded
        assert!(isolate.take_pending_timers().is_empty());
    }
}
