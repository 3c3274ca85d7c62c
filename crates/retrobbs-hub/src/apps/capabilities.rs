//! The narrow, rate-limited API an app reaches host services through.
//!
//! One facade is constructed per app id. Storage keys are prefixed with
//! `app_<appId>_[<namespace>_]` so two apps can never collide inside shared
//! indexes, on top of the `app_id` column scoping.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use retrobbs_shared::schemas::PublicUser;
use retrobbs_shared::text;

use crate::session::SessionService;
use crate::store::{key_values, Store};

use super::rate_limit::{RateLimiter, RateOp};

const MAX_KEY_LEN: usize = 200;

pub struct CapabilityFacade {
    app_id: String,
    store: Arc<Store>,
    sessions: Arc<SessionService>,
    limiter: Arc<RateLimiter>,
}

impl CapabilityFacade {
    pub fn new(
        app_id: &str,
        store: Arc<Store>,
        sessions: Arc<SessionService>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            store,
            sessions,
            limiter,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    // ---------- storage ----------

    pub fn storage_get(&self, key: &str) -> Option<Value> {
        self.scoped_get(key, None, None)
    }

    pub fn storage_set(&self, key: &str, value: &Value) -> bool {
        self.scoped_set(key, None, None, value)
    }

    pub fn storage_delete(&self, key: &str) -> bool {
        self.scoped_delete(key, None, None)
    }

    pub fn user_storage_get(&self, user_id: &str, key: &str) -> Option<Value> {
        let user_id = sanitize_scope(user_id);
        self.scoped_get(key, Some(&user_id), None)
    }

    pub fn user_storage_set(&self, user_id: &str, key: &str, value: &Value) -> bool {
        let user_id = sanitize_scope(user_id);
        self.scoped_set(key, Some(&user_id), None, value)
    }

    pub fn user_storage_delete(&self, user_id: &str, key: &str) -> bool {
        let user_id = sanitize_scope(user_id);
        self.scoped_delete(key, Some(&user_id), None)
    }

    pub fn namespaced_get(&self, namespace: &str, key: &str) -> Option<Value> {
        let ns = sanitize_scope(namespace);
        self.scoped_get(key, None, Some(&ns))
    }

    pub fn namespaced_set(&self, namespace: &str, key: &str, value: &Value) -> bool {
        let ns = sanitize_scope(namespace);
        self.scoped_set(key, None, Some(&ns), value)
    }

    pub fn namespaced_delete(&self, namespace: &str, key: &str) -> bool {
        let ns = sanitize_scope(namespace);
        self.scoped_delete(key, None, Some(&ns))
    }

    fn scoped_get(&self, key: &str, user_id: Option<&str>, ns: Option<&str>) -> Option<Value> {
        if !self.limiter.check(RateOp::KvGet) {
            return None;
        }
        let key = self.prefixed_key(key, ns);
        let conn = self.store.conn();
        key_values::kv_get(&conn, &self.app_id, &key, user_id, ns).map(|row| row.value)
    }

    fn scoped_set(
        &self,
        key: &str,
        user_id: Option<&str>,
        ns: Option<&str>,
        value: &Value,
    ) -> bool {
        if !self.limiter.check(RateOp::KvSet) {
            return false;
        }
        if value_looks_like_code(value) {
            warn!(app = %self.app_id, key, "refused code-like value in storage");
            return false;
        }
        let key = self.prefixed_key(key, ns);
        let conn = self.store.conn();
        key_values::kv_upsert(&conn, &self.app_id, &key, user_id, ns, value, None).is_ok()
    }

    fn scoped_delete(&self, key: &str, user_id: Option<&str>, ns: Option<&str>) -> bool {
        if !self.limiter.check(RateOp::KvDelete) {
            return false;
        }
        let key = self.prefixed_key(key, ns);
        let conn = self.store.conn();
        key_values::kv_delete(&conn, &self.app_id, &key, user_id, ns)
    }

    fn prefixed_key(&self, key: &str, ns: Option<&str>) -> String {
        let key = sanitize_key(key);
        let prefixed = match ns {
            Some(ns) => format!("app_{}_{}_{}", self.app_id, ns, key),
            None => format!("app_{}_{}", self.app_id, key),
        };
        text::clip(&prefixed, MAX_KEY_LEN)
    }

    // ---------- users ----------

    /// Public view of the user bound to the given session, rate-limited.
    pub fn current_user(&self, session_key: &str) -> Option<PublicUser> {
        if !self.limiter.check(RateOp::CurrentUser) {
            return None;
        }
        self.sessions.current_user(session_key)
    }

    // ---------- utils ----------

    pub fn format_date(&self, millis: i64) -> String {
        text::format_date(millis)
    }

    pub fn ascii_boxed_title(&self, title: &str) -> String {
        text::ascii_boxed_title(title)
    }

    pub fn separator(&self, ch: char, width: usize) -> String {
        text::separator(ch, width)
    }
}

fn sanitize_scope(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        .take(MAX_KEY_LEN)
        .collect()
}

/// Heuristic refusal of values that smell like code. Function-typed values
/// never reach this point — the sandbox boundary converts to plain JSON and
/// fails on anything callable.
fn value_looks_like_code(value: &Value) -> bool {
    match value {
        Value::String(s) => string_looks_like_code(s),
        Value::Array(items) => items.iter().any(value_looks_like_code),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| string_looks_like_code(k) || value_looks_like_code(v)),
        _ => false,
    }
}

fn string_looks_like_code(s: &str) -> bool {
    s.contains("function") || s.contains("=>") || s.contains("eval") || s.contains("new Function")
}
