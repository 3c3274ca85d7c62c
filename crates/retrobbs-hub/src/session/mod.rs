//! The session service: sole writer of session records, plus the per-session
//! locks that keep command processing strictly serial per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{json, Map, Value};

use retrobbs_shared::schemas::SessionView;

use crate::store::types::StoredSession;
use crate::store::{sessions, users, Store};

pub struct SessionService {
    store: Arc<Store>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn generate_key() -> String {
        format!("sess_{}", uuid::Uuid::new_v4())
    }

    /// Lock guarding one session key. Two commands on the same key are
    /// serialized by holding this across the whole dispatch; different keys
    /// proceed in parallel.
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Use the supplied key verbatim, otherwise generate a fresh one. An
    /// existing session is returned unchanged.
    pub fn create(
        &self,
        existing_key: Option<&str>,
        client_addr: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<StoredSession> {
        let key = match existing_key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => Self::generate_key(),
        };
        let conn = self.store.conn();
        sessions::create_session(&conn, &key, client_addr, user_agent)
    }

    /// Read a session, bumping its activity stamp on hit.
    pub fn get(&self, key: &str) -> Option<StoredSession> {
        let conn = self.store.conn();
        let session = sessions::get_session(&conn, key)?;
        sessions::touch_session(&conn, key);
        Some(session)
    }

    /// Read without touching `last_activity` (existence probes, debug).
    pub fn peek(&self, key: &str) -> Option<StoredSession> {
        sessions::get_session(&self.store.conn(), key)
    }

    pub fn bind_user(&self, key: &str, user_id: &str, username: &str, role: &str) -> bool {
        sessions::bind_user(&self.store.conn(), key, user_id, username, role)
    }

    pub fn clear_user(&self, key: &str) -> bool {
        sessions::clear_user(&self.store.conn(), key)
    }

    pub fn append_history(&self, key: &str, command: &str) -> bool {
        sessions::append_history(&self.store.conn(), key, command)
    }

    /// Merge the data bag field by field rather than replacing it.
    pub fn merge_data(&self, key: &str, patch: &Map<String, Value>) -> bool {
        sessions::merge_session_data(&self.store.conn(), key, patch)
    }

    pub fn set_current_area(&self, key: &str, area: &str) -> bool {
        sessions::set_current_area(&self.store.conn(), key, area)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.locks.lock().unwrap().remove(key);
        sessions::delete_session(&self.store.conn(), key)
    }

    /// Debug dump of one session for the DEBUG verb.
    pub fn check(&self, key: &str) -> Value {
        match self.peek(key) {
            Some(s) => json!({
                "exists": true,
                "id": s.id,
                "currentArea": s.current_area,
                "historyLength": s.command_history.len(),
                "userId": s.user_id,
                "username": s.username,
                "createdAt": s.created_at,
                "lastActivity": s.last_activity,
            }),
            None => json!({ "exists": false }),
        }
    }

    /// Delete sessions idle for longer than `ttl_days`; returns the count.
    pub fn reap(&self, ttl_days: i64) -> usize {
        let cutoff = sessions_now() - ttl_days * 24 * 60 * 60 * 1000;
        let reaped = sessions::reap_sessions(&self.store.conn(), cutoff);
        if reaped > 0 {
            // Drop serialization locks for keys that can no longer be used.
            self.locks.lock().unwrap().clear();
        }
        reaped
    }

    /// The defensive read-only projection handed to app `app_id`: only that
    /// app's scratch map rides along in `data`.
    pub fn view_for_app(&self, session: &StoredSession, app_id: &str) -> SessionView {
        let scratch = session
            .data
            .get(app_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        SessionView {
            id: session.id.clone(),
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            role: session.role.clone(),
            current_area: session.current_area.clone(),
            data: scratch,
        }
    }

    /// Public view of the user bound to this session, if any.
    pub fn current_user(&self, session_key: &str) -> Option<retrobbs_shared::schemas::PublicUser> {
        let session = self.peek(session_key)?;
        let user_id = session.user_id?;
        let conn = self.store.conn();
        users::find_by_id(&conn, &user_id).map(|u| crate::identity::public_view(&u))
    }
}

fn sessions_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SessionService {
        SessionService::new(Arc::new(Store::new_in_memory().unwrap()))
    }

    #[test]
    fn create_uses_supplied_key_verbatim() {
        let svc = service();
        let s = svc.create(Some("sess_custom"), None, None).unwrap();
        assert_eq!(s.id, "sess_custom");

        // Re-creating returns the same record
        let again = svc.create(Some("sess_custom"), None, None).unwrap();
        assert_eq!(again.created_at, s.created_at);
    }

    #[test]
    fn create_generates_distinct_keys() {
        let svc = service();
        let a = svc.create(None, None, None).unwrap();
        let b = svc.create(None, None, None).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("sess_"));
    }

    #[test]
    fn get_bumps_last_activity() {
        let svc = service();
        let s = svc.create(Some("sess_t"), None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        svc.get("sess_t").unwrap();
        let after = svc.peek("sess_t").unwrap();
        assert!(after.last_activity >= s.last_activity);
    }

    #[test]
    fn set_area_then_get_roundtrips() {
        let svc = service();
        svc.create(Some("sess_a"), None, None).unwrap();
        assert!(svc.set_current_area("sess_a", "hangman:play"));
        assert_eq!(svc.get("sess_a").unwrap().current_area, "hangman:play");
    }

    #[test]
    fn view_scopes_data_to_one_app() {
        let svc = service();
        svc.create(Some("sess_v"), None, None).unwrap();
        let patch = serde_json::json!({
            "hangman": {"word": "crab"},
            "bulletin": {"draft": "x"}
        });
        svc.merge_data("sess_v", patch.as_object().unwrap());

        let session = svc.peek("sess_v").unwrap();
        let view = svc.view_for_app(&session, "hangman");
        assert_eq!(view.data["word"], "crab");
        assert!(view.data.get("draft").is_none());
        assert!(view.data.get("bulletin").is_none());
    }

    #[test]
    fn check_reports_absent_sessions() {
        let svc = service();
        assert_eq!(svc.check("nope")["exists"], serde_json::json!(false));
    }

    #[test]
    fn delete_removes_session_and_lock() {
        let svc = service();
        svc.create(Some("sess_x"), None, None).unwrap();
        assert!(svc.delete("sess_x"));
        assert!(svc.peek("sess_x").is_none());
        assert!(!svc.delete("sess_x"));
    }
}
