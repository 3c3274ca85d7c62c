use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use serde_json::{Map, Value};

use super::types::StoredSession;

/// Oldest entries are dropped once the history grows past this.
pub const MAX_COMMAND_HISTORY: usize = 100;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn parse_history(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn parse_data(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<StoredSession> {
    Ok(StoredSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        role: row.get("role")?,
        current_area: row.get("current_area")?,
        command_history: parse_history(row.get("command_history")?),
        data: parse_data(row.get("data")?),
        created_at: row.get("created_at")?,
        last_activity: row.get("last_activity")?,
        client_addr: row.get("client_addr")?,
        user_agent: row.get("user_agent")?,
    })
}

pub fn get_session(conn: &Connection, id: &str) -> Option<StoredSession> {
    conn.prepare("SELECT * FROM sessions WHERE id = ?1")
        .ok()?
        .query_row(rusqlite::params![id], row_to_session)
        .ok()
}

/// Create a session with the given id, or return the existing one unchanged.
pub fn create_session(
    conn: &Connection,
    id: &str,
    client_addr: Option<&str>,
    user_agent: Option<&str>,
) -> anyhow::Result<StoredSession> {
    if let Some(existing) = get_session(conn, id) {
        return Ok(existing);
    }

    let now = now_millis();
    conn.execute(
        "INSERT INTO sessions (
            id, user_id, username, role, current_area,
            command_history, data, created_at, last_activity,
            client_addr, user_agent
        ) VALUES (?1, NULL, NULL, NULL, 'main', '[]', '{}', ?2, ?3, ?4, ?5)",
        rusqlite::params![id, now, now, client_addr, user_agent],
    )?;

    get_session(conn, id).ok_or_else(|| anyhow::anyhow!("failed to create session"))
}

/// Bump `last_activity` on a read hit.
pub fn touch_session(conn: &Connection, id: &str) -> bool {
    let result = conn.execute(
        "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
        rusqlite::params![now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

pub fn set_current_area(conn: &Connection, id: &str, area: &str) -> bool {
    let result = conn.execute(
        "UPDATE sessions SET current_area = ?1, last_activity = ?2 WHERE id = ?3",
        rusqlite::params![area, now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

pub fn bind_user(conn: &Connection, id: &str, user_id: &str, username: &str, role: &str) -> bool {
    let result = conn.execute(
        "UPDATE sessions SET user_id = ?1, username = ?2, role = ?3, last_activity = ?4
         WHERE id = ?5",
        rusqlite::params![user_id, username, role, now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

pub fn clear_user(conn: &Connection, id: &str) -> bool {
    let result = conn.execute(
        "UPDATE sessions SET user_id = NULL, username = NULL, role = NULL, last_activity = ?1
         WHERE id = ?2",
        rusqlite::params![now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

/// Push a command onto the history, keeping only the newest
/// [`MAX_COMMAND_HISTORY`] entries.
pub fn append_history(conn: &Connection, id: &str, command: &str) -> bool {
    let Some(session) = get_session(conn, id) else {
        return false;
    };

    let mut history = session.command_history;
    history.push(command.to_string());
    if history.len() > MAX_COMMAND_HISTORY {
        let drop = history.len() - MAX_COMMAND_HISTORY;
        history.drain(..drop);
    }

    replace_history(conn, id, &history)
}

fn replace_history(conn: &Connection, id: &str, history: &[String]) -> bool {
    let tail: Vec<&String> = history
        .iter()
        .skip(history.len().saturating_sub(MAX_COMMAND_HISTORY))
        .collect();
    let encoded = serde_json::to_string(&tail).unwrap_or_else(|_| "[]".to_string());
    let result = conn.execute(
        "UPDATE sessions SET command_history = ?1, last_activity = ?2 WHERE id = ?3",
        rusqlite::params![encoded, now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

/// Merge into the session data bag field by field. Each top-level key of
/// `patch` (an app id) replaces that key only; other apps' scratch maps are
/// left alone.
pub fn merge_session_data(conn: &Connection, id: &str, patch: &Map<String, Value>) -> bool {
    let Some(session) = get_session(conn, id) else {
        return false;
    };

    let mut data = match session.data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        data.insert(key.clone(), value.clone());
    }

    let encoded = serde_json::to_string(&Value::Object(data)).unwrap_or_else(|_| "{}".to_string());
    let result = conn.execute(
        "UPDATE sessions SET data = ?1, last_activity = ?2 WHERE id = ?3",
        rusqlite::params![encoded, now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

pub fn delete_session(conn: &Connection, id: &str) -> bool {
    let result = conn.execute(
        "DELETE FROM sessions WHERE id = ?1",
        rusqlite::params![id],
    );
    matches!(result, Ok(n) if n > 0)
}

/// Delete sessions whose `last_activity` predates the cutoff.
pub fn reap_sessions(conn: &Connection, older_than_millis: i64) -> usize {
    conn.execute(
        "DELETE FROM sessions WHERE last_activity < ?1",
        rusqlite::params![older_than_millis],
    )
    .unwrap_or(0)
}

pub fn count_sessions(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
        .unwrap_or(0)
}
