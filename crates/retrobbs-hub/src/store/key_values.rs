//! Per-app persistent key/value storage.
//!
//! The compound key is `(app_id, key, user_id, namespace)`. Absent user and
//! namespace scopes are stored as the empty string: SQLite never considers
//! two NULLs equal inside a UNIQUE index, so the normalized form is what
//! makes the upsert well-defined.

use rusqlite::Connection;
use serde_json::Value;

use super::sessions::now_millis;
use super::types::StoredKeyValue;

fn norm(scope: Option<&str>) -> &str {
    scope.unwrap_or("")
}

fn denorm(scope: String) -> Option<String> {
    if scope.is_empty() {
        None
    } else {
        Some(scope)
    }
}

fn row_to_kv(row: &rusqlite::Row) -> rusqlite::Result<StoredKeyValue> {
    let raw_value: String = row.get("value")?;
    Ok(StoredKeyValue {
        id: row.get("id")?,
        app_id: row.get("app_id")?,
        key: row.get("key")?,
        user_id: denorm(row.get("user_id")?),
        namespace: denorm(row.get("namespace")?),
        value: serde_json::from_str(&raw_value).unwrap_or(Value::Null),
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Fetch one row; expired rows are treated as absent.
pub fn kv_get(
    conn: &Connection,
    app_id: &str,
    key: &str,
    user_id: Option<&str>,
    namespace: Option<&str>,
) -> Option<StoredKeyValue> {
    conn.prepare(
        "SELECT * FROM key_values
         WHERE app_id = ?1 AND key = ?2 AND user_id = ?3 AND namespace = ?4
           AND (expires_at IS NULL OR expires_at > ?5)",
    )
    .ok()?
    .query_row(
        rusqlite::params![app_id, key, norm(user_id), norm(namespace), now_millis()],
        row_to_kv,
    )
    .ok()
}

pub fn kv_upsert(
    conn: &Connection,
    app_id: &str,
    key: &str,
    user_id: Option<&str>,
    namespace: Option<&str>,
    value: &Value,
    expires_at: Option<i64>,
) -> anyhow::Result<StoredKeyValue> {
    let now = now_millis();
    let encoded = serde_json::to_string(value)?;

    conn.execute(
        "INSERT INTO key_values (app_id, key, user_id, namespace, value, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(app_id, key, user_id, namespace) DO UPDATE SET
             value = excluded.value,
             expires_at = excluded.expires_at,
             updated_at = excluded.updated_at",
        rusqlite::params![app_id, key, norm(user_id), norm(namespace), encoded, expires_at, now],
    )?;

    kv_get(conn, app_id, key, user_id, namespace)
        .ok_or_else(|| anyhow::anyhow!("failed to upsert key value"))
}

pub fn kv_delete(
    conn: &Connection,
    app_id: &str,
    key: &str,
    user_id: Option<&str>,
    namespace: Option<&str>,
) -> bool {
    let result = conn.execute(
        "DELETE FROM key_values
         WHERE app_id = ?1 AND key = ?2 AND user_id = ?3 AND namespace = ?4",
        rusqlite::params![app_id, key, norm(user_id), norm(namespace)],
    );
    matches!(result, Ok(n) if n > 0)
}

/// Drop rows whose expiry has passed. Expiry filtering at read time already
/// hides them; this reclaims the space.
pub fn sweep_expired(conn: &Connection) -> usize {
    conn.execute(
        "DELETE FROM key_values WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        rusqlite::params![now_millis()],
    )
    .unwrap_or(0)
}
