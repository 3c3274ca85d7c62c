use rusqlite::Connection;
use serde_json::Value;

use super::sessions::now_millis;
use super::types::StoredUser;

fn safe_json_parse(value: Option<String>) -> Option<Value> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<StoredUser> {
    Ok(StoredUser {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: row.get("role")?,
        joined_at: row.get("joined_at")?,
        last_login: row.get("last_login")?,
        settings: safe_json_parse(row.get("settings")?),
    })
}

pub fn find_by_username(conn: &Connection, username: &str) -> Option<StoredUser> {
    let username = username.to_lowercase();
    conn.prepare("SELECT * FROM users WHERE username = ?1 LIMIT 1")
        .ok()?
        .query_row(rusqlite::params![username], row_to_user)
        .ok()
}

pub fn find_by_id(conn: &Connection, id: &str) -> Option<StoredUser> {
    conn.prepare("SELECT * FROM users WHERE id = ?1 LIMIT 1")
        .ok()?
        .query_row(rusqlite::params![id], row_to_user)
        .ok()
}

pub fn find_by_email(conn: &Connection, email: &str) -> Option<StoredUser> {
    let email = email.to_lowercase();
    conn.prepare("SELECT * FROM users WHERE email = ?1 LIMIT 1")
        .ok()?
        .query_row(rusqlite::params![email], row_to_user)
        .ok()
}

/// Insert a new user. Username and email are lowercased here; uniqueness is
/// enforced by the schema, so a duplicate surfaces as an `Err`.
pub fn create_user(
    conn: &Connection,
    username: &str,
    display_name: &str,
    email: Option<&str>,
    password_hash: &str,
    role: &str,
) -> anyhow::Result<StoredUser> {
    let now = now_millis();
    let id = format!("user_{}", uuid::Uuid::new_v4());
    let username = username.to_lowercase();
    let email = email.map(|e| e.to_lowercase());

    conn.execute(
        "INSERT INTO users (id, username, display_name, email, password_hash, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, username, display_name, email, password_hash, role, now],
    )?;

    find_by_id(conn, &id).ok_or_else(|| anyhow::anyhow!("failed to create user"))
}

pub fn update_last_login(conn: &Connection, id: &str) -> bool {
    let result = conn.execute(
        "UPDATE users SET last_login = ?1 WHERE id = ?2",
        rusqlite::params![now_millis(), id],
    );
    matches!(result, Ok(n) if n > 0)
}

pub fn count_users(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap_or(0)
}
