pub mod key_values;
pub mod sessions;
pub mod types;
pub mod users;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: &[&str] = &["sessions", "users", "key_values"];

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("failed to create database directory {}", dir.display())
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }

        let conn =
            Connection::open(path).with_context(|| format!("failed to open database at {path}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for suffix in &["", "-wal", "-shm"] {
                let file_path = format!("{path}{suffix}");
                let _ =
                    std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600));
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
            )
            .context("failed to configure database pragmas")?;

        debug!("database pragmas configured");
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i64> {
        let version: i64 = self
            .conn
            .lock()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("failed to read schema version")?;
        Ok(version)
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .pragma_update(None, "user_version", version)
            .context("failed to set schema version")?;
        Ok(())
    }

    fn initialize_schema(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;
        info!(
            current_version,
            target_version = SCHEMA_VERSION,
            "checking schema version"
        );

        if current_version == 0 {
            self.create_tables()?;
            self.set_schema_version(SCHEMA_VERSION)?;
            info!("created database schema v{SCHEMA_VERSION}");
            return Ok(());
        }

        if current_version < SCHEMA_VERSION {
            self.migrate_schema(current_version)?;
        }

        self.assert_required_tables()?;

        Ok(())
    }

    fn assert_required_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .context("failed to prepare table check query")?;

        let missing: Vec<&str> = REQUIRED_TABLES
            .iter()
            .filter(|&&table| !stmt.exists(rusqlite::params![table]).unwrap_or(false))
            .copied()
            .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "SQLite schema is missing required tables ({}). \
                 Back up and rebuild the database, or run an offline migration to the expected schema version.",
                missing.join(", ")
            );
        }

        Ok(())
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                username TEXT,
                role TEXT,
                current_area TEXT NOT NULL DEFAULT 'main',
                command_history TEXT NOT NULL DEFAULT '[]',
                data TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                last_activity INTEGER NOT NULL,
                client_addr TEXT,
                user_agent TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity);

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                display_name TEXT NOT NULL,
                email TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                joined_at INTEGER NOT NULL,
                last_login INTEGER,
                settings TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(username);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email
                ON users(email) WHERE email IS NOT NULL;",
            )
            .context("failed to create tables (part 1)")?;

        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS key_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id TEXT NOT NULL,
                key TEXT NOT NULL,
                user_id TEXT NOT NULL DEFAULT '',
                namespace TEXT NOT NULL DEFAULT '',
                value TEXT NOT NULL,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(app_id, key, user_id, namespace)
            );
            CREATE INDEX IF NOT EXISTS idx_key_values_app_namespace ON key_values(app_id, namespace);
            CREATE INDEX IF NOT EXISTS idx_key_values_app_user ON key_values(app_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_key_values_expires ON key_values(expires_at);",
            )
            .context("failed to create tables (part 2)")?;

        Ok(())
    }

    fn migrate_schema(&self, from_version: i64) -> Result<()> {
        let mut version = from_version;

        while version < SCHEMA_VERSION {
            info!(from = version, to = version + 1, "migrating schema");

            // No intermediate versions shipped yet.
            warn!(version, "unknown schema version, skipping");

            version += 1;
            self.set_schema_version(version)?;
        }

        info!(version = SCHEMA_VERSION, "schema migration complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> Store {
        Store::new_in_memory().unwrap()
    }

    #[test]
    fn store_creates_schema() {
        let store = test_store();
        let version = store.get_schema_version().unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn session_crud() {
        let store = test_store();
        let conn = &store.conn();

        let s = sessions::create_session(conn, "sess_a", None, None).unwrap();
        assert_eq!(s.id, "sess_a");
        assert_eq!(s.current_area, "main");
        assert!(s.command_history.is_empty());

        // Idempotent: same id returns the existing record unchanged
        let s2 = sessions::create_session(conn, "sess_a", None, None).unwrap();
        assert_eq!(s2.created_at, s.created_at);

        assert!(sessions::set_current_area(conn, "sess_a", "bulletin:home"));
        let s3 = sessions::get_session(conn, "sess_a").unwrap();
        assert_eq!(s3.current_area, "bulletin:home");
        assert!(s3.last_activity >= s.last_activity);

        assert!(sessions::delete_session(conn, "sess_a"));
        assert!(sessions::get_session(conn, "sess_a").is_none());
    }

    #[test]
    fn session_history_is_capped() {
        let store = test_store();
        let conn = &store.conn();
        sessions::create_session(conn, "sess_h", None, None).unwrap();

        for i in 1..=105 {
            assert!(sessions::append_history(conn, "sess_h", &format!("CMD {i}")));
        }

        let s = sessions::get_session(conn, "sess_h").unwrap();
        assert_eq!(s.command_history.len(), 100);
        assert_eq!(s.command_history.first().unwrap(), "CMD 6");
        assert_eq!(s.command_history.last().unwrap(), "CMD 105");
    }

    #[test]
    fn session_user_binding() {
        let store = test_store();
        let conn = &store.conn();
        sessions::create_session(conn, "sess_u", None, None).unwrap();

        assert!(sessions::bind_user(conn, "sess_u", "user_1", "ada", "admin"));
        let s = sessions::get_session(conn, "sess_u").unwrap();
        assert_eq!(s.user_id.as_deref(), Some("user_1"));
        assert_eq!(s.username.as_deref(), Some("ada"));
        assert_eq!(s.role.as_deref(), Some("admin"));

        assert!(sessions::clear_user(conn, "sess_u"));
        let s = sessions::get_session(conn, "sess_u").unwrap();
        assert!(s.user_id.is_none());
        assert!(s.username.is_none());
    }

    #[test]
    fn session_data_merges_field_by_field() {
        let store = test_store();
        let conn = &store.conn();
        sessions::create_session(conn, "sess_d", None, None).unwrap();

        let patch1 = json!({"hangman": {"word": "ferris"}});
        sessions::merge_session_data(conn, "sess_d", patch1.as_object().unwrap());
        let patch2 = json!({"bulletin": {"draft": "hi"}});
        sessions::merge_session_data(conn, "sess_d", patch2.as_object().unwrap());

        let s = sessions::get_session(conn, "sess_d").unwrap();
        assert_eq!(s.data["hangman"]["word"], "ferris");
        assert_eq!(s.data["bulletin"]["draft"], "hi");
    }

    #[test]
    fn session_reap_by_inactivity() {
        let store = test_store();
        let conn = &store.conn();
        sessions::create_session(conn, "sess_old", None, None).unwrap();
        conn.execute(
            "UPDATE sessions SET last_activity = 1000 WHERE id = 'sess_old'",
            [],
        )
        .unwrap();
        sessions::create_session(conn, "sess_new", None, None).unwrap();

        let reaped = sessions::reap_sessions(conn, 2000);
        assert_eq!(reaped, 1);
        assert!(sessions::get_session(conn, "sess_old").is_none());
        assert!(sessions::get_session(conn, "sess_new").is_some());
    }

    #[test]
    fn user_crud_normalizes_case() {
        let store = test_store();
        let conn = &store.conn();

        let u = users::create_user(
            conn,
            "Ada_Lovelace",
            "Ada",
            Some("Ada@Example.COM"),
            "hash",
            "user",
        )
        .unwrap();
        assert_eq!(u.username, "ada_lovelace");
        assert_eq!(u.email.as_deref(), Some("ada@example.com"));

        assert!(users::find_by_username(conn, "ADA_lovelace").is_some());
        assert!(users::find_by_email(conn, "ada@EXAMPLE.com").is_some());
        assert!(users::find_by_id(conn, &u.id).is_some());

        // Duplicate username rejected at the store layer
        assert!(users::create_user(conn, "ada_LOVELACE", "Imposter", None, "h", "user").is_err());
        // Duplicate email rejected too
        assert!(
            users::create_user(conn, "other", "Other", Some("ada@example.com"), "h", "user")
                .is_err()
        );
    }

    #[test]
    fn user_last_login_is_stamped() {
        let store = test_store();
        let conn = &store.conn();
        let u = users::create_user(conn, "bob", "Bob", None, "hash1", "user").unwrap();
        assert!(u.last_login.is_none());

        assert!(users::update_last_login(conn, &u.id));
        let u2 = users::find_by_id(conn, &u.id).unwrap();
        assert!(u2.last_login.is_some());
    }

    #[test]
    fn kv_compound_key_uniqueness() {
        let store = test_store();
        let conn = &store.conn();

        key_values::kv_upsert(conn, "appA", "k", None, None, &json!(1), None).unwrap();
        key_values::kv_upsert(conn, "appA", "k", None, None, &json!(2), None).unwrap();
        let row = key_values::kv_get(conn, "appA", "k", None, None).unwrap();
        assert_eq!(row.value, json!(2));

        // Same key under a different scope is a distinct row
        key_values::kv_upsert(conn, "appA", "k", Some("u1"), None, &json!(3), None).unwrap();
        key_values::kv_upsert(conn, "appA", "k", None, Some("ns"), &json!(4), None).unwrap();
        assert_eq!(
            key_values::kv_get(conn, "appA", "k", Some("u1"), None)
                .unwrap()
                .value,
            json!(3)
        );
        assert_eq!(
            key_values::kv_get(conn, "appA", "k", None, Some("ns"))
                .unwrap()
                .value,
            json!(4)
        );

        // Another app never sees it
        assert!(key_values::kv_get(conn, "appB", "k", None, None).is_none());

        assert!(key_values::kv_delete(conn, "appA", "k", None, None));
        assert!(key_values::kv_get(conn, "appA", "k", None, None).is_none());
    }

    #[test]
    fn kv_expiry_is_filtered_and_swept() {
        let store = test_store();
        let conn = &store.conn();

        key_values::kv_upsert(conn, "appA", "gone", None, None, &json!("x"), Some(1)).unwrap();
        key_values::kv_upsert(conn, "appA", "kept", None, None, &json!("y"), None).unwrap();

        assert!(key_values::kv_get(conn, "appA", "gone", None, None).is_none());
        assert!(key_values::kv_get(conn, "appA", "kept", None, None).is_some());

        let swept = key_values::sweep_expired(conn);
        assert_eq!(swept, 1);
        // Only the expired row was dropped
        assert!(key_values::kv_get(conn, "appA", "kept", None, None).is_some());
        assert_eq!(key_values::sweep_expired(conn), 0);
    }
}
