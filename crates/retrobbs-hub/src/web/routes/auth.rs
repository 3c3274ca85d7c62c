//! Registration, login, logout and the session introspection endpoint.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::identity;
use crate::store::users;
use crate::web::AppState;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
}

pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err("username must be 3-20 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("username may only contain letters, digits and underscores");
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err("password must be at least 6 characters");
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err("email address is invalid");
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err("email address is invalid");
    }
    Ok(())
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": message})),
    )
}

/// Bind the user to an existing or fresh session and build the success
/// envelope shared by register and login.
fn bind_and_reply(
    state: &AppState,
    session_id: Option<&str>,
    user: &crate::store::types::StoredUser,
) -> (StatusCode, Json<Value>) {
    let session = match state.sessions.create(session_id, None, None) {
        Ok(session) => session,
        Err(e) => {
            error!("session bind failed: {e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Failed to bind session"})),
            );
        }
    };
    state
        .sessions
        .bind_user(&session.id, &user.id, &user.username, &user.role);

    let session = state.sessions.peek(&session.id).unwrap_or(session);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "sessionId": session.id,
            "currentArea": session.current_area,
            "commandHistory": session.command_history,
            "user": identity::public_view(user),
        })),
    )
}

async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let username = body.get("username").and_then(|v| v.as_str()).unwrap_or("");
    let password = body.get("password").and_then(|v| v.as_str()).unwrap_or("");
    let display_name = body
        .get("displayName")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();
    let email = body.get("email").and_then(|v| v.as_str());
    let session_id = body.get("sessionId").and_then(|v| v.as_str());

    if let Err(reason) = validate_username(username) {
        return bad_request(reason);
    }
    if let Err(reason) = validate_password(password) {
        return bad_request(reason);
    }
    if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LEN {
        return bad_request("display name must be 1-50 characters");
    }
    if let Some(email) = email {
        if let Err(reason) = validate_email(email) {
            return bad_request(reason);
        }
    }

    {
        let conn = state.store.conn();
        if users::find_by_username(&conn, username).is_some() {
            return bad_request("username already taken");
        }
        if let Some(email) = email {
            if users::find_by_email(&conn, email).is_some() {
                return bad_request("email already registered");
            }
        }
    }

    let hash = match identity::hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("password hashing failed: {e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Internal error"})),
            );
        }
    };

    let created = {
        let conn = state.store.conn();
        users::create_user(&conn, username, display_name, email, &hash, "user")
    };
    let user = match created {
        Ok(user) => user,
        Err(e) => {
            // The unique indexes closed a race the pre-check missed.
            info!("registration conflict: {e}");
            return bad_request("username or email already taken");
        }
    };

    info!(username = %user.username, "user registered");
    bind_and_reply(&state, session_id, &user)
}

async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let username = body.get("username").and_then(|v| v.as_str()).unwrap_or("");
    let password = body.get("password").and_then(|v| v.as_str()).unwrap_or("");
    let session_id = body.get("sessionId").and_then(|v| v.as_str());

    if username.is_empty() || password.is_empty() {
        return bad_request("username and password are required");
    }

    let user = {
        let conn = state.store.conn();
        users::find_by_username(&conn, username)
    };
    let Some(user) = user else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "invalid username or password"})),
        );
    };

    if !identity::verify_password(password, &user.password_hash) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "invalid username or password"})),
        );
    }

    {
        let conn = state.store.conn();
        users::update_last_login(&conn, &user.id);
    }
    let user = {
        let conn = state.store.conn();
        users::find_by_id(&conn, &user.id).unwrap_or(user)
    };

    info!(username = %user.username, "user logged in");
    bind_and_reply(&state, session_id, &user)
}

async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(session_id) = body.get("sessionId").and_then(|v| v.as_str()) else {
        return bad_request("sessionId is required");
    };

    if state.sessions.peek(session_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "session not found"})),
        );
    }

    state.sessions.clear_user(session_id);
    (
        StatusCode::OK,
        Json(json!({"success": true, "message": "logged off"})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeQuery {
    session_id: Option<String>,
}

async fn me_handler(
    State(state): State<AppState>,
    Query(query): Query<MeQuery>,
) -> (StatusCode, Json<Value>) {
    let Some(session_id) = query.session_id else {
        return bad_request("sessionId is required");
    };

    let Some(session) = state.sessions.peek(&session_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "session not found"})),
        );
    };

    let user = session.user_id.as_deref().and_then(|user_id| {
        let conn = state.store.conn();
        users::find_by_id(&conn, user_id).map(|u| identity::public_view(&u))
    });

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "isLoggedIn": user.is_some(),
            "sessionId": session.id,
            "currentArea": session.current_area,
            "commandHistory": session.command_history,
            "user": user,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_bounds() {
        assert!(validate_username("ada").is_ok());
        assert!(validate_username("ada_lovelace_42").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(21)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("dash-ed").is_err());
    }

    #[test]
    fn password_bounds() {
        assert!(validate_password("hunter22").is_ok());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@nodot").is_err());
    }
}
