//! The terminal endpoints: session bootstrap and command submission.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use retrobbs_shared::schemas::SessionSnapshot;

use crate::shell::screens;
use crate::web::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/terminal/init", get(init_handler))
        .route("/terminal/command", post(command_handler))
        .route("/terminal/session", get(session_handler))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitQuery {
    session_id: Option<String>,
    #[serde(default)]
    simplified: Option<bool>,
}

async fn init_handler(
    State(state): State<AppState>,
    Query(query): Query<InitQuery>,
) -> (StatusCode, Json<Value>) {
    let session = match state
        .sessions
        .create(query.session_id.as_deref(), None, None)
    {
        Ok(session) => session,
        Err(e) => {
            error!("terminal init failed: {e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Failed to create session"})),
            );
        }
    };

    let apps = state.registry.list_all();
    let username = session.username.as_deref();
    let default_welcome = screens::main_menu(&apps, username);
    let full_welcome = screens::full_welcome(&apps, username);
    let simple_welcome = screens::simple_welcome(&apps);

    let default_welcome = if query.simplified.unwrap_or(false) {
        simple_welcome.clone()
    } else {
        default_welcome
    };

    (
        StatusCode::OK,
        Json(json!({
            "sessionId": session.id,
            "currentArea": session.current_area,
            "defaultWelcomeText": default_welcome,
            "fullWelcomeText": full_welcome,
            "simpleWelcomeText": simple_welcome,
            "menuOptions": screens::menu_options(&apps),
        })),
    )
}

async fn command_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let session_id = body.get("sessionId").and_then(|v| v.as_str());
    let command = body.get("command").and_then(|v| v.as_str());

    let (Some(session_id), Some(command)) = (session_id, command) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "sessionId and command are required"})),
        );
    };
    if session_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "sessionId and command are required"})),
        );
    }

    match state.shell.dispatch(session_id, command).await {
        Ok(reply) => {
            if let Some(error) = reply.error {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"success": false, "error": error})),
                );
            }
            let snapshot = match state.sessions.peek(session_id) {
                Some(s) => SessionSnapshot {
                    id: s.id,
                    current_area: s.current_area,
                    command_history: s.command_history,
                },
                None => SessionSnapshot {
                    id: session_id.to_string(),
                    current_area: reply.area.clone(),
                    command_history: Vec::new(),
                },
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "ok",
                    "data": {
                        "screen": reply.screen,
                        "area": reply.area,
                        "response": reply.response,
                        "refresh": reply.refresh,
                        "session": snapshot,
                    }
                })),
            )
        }
        Err(e) => {
            error!(session = session_id, "command dispatch failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Internal error"})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    session_id: Option<String>,
}

async fn session_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> (StatusCode, Json<Value>) {
    let Some(session_id) = query.session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "sessionId is required"})),
        );
    };

    match state.sessions.peek(&session_id) {
        Some(session) => (
            StatusCode::OK,
            Json(json!({
                "exists": true,
                "currentArea": session.current_area,
                "historyLength": session.command_history.len(),
            })),
        ),
        None => (StatusCode::OK, Json(json!({ "exists": false }))),
    }
}
