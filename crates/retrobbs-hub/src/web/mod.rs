pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use retrobbs_shared::version::PROTOCOL_VERSION;

use crate::apps::registry::AppRegistry;
use crate::session::SessionService;
use crate::shell::Shell;
use crate::store::Store;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub sessions: Arc<SessionService>,
    pub registry: Arc<AppRegistry>,
    pub shell: Arc<Shell>,
    pub cors_origins: Vec<String>,
}

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    use tower_http::cors::AllowOrigin;

    let cors_origins = &state.cors_origins;
    let allow_origin = if cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<axum::http::HeaderValue> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    Router::new()
        .route(
            "/health",
            axum::routing::get(|| async {
                axum::Json(
                    serde_json::json!({ "status": "ok", "protocolVersion": PROTOCOL_VERSION }),
                )
            }),
        )
        .merge(routes::terminal::router())
        .merge(routes::auth::router())
        .layer(cors)
        .with_state(state)
}
