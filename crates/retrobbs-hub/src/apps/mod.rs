pub mod builtin;
pub mod capabilities;
pub mod contract;
pub mod local;
pub mod rate_limit;
pub mod registry;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::session::SessionService;
use crate::store::Store;

use capabilities::CapabilityFacade;
use contract::{validate_app, BbsApp};
use rate_limit::RateLimiter;
use registry::{AppRegistry, LoadedApp};

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Take a candidate through initialization and validation, then register it.
/// Registration is the last step, so a rejected app never becomes visible —
/// partial admission is impossible.
pub fn admit_app(
    registry: &AppRegistry,
    store: &Arc<Store>,
    sessions: &Arc<SessionService>,
    handler: Arc<dyn BbsApp>,
    limiter: Arc<RateLimiter>,
) -> Result<Arc<LoadedApp>> {
    let meta = handler.meta().clone();

    let caps = Arc::new(CapabilityFacade::new(
        &meta.id,
        store.clone(),
        sessions.clone(),
        limiter.clone(),
    ));
    handler
        .on_init(&caps)
        .map_err(|e| anyhow!("on_init failed for {}: {e}", meta.id))?;

    validate_app(handler.as_ref()).map_err(|reason| {
        warn!(app = %meta.id, %reason, "app rejected");
        anyhow!("app validation failed: {reason}")
    })?;

    let now = now_millis();
    let loaded = Arc::new(LoadedApp {
        meta,
        handler,
        limiter,
        installed_at: now,
        refreshed_at: now,
    });
    registry.register(loaded.clone());
    Ok(loaded)
}

/// Convenience for builtin apps registered at boot.
pub fn admit_builtin(
    registry: &AppRegistry,
    store: &Arc<Store>,
    sessions: &Arc<SessionService>,
    handler: Arc<dyn BbsApp>,
) -> Result<Arc<LoadedApp>> {
    let limiter = Arc::new(RateLimiter::new(&handler.meta().id));
    admit_app(registry, store, sessions, handler, limiter)
}
