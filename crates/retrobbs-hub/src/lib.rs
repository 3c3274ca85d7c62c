pub mod apps;
pub mod config;
pub mod identity;
pub mod sandbox;
pub mod session;
pub mod shell;
pub mod store;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use apps::builtin::BulletinApp;
use apps::registry::AppRegistry;
use config::Configuration;
use sandbox::isolate::IsolateLimits;
use sandbox::RemoteLoader;
use session::SessionService;
use shell::Shell;
use store::Store;
use web::AppState;

pub async fn run_hub() -> anyhow::Result<()> {
    let config = Configuration::create()?;

    info!(
        port = config.listen_port,
        host = %config.listen_host,
        db = %config.db_path.display(),
        "starting bbs hub"
    );

    let db_path_str = config.db_path.to_string_lossy().to_string();
    let store = Arc::new(Store::new(&db_path_str)?);
    let sessions = Arc::new(SessionService::new(store.clone()));
    let registry = Arc::new(AppRegistry::new());
    let limits = IsolateLimits::default();

    // Builtin apps first, so they take the low menu numbers.
    if let Err(e) = apps::admit_builtin(&registry, &store, &sessions, Arc::new(BulletinApp::new()))
    {
        warn!("builtin bulletin app failed to load: {e:#}");
    }

    // Then locally installed packages.
    let load_errors =
        apps::local::load_local_apps(&config.apps_dir, limits, &store, &sessions, &registry).await;
    for error in &load_errors {
        warn!("{error}");
    }

    let loader = Arc::new(RemoteLoader::new(
        config.remote_app_hosts.clone(),
        limits,
        store.clone(),
        sessions.clone(),
        registry.clone(),
    )?);

    let shell = Arc::new(Shell::new(
        store.clone(),
        sessions.clone(),
        registry.clone(),
        loader.clone(),
    ));

    let app_state = AppState {
        store: store.clone(),
        sessions: sessions.clone(),
        registry: registry.clone(),
        shell,
        cors_origins: config.cors_origins.clone(),
    };
    let app = web::build_router(app_state);

    // Hourly maintenance: reap idle sessions, sweep expired key-values.
    let maintenance_store = store.clone();
    let maintenance_sessions = sessions.clone();
    let ttl_days = config.session_ttl_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            let reaped = maintenance_sessions.reap(ttl_days);
            let swept = store::key_values::sweep_expired(&maintenance_store.conn());
            if reaped > 0 || swept > 0 {
                info!(reaped, swept, "maintenance pass");
            }
        }
    });

    // Sandboxed isolates get a GC cycle every minute.
    let gc_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            for app in gc_registry.list_all() {
                let handler = app.handler.clone();
                let _ = tokio::task::spawn_blocking(move || handler.collect_garbage()).await;
            }
        }
    });

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, apps = registry.len(), "listening");

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_srv = shutdown_notify.clone();

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_notify_srv.notified().await;
            })
            .await
    });

    shutdown_signal().await;

    shutdown_notify.notify_one();
    if tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .is_err()
    {
        info!("graceful shutdown timed out, forcing exit");
    }

    info!("hub stopped");
    Ok(())
}

/// One-shot maintenance for cron-style deployments.
pub fn run_reap() -> anyhow::Result<()> {
    let config = Configuration::create()?;
    let db_path_str = config.db_path.to_string_lossy().to_string();
    let store = Arc::new(Store::new(&db_path_str)?);
    let sessions = SessionService::new(store.clone());

    let reaped = sessions.reap(config.session_ttl_days);
    let swept = store::key_values::sweep_expired(&store.conn());
    info!(reaped, swept, ttl_days = config.session_ttl_days, "reap complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
