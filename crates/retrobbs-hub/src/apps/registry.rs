//! In-memory index of loaded apps.
//!
//! Reads happen on every command; writes only on install/uninstall/refresh.
//! Readers take the lock briefly and clone `Arc`s out, so a registration in
//! flight is either fully visible or not at all.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::contract::{AppMeta, BbsApp};
use super::rate_limit::RateLimiter;

pub struct LoadedApp {
    pub meta: AppMeta,
    pub handler: Arc<dyn BbsApp>,
    pub limiter: Arc<RateLimiter>,
    pub installed_at: i64,
    pub refreshed_at: i64,
}

impl std::fmt::Debug for LoadedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedApp")
            .field("meta", &self.meta)
            .field("installed_at", &self.installed_at)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    apps: HashMap<String, Arc<LoadedApp>>,
    /// Insertion order drives main-menu numbering.
    order: Vec<String>,
    remote_urls: Vec<String>,
}

#[derive(Default)]
pub struct AppRegistry {
    inner: RwLock<Inner>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced app keeps its menu position; a new id is
    /// appended. Remote origins are also tracked by source URL.
    pub fn register(&self, app: Arc<LoadedApp>) {
        let id = app.meta.id.clone();
        let source = app.meta.source.clone();
        let mut inner = self.inner.write().unwrap();

        if inner.apps.insert(id.clone(), app).is_none() {
            inner.order.push(id.clone());
        }
        if let Some(url) = source {
            if !inner.remote_urls.iter().any(|u| u == &url) {
                inner.remote_urls.push(url);
            }
        }
        info!(app = %id, total = inner.order.len(), "app registered");
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<LoadedApp>> {
        let mut inner = self.inner.write().unwrap();
        let removed = inner.apps.remove(id)?;
        inner.order.retain(|entry| entry != id);
        if let Some(url) = &removed.meta.source {
            inner.remote_urls.retain(|u| u != url);
        }
        info!(app = %id, "app unregistered");
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedApp>> {
        self.inner.read().unwrap().apps.get(id).cloned()
    }

    /// All apps in insertion order.
    pub fn list_all(&self) -> Vec<Arc<LoadedApp>> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.apps.get(id).cloned())
            .collect()
    }

    /// 1-based menu lookup.
    pub fn nth(&self, n: usize) -> Option<Arc<LoadedApp>> {
        if n == 0 {
            return None;
        }
        let inner = self.inner.read().unwrap();
        let id = inner.order.get(n - 1)?;
        inner.apps.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list_remote_urls(&self) -> Vec<String> {
        self.inner.read().unwrap().remote_urls.clone()
    }

    pub fn find_by_source(&self, url: &str) -> Option<Arc<LoadedApp>> {
        let inner = self.inner.read().unwrap();
        inner
            .apps
            .values()
            .find(|app| app.meta.source.as_deref() == Some(url))
            .cloned()
    }
}
