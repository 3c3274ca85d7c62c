//! Loading untrusted apps from remote source repositories.
//!
//! Pipeline: parse the repository URL (allow-listed hosts only), fetch the
//! optional manifest and the main source file with hard size bounds, run
//! static analysis, execute in a fresh isolate, extract and validate the app
//! table, then wrap it in the capability guard before registration. A failure
//! at any stage leaves the registry untouched.

pub mod analysis;
pub mod guard;
pub mod isolate;
pub mod modules;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::apps::contract::{AppMeta, AppOrigin, MAX_ID_LEN};
use crate::apps::rate_limit::RateLimiter;
use crate::apps::registry::{AppRegistry, LoadedApp};
use crate::apps::{admit_app, now_millis};
use crate::session::SessionService;
use crate::store::Store;

use guard::GuardedLuaApp;
use isolate::{IsolateLimits, LuaIsolate};

pub const DEFAULT_MAIN_FILE: &str = "main.lua";
pub const MANIFEST_FILE: &str = "app.json";
const MANIFEST_MAX_BYTES: usize = 64 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const INSTALL_CACHE_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub subpath: String,
}

/// Optional manifest shipped next to the app source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Accept only URLs pointing at an allow-listed source host; anything else
/// fails fast.
pub fn parse_repo_url(raw: &str, allowed_hosts: &[String]) -> Result<RepoRef> {
    let url = Url::parse(raw).context("malformed repository URL")?;
    if url.scheme() != "https" {
        bail!("repository URL must use https");
    }
    let host = url
        .host_str()
        .context("repository URL has no host")?
        .to_lowercase();
    if !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        bail!("host {host} is not on the remote-source allow-list");
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        bail!("repository URL must name an owner and a repository");
    }

    let owner = segments[0].to_string();
    let repo = segments[1].trim_end_matches(".git").to_string();
    if owner.is_empty() || repo.is_empty() {
        bail!("repository URL must name an owner and a repository");
    }

    let (branch, subpath) = match segments.get(2) {
        Some(&"tree") if segments.len() >= 4 => {
            (segments[3].to_string(), segments[4..].join("/"))
        }
        _ => ("main".to_string(), String::new()),
    };

    Ok(RepoRef {
        owner,
        repo,
        branch,
        subpath,
    })
}

/// `remote_<owner>_<repo>[_<subpath>]`, squashed into the id alphabet.
pub fn remote_app_id(repo: &RepoRef) -> String {
    let mut raw = format!("remote_{}_{}", repo.owner, repo.repo);
    if !repo.subpath.is_empty() {
        raw.push('_');
        raw.push_str(&repo.subpath);
    }
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.chars().take(MAX_ID_LEN).collect()
}

pub struct RemoteLoader {
    http: reqwest::Client,
    allowed_hosts: Vec<String>,
    limits: IsolateLimits,
    store: Arc<Store>,
    sessions: Arc<SessionService>,
    registry: Arc<AppRegistry>,
}

impl RemoteLoader {
    pub fn new(
        allowed_hosts: Vec<String>,
        limits: IsolateLimits,
        store: Arc<Store>,
        sessions: Arc<SessionService>,
        registry: Arc<AppRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .context("failed to build http client")?,
            allowed_hosts,
            limits,
            store,
            sessions,
            registry,
        })
    }

    /// Install the app hosted at `url`, or return the cached entry when the
    /// same URL was resolved within the last hour.
    pub async fn install(&self, url: &str) -> Result<Arc<LoadedApp>> {
        self.install_with(url, false).await
    }

    async fn install_with(&self, url: &str, force: bool) -> Result<Arc<LoadedApp>> {
        if !force {
            if let Some(existing) = self.registry.find_by_source(url) {
                if now_millis() - existing.refreshed_at < INSTALL_CACHE_MS {
                    debug!(url, "remote app served from cache");
                    return Ok(existing);
                }
            }
        }

        let repo = parse_repo_url(url, &self.allowed_hosts)?;
        let app_id = remote_app_id(&repo);

        let manifest = self.fetch_manifest(&repo).await.unwrap_or_default();
        let main_file = manifest
            .main
            .clone()
            .unwrap_or_else(|| DEFAULT_MAIN_FILE.to_string());
        let allowed_modules = allowed_dependencies_of(&manifest);

        let source = self
            .fetch_text(&self.raw_url(&repo, &main_file), analysis::MAX_SOURCE_BYTES)
            .await
            .with_context(|| format!("failed to fetch {main_file} from {url}"))?;

        let loaded = load_source_app(LoadSpec {
            source,
            allowed_modules,
            limits: self.limits,
            id_override: Some(app_id),
            origin: AppOrigin::Remote,
            source_url: Some(url.to_string()),
            store: self.store.clone(),
            sessions: self.sessions.clone(),
            registry: self.registry.clone(),
        })
        .await?;

        info!(url, app = %loaded.meta.id, "remote app installed");
        Ok(loaded)
    }

    /// Remove the app installed from `url`; `None` when nothing matches.
    pub fn uninstall(&self, url: &str) -> Option<Arc<LoadedApp>> {
        let existing = self.registry.find_by_source(url)?;
        self.registry.unregister(&existing.meta.id)
    }

    /// Re-resolve every tracked remote URL, replacing registry entries.
    pub async fn refresh_all(&self) -> Vec<(String, Result<Arc<LoadedApp>>)> {
        let mut results = Vec::new();
        for url in self.registry.list_remote_urls() {
            let outcome = self.install_with(&url, true).await;
            if let Err(e) = &outcome {
                warn!(url = %url, "remote refresh failed: {e:#}");
            }
            results.push((url, outcome));
        }
        results
    }

    fn raw_url(&self, repo: &RepoRef, file: &str) -> String {
        let mut path = String::new();
        if !repo.subpath.is_empty() {
            path.push_str(&repo.subpath);
            path.push('/');
        }
        path.push_str(file);
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            repo.owner, repo.repo, repo.branch, path
        )
    }

    async fn fetch_manifest(&self, repo: &RepoRef) -> Option<AppManifest> {
        let url = self.raw_url(repo, MANIFEST_FILE);
        match self.fetch_text(&url, MANIFEST_MAX_BYTES).await {
            Ok(raw) => match serde_json::from_str::<AppManifest>(&raw) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    debug!(url, "unparseable manifest, using defaults: {e}");
                    None
                }
            },
            Err(e) => {
                // Manifest fetch failure is recoverable; defaults apply.
                debug!(url, "no manifest: {e:#}");
                None
            }
        }
    }

    async fn fetch_text(&self, url: &str, max_bytes: usize) -> Result<String> {
        let resp = self.http.get(url).send().await.context("request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url} failed ({status})");
        }
        if let Some(length) = resp.content_length() {
            if length as usize > max_bytes {
                bail!("{url} exceeds the {max_bytes} byte limit");
            }
        }
        let bytes = resp.bytes().await.context("failed to read body")?;
        if bytes.len() > max_bytes {
            bail!("{url} exceeds the {max_bytes} byte limit");
        }
        String::from_utf8(bytes.to_vec()).context("source is not valid UTF-8")
    }
}

/// Manifest dependencies intersected with the host allow-list; with no
/// manifest every allow-listed module is importable.
pub fn allowed_dependencies_of(manifest: &AppManifest) -> Vec<String> {
    if manifest.dependencies.is_empty() {
        return modules::ALLOWED_MODULES
            .iter()
            .map(|s| s.to_string())
            .collect();
    }
    manifest
        .dependencies
        .iter()
        .filter(|dep| modules::ALLOWED_MODULES.contains(&dep.as_str()))
        .cloned()
        .collect()
}

pub struct LoadSpec {
    pub source: String,
    pub allowed_modules: Vec<String>,
    pub limits: IsolateLimits,
    /// Registry id; `None` trusts the id the script declares (local apps).
    pub id_override: Option<String>,
    pub origin: AppOrigin,
    pub source_url: Option<String>,
    pub store: Arc<Store>,
    pub sessions: Arc<SessionService>,
    pub registry: Arc<AppRegistry>,
}

/// Analyze, execute, extract, validate, wrap, admit. Shared by the remote
/// and local loaders.
pub async fn load_source_app(spec: LoadSpec) -> Result<Arc<LoadedApp>> {
    analysis::analyze(&spec.source, &spec.allowed_modules)
        .map_err(|reason| anyhow::anyhow!("static analysis rejected app: {reason}"))?;

    let tag = spec
        .id_override
        .clone()
        .unwrap_or_else(|| "local-app".to_string());
    let limits = spec.limits;
    let source = spec.source.clone();
    let allowed = spec.allowed_modules.clone();

    let isolate = tokio::task::spawn_blocking(move || LuaIsolate::load(&tag, &source, limits, &allowed))
        .await
        .context("isolate load was aborted")??;
    let isolate = Arc::new(isolate);

    let raw_meta = isolate.extract_meta()?;
    let app_id = match &spec.id_override {
        Some(id) => id.clone(),
        None => raw_meta.id.clone(),
    };

    let meta = AppMeta {
        id: app_id.clone(),
        name: raw_meta.name,
        version: raw_meta.version,
        description: raw_meta.description,
        author: raw_meta.author,
        origin: spec.origin,
        source: spec.source_url,
    };

    let limiter = Arc::new(RateLimiter::new(&app_id));
    let guarded: Arc<GuardedLuaApp> =
        Arc::new(GuardedLuaApp::new(meta, isolate, limiter.clone()));

    let registry = spec.registry.clone();
    let store = spec.store.clone();
    let sessions = spec.sessions.clone();
    tokio::task::spawn_blocking(move || admit_app(&registry, &store, &sessions, guarded, limiter))
        .await
        .context("app admission was aborted")?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec!["github.com".to_string()]
    }

    #[test]
    fn parse_plain_repo_url() {
        let repo = parse_repo_url("https://github.com/ada/hangman", &hosts()).unwrap();
        assert_eq!(
            repo,
            RepoRef {
                owner: "ada".into(),
                repo: "hangman".into(),
                branch: "main".into(),
                subpath: String::new(),
            }
        );
    }

    #[test]
    fn parse_branch_and_subpath() {
        let repo = parse_repo_url(
            "https://github.com/ada/apps/tree/dev/games/hangman",
            &hosts(),
        )
        .unwrap();
        assert_eq!(repo.branch, "dev");
        assert_eq!(repo.subpath, "games/hangman");
    }

    #[test]
    fn git_suffix_is_stripped() {
        let repo = parse_repo_url("https://github.com/ada/hangman.git", &hosts()).unwrap();
        assert_eq!(repo.repo, "hangman");
    }

    #[test]
    fn unknown_hosts_fail_fast() {
        let err = parse_repo_url("https://evil.example.com/a/b", &hosts()).unwrap_err();
        assert!(err.to_string().contains("allow-list"));
    }

    #[test]
    fn non_https_fails_fast() {
        assert!(parse_repo_url("http://github.com/a/b", &hosts()).is_err());
        assert!(parse_repo_url("not a url", &hosts()).is_err());
    }

    #[test]
    fn short_paths_fail_fast() {
        assert!(parse_repo_url("https://github.com/onlyowner", &hosts()).is_err());
    }

    #[test]
    fn remote_ids_are_synthesized_and_bounded() {
        let repo = parse_repo_url("https://github.com/Ada/My.App", &hosts()).unwrap();
        assert_eq!(remote_app_id(&repo), "remote_ada_my_app");

        let long = RepoRef {
            owner: "o".repeat(40),
            repo: "r".repeat(40),
            branch: "main".into(),
            subpath: String::new(),
        };
        assert!(remote_app_id(&long).len() <= MAX_ID_LEN);
    }

    #[test]
    fn manifest_parsing_tolerates_extras() {
        let manifest: AppManifest = serde_json::from_str(
            r#"{"main": "board.lua", "dependencies": ["toolkit", "fs"], "tags": ["bbs-app"], "unknown": 1}"#,
        )
        .unwrap();
        assert_eq!(manifest.main.as_deref(), Some("board.lua"));
        // Only allow-listed dependencies survive the intersection
        assert_eq!(allowed_dependencies_of(&manifest), vec!["toolkit".to_string()]);
    }

    #[test]
    fn missing_manifest_allows_all_standins() {
        let manifest = AppManifest::default();
        let deps = allowed_dependencies_of(&manifest);
        assert!(deps.contains(&"toolkit".to_string()));
        assert!(deps.contains(&"dates".to_string()));
    }

    const COUNTER_APP: &str = r#"
        local app = {
            id = "counter",
            name = "Counter",
            version = "1.0.0",
            description = "counts things through scoped storage",
            author = "ada",
        }
        function app.get_welcome_screen() return "COUNTER" end
        function app.get_help(s) return "ADD bumps the counter" end
        function app.handle_command(screen, command, session)
            if command == "ADD" then
                local n = bbs.storage.get("count") or 0
                bbs.storage.set("count", n + 1)
                return { screen = screen, response = "count=" .. tostring(n + 1), refresh = false }
            end
            return { screen = screen, response = "COUNTER", refresh = false }
        end
        return app
    "#;

    fn pipeline_fixtures() -> (
        Arc<Store>,
        Arc<SessionService>,
        Arc<AppRegistry>,
        IsolateLimits,
    ) {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let sessions = Arc::new(SessionService::new(store.clone()));
        let limits = IsolateLimits {
            memory_bytes: 16 * 1024 * 1024,
            wall: std::time::Duration::from_millis(500),
            cpu: std::time::Duration::from_millis(500),
        };
        (store, sessions, Arc::new(AppRegistry::new()), limits)
    }

    #[tokio::test]
    async fn full_pipeline_admits_and_runs_a_sourced_app() {
        let (store, sessions, registry, limits) = pipeline_fixtures();

        let loaded = load_source_app(LoadSpec {
            source: COUNTER_APP.to_string(),
            allowed_modules: vec![],
            limits,
            id_override: Some("remote_ada_counter".to_string()),
            origin: AppOrigin::Remote,
            source_url: Some("https://github.com/ada/counter".to_string()),
            store: store.clone(),
            sessions: sessions.clone(),
            registry: registry.clone(),
        })
        .await
        .unwrap();

        // The synthesized registry id wins over the script-declared one
        assert_eq!(loaded.meta.id, "remote_ada_counter");
        assert!(registry.get("remote_ada_counter").is_some());
        assert_eq!(
            registry.list_remote_urls(),
            vec!["https://github.com/ada/counter".to_string()]
        );

        let view = retrobbs_shared::schemas::SessionView::anonymous(
            "sess_1",
            "remote_ada_counter:home",
        );
        let first = loaded
            .handler
            .handle_command(Some("home"), "ADD", &view)
            .unwrap();
        assert_eq!(first.response, "count=1");
        let second = loaded
            .handler
            .handle_command(Some("home"), "ADD", &view)
            .unwrap();
        assert_eq!(second.response, "count=2");

        // Another app's facade cannot see the counter (scoping + prefixing)
        let other = crate::apps::capabilities::CapabilityFacade::new(
            "other",
            store.clone(),
            sessions,
            Arc::new(RateLimiter::new("other")),
        );
        assert!(other.storage_get("count").is_none());
    }

    #[tokio::test]
    async fn unsafe_source_never_reaches_the_registry() {
        let (store, sessions, registry, limits) = pipeline_fixtures();

        let err = load_source_app(LoadSpec {
            source: "eval('1+1')".to_string(),
            allowed_modules: vec![],
            limits,
            id_override: Some("remote_evil_app".to_string()),
            origin: AppOrigin::Remote,
            source_url: Some("https://github.com/evil/app".to_string()),
            store,
            sessions,
            registry: registry.clone(),
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("dangerous method: eval"), "{err}");
        assert_eq!(registry.len(), 0);
        assert!(registry.list_remote_urls().is_empty());
    }

    #[tokio::test]
    async fn app_failing_validation_never_reaches_the_registry() {
        let (store, sessions, registry, limits) = pipeline_fixtures();

        // Well-formed script whose welcome screen is empty: fails admission.
        let source = r#"
            local app = { id="w", name="W", version="1", description="d", author="a" }
            function app.get_welcome_screen() return "" end
            function app.get_help(s) return "h" end
            function app.handle_command(screen, command, session)
                return { screen = screen, response = "ok", refresh = false }
            end
            return app
        "#;

        let err = load_source_app(LoadSpec {
            source: source.to_string(),
            allowed_modules: vec![],
            limits,
            id_override: Some("remote_w_w".to_string()),
            origin: AppOrigin::Remote,
            source_url: Some("https://github.com/w/w".to_string()),
            store,
            sessions,
            registry: registry.clone(),
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("validation failed"), "{err}");
        assert_eq!(registry.len(), 0);
    }
}
