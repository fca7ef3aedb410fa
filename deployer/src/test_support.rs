//! Test-only fakes: a temp document root, an in-process web server, and
//! endpoint constructors with deterministic content.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use crate::blocks::BlockContext;
use crate::core::types::{HostingTier, PlatformType, ServerProfile};
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::endpoint::{Content, Endpoint, ProxyTarget, static_generator};
use crate::executor::DeployEnv;
use crate::io::config::{DeployerConfig, ProbeConfig, SiteConfig};
use crate::io::http::{HttpClient, HttpError, HttpRequest, HttpResponse, Method};
use crate::probe::Signals;

pub const TEST_BASE_URL: &str = "http://site.test";

/// Temp document root plus a dispatcher whose upstream is [`FakeUpstream`].
pub struct TestSite {
    pub temp: TempDir,
    pub site: SiteConfig,
    pub dispatcher: Dispatcher,
}

impl Default for TestSite {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSite {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let document_root = temp.path().join("public");
        fs::create_dir_all(&document_root).expect("create document root");
        let site = SiteConfig {
            document_root,
            base_url: TEST_BASE_URL.to_string(),
            state_path: temp.path().join("state.json"),
            ..SiteConfig::default()
        };
        Self {
            temp,
            site,
            dispatcher: Dispatcher::new(Arc::new(FakeUpstream)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.site.document_root
    }

    /// Point the rewrite config at `<root>/.htaccess` (not created).
    pub fn with_rewrite_config(mut self) -> Self {
        self.site.rewrite_config = Some(self.site.document_root.join(".htaccess"));
        self
    }

    pub fn rewrite_config(&self) -> PathBuf {
        self.site
            .rewrite_config
            .clone()
            .expect("rewrite config configured")
    }

    /// Replace the rewrite config with a directory so every write fails,
    /// regardless of the user running the tests.
    pub fn break_rewrite_config(&self) {
        let path = self.rewrite_config();
        if path.is_file() {
            fs::remove_file(&path).expect("remove rewrite config");
        }
        fs::create_dir_all(&path).expect("create blocking directory");
    }

    /// Move the document root beneath a regular file so writes fail.
    pub fn make_docroot_unwritable(&mut self) {
        let blocker = self.temp.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");
        self.site.document_root = blocker.join("public");
    }

    pub fn config(&self) -> DeployerConfig {
        DeployerConfig {
            site: self.site.clone(),
            probe: ProbeConfig {
                run_version_commands: false,
                ..ProbeConfig::default()
            },
            ..DeployerConfig::default()
        }
    }

    pub fn block_context<'a>(
        &'a self,
        profile: &'a ServerProfile,
        endpoint: &'a Endpoint,
    ) -> BlockContext<'a> {
        BlockContext::new(&self.site, profile, &self.dispatcher, endpoint)
    }

    pub fn env<'a>(&'a self, profile: &'a ServerProfile) -> DeployEnv<'a> {
        DeployEnv {
            site: &self.site,
            profile,
            dispatcher: &self.dispatcher,
        }
    }

    pub fn fake_site(&self) -> FakeSite {
        FakeSite::new(self.site.clone(), self.dispatcher.clone())
    }

    /// Every file (with contents) and directory under the document root.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        let mut entries = BTreeMap::new();
        if self.root().is_dir() {
            walk(self.root(), self.root(), &mut entries);
        }
        entries
    }
}

fn walk(root: &Path, dir: &Path, entries: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
    for entry in fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("dir entry").path();
        let relative = path.strip_prefix(root).expect("under root").to_path_buf();
        if path.is_dir() {
            entries.insert(relative, None);
            walk(root, &path, entries);
        } else {
            entries.insert(relative, Some(fs::read(&path).expect("read file")));
        }
    }
}

/// Upstream that always answers `{"upstream":true}`.
pub struct FakeUpstream;

impl HttpClient for FakeUpstream {
    fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: br#"{"upstream":true}"#.to_vec(),
        })
    }
}

/// In-process web server: files under the document root first, then the
/// dispatcher, then 404. Toggles model hosts that break either path.
pub struct FakeSite {
    site: SiteConfig,
    dispatcher: Dispatcher,
    static_enabled: AtomicBool,
    dynamic_enabled: AtomicBool,
    unreachable: AtomicBool,
    requests: AtomicUsize,
    seen_paths: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new(site: SiteConfig, dispatcher: Dispatcher) -> Self {
        Self {
            site,
            dispatcher,
            static_enabled: AtomicBool::new(true),
            dynamic_enabled: AtomicBool::new(true),
            unreachable: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    /// When false, the server never serves files from disk (front controller
    /// captures every request).
    pub fn set_static_enabled(&self, enabled: bool) {
        self.static_enabled.store(enabled, Ordering::SeqCst);
    }

    /// When false, unmatched requests never reach the application.
    pub fn set_dynamic_enabled(&self, enabled: bool) {
        self.dynamic_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn seen_paths(&self) -> Vec<String> {
        self.seen_paths.lock().expect("lock").clone()
    }

    fn serve_static(&self, path: &str) -> Option<HttpResponse> {
        let physical = self.site.physical_path(path).ok()?;
        let body = fs::read(&physical).ok()?;
        Some(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), guess_content_type(path).to_string())],
            body,
        })
    }
}

impl HttpClient for FakeSite {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HttpError::Connect("connection refused".to_string()));
        }
        let rest = request
            .url
            .strip_prefix(self.site.base_url.trim_end_matches('/'))
            .ok_or_else(|| HttpError::Connect(format!("unknown host in {}", request.url)))?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };
        self.seen_paths.lock().expect("lock").push(path.to_string());

        if self.static_enabled.load(Ordering::SeqCst)
            && let Some(response) = self.serve_static(path)
        {
            return Ok(response);
        }
        if self.dynamic_enabled.load(Ordering::SeqCst) {
            let dispatch = DispatchRequest {
                method: request.method.as_str().to_string(),
                path: path.to_string(),
                query,
                headers: request.headers.clone(),
                body: request.body.clone(),
            };
            if let Some(response) = self.dispatcher.dispatch(&dispatch) {
                return Ok(HttpResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                });
            }
        }
        Ok(HttpResponse {
            status: 404,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: b"<h1>Not Found</h1>".to_vec(),
        })
    }
}

fn guess_content_type(path: &str) -> &'static str {
    if path.ends_with(".json") {
        "application/json"
    } else if path.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Profile of a writable Apache host with rewrite support.
pub fn apache_profile() -> ServerProfile {
    ServerProfile {
        platform_type: PlatformType::Apache,
        config_rewrite_supported: true,
        filesystem_writable: true,
        hosting_tier: HostingTier::Dedicated,
    }
}

/// Signals with nothing set and no version commands.
pub fn test_signals() -> Signals {
    Signals {
        env: BTreeMap::new(),
        run_version_commands: false,
        control_panel_roots: Vec::new(),
    }
}

pub fn json_endpoint(path: &str, body: &str) -> Endpoint {
    Endpoint::document(
        path,
        static_generator(Content::new(body.as_bytes().to_vec(), "application/json")),
    )
    .expect("valid endpoint")
}

/// Document endpoint whose generator counts its calls.
pub fn counting_endpoint(path: &str) -> (Endpoint, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let endpoint = Endpoint::document(
        path,
        Arc::new(move || -> anyhow::Result<Content> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Content::new(br#"{"v":1}"#.to_vec(), "application/json"))
        }),
    )
    .expect("valid endpoint");
    (endpoint, calls)
}

pub fn section_endpoint(path: &str, shared_file: &str, body: &str) -> Endpoint {
    Endpoint::shared_section(
        path,
        shared_file,
        "#",
        static_generator(Content::new(body.as_bytes().to_vec(), "text/plain")),
    )
    .expect("valid endpoint")
}

pub fn proxy_endpoint(path: &str, upstream: &str) -> Endpoint {
    Endpoint::proxy(
        path,
        ProxyTarget {
            upstream: upstream.to_string(),
            timeout: Duration::from_secs(2),
            allow_origin: "*".to_string(),
        },
        vec![Method::Get, Method::Post],
        static_generator(Content::new(br#"{"status":"ok"}"#.to_vec(), "application/json")),
    )
    .expect("valid endpoint")
}
