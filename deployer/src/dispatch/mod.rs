//! Request-time dispatch for dynamically served endpoints.
//!
//! The host hands every request it cannot serve from disk to
//! [`Dispatcher::dispatch`]. Unrelated paths leave through the fast-path
//! guard before any other work happens.

mod proxy;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::endpoint::{ContentGenerator, ProxyTarget};
use crate::io::http::{HttpClient, Method};

pub use proxy::forward;

/// Header naming the handler that produced a dispatched response.
pub const HANDLER_HEADER: &str = "x-deployer-handler";
/// Header carrying the nonce of a transient probe route.
pub const PROBE_HEADER: &str = "x-deployer-probe";

/// Incoming request as seen by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DispatchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// HEAD is answered like GET, without a body.
    fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    fn parsed_method(&self) -> Option<Method> {
        match self.method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Some(Method::Get),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DispatchResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn error_json(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string().into_bytes();
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body)
    }
}

/// Serves generator output at request time.
#[derive(Clone)]
pub struct ContentRoute {
    pub generator: ContentGenerator,
    pub methods: Vec<Method>,
    /// Set only on transient routes installed by the route tester.
    pub probe_nonce: Option<String>,
}

/// Forwards to an upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub target: ProxyTarget,
    pub methods: Vec<Method>,
}

#[derive(Clone)]
pub enum RouteBinding {
    Content(ContentRoute),
    Proxy(ProxyRoute),
}

impl RouteBinding {
    pub fn handler_name(&self) -> &'static str {
        match self {
            RouteBinding::Content(route) if route.probe_nonce.is_some() => "probe",
            RouteBinding::Content(_) => "dynamic",
            RouteBinding::Proxy(_) => "proxy",
        }
    }
}

/// Route table shared between the manager and the request path.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RwLock<HashMap<String, Arc<RouteBinding>>>>,
    upstream: Arc<dyn HttpClient>,
}

impl Dispatcher {
    pub fn new(upstream: Arc<dyn HttpClient>) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            upstream,
        }
    }

    /// Install `binding` at `path`, returning the binding it replaced.
    pub fn bind(&self, path: &str, binding: RouteBinding) -> Option<RouteBinding> {
        debug!(path, handler = binding.handler_name(), "binding route");
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes
            .insert(path.to_string(), Arc::new(binding))
            .map(|previous| (*previous).clone())
    }

    /// Remove the binding at `path`, returning it.
    pub fn unbind(&self, path: &str) -> Option<RouteBinding> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let removed = routes.remove(path).map(|previous| (*previous).clone());
        if removed.is_some() {
            debug!(path, "unbound route");
        }
        removed
    }

    /// Put `previous` back at `path`, or clear the path when there was none.
    pub fn restore(&self, path: &str, previous: Option<RouteBinding>) {
        match previous {
            Some(binding) => {
                self.bind(path, binding);
            }
            None => {
                self.unbind(path);
            }
        }
    }

    /// Fast-path guard: true when `path` has a binding.
    pub fn handles(&self, path: &str) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.contains_key(path)
    }

    pub fn routes(&self) -> Vec<String> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = routes.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Answer `request` if its path is bound; `None` means "not mine".
    pub fn dispatch(&self, request: &DispatchRequest) -> Option<DispatchResponse> {
        let binding = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(routes.get(&request.path)?)
        };
        let mut response = match binding.as_ref() {
            RouteBinding::Content(route) => serve_content(route, request),
            RouteBinding::Proxy(route) => forward(route, self.upstream.as_ref(), request),
        };
        if request.is_head() {
            response.body.clear();
        }
        Some(response.with_header(HANDLER_HEADER, binding.handler_name()))
    }
}

fn serve_content(route: &ContentRoute, request: &DispatchRequest) -> DispatchResponse {
    let allowed = request
        .parsed_method()
        .is_some_and(|method| route.methods.contains(&method));
    if !allowed {
        return DispatchResponse::new(405).with_header("allow", allow_header(&route.methods));
    }
    match (route.generator)() {
        Ok(content) => {
            let mut response = DispatchResponse::new(200)
                .with_header("content-type", content.content_type)
                .with_header("cache-control", "no-cache");
            if let Some(nonce) = &route.probe_nonce {
                response = response.with_header(PROBE_HEADER, nonce.clone());
            }
            response.with_body(content.body)
        }
        Err(err) => {
            warn!(path = %request.path, err = %err, "content generator failed");
            DispatchResponse::error_json(500, "content unavailable")
        }
    }
}

pub(crate) fn allow_header(methods: &[Method]) -> String {
    methods
        .iter()
        .map(|method| method.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
