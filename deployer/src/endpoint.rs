//! Endpoints and their content generators.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};

use crate::core::paths::validate_public_path;
use crate::core::types::EndpointKind;
use crate::io::config::EndpointConfig;
use crate::io::http::Method;

/// Generated payload for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl Content {
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }
}

/// Opaque payload producer. Called once per registration for probing and on
/// every request for dynamically served endpoints.
pub type ContentGenerator = Arc<dyn Fn() -> Result<Content> + Send + Sync>;

/// Where a shared-section endpoint places its section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSection {
    /// Public path of the shared file (e.g. `/robots.txt`).
    pub file: String,
    pub comment_prefix: String,
}

/// Upstream a proxy endpoint forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub upstream: String,
    pub timeout: Duration,
    pub allow_origin: String,
}

#[derive(Clone)]
pub struct Endpoint {
    pub path: String,
    pub kind: EndpointKind,
    pub generator: ContentGenerator,
    pub supported_methods: Vec<Method>,
    pub registered_at: DateTime<Utc>,
    pub shared: Option<SharedSection>,
    pub proxy: Option<ProxyTarget>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("supported_methods", &self.supported_methods)
            .field("registered_at", &self.registered_at)
            .field("shared", &self.shared)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// A standalone resource served at `path`.
    pub fn document(path: impl Into<String>, generator: ContentGenerator) -> Result<Self> {
        Self::build(path.into(), EndpointKind::Document, generator)
    }

    /// A marker-delimited section inside the shared file at `shared_file`.
    pub fn shared_section(
        path: impl Into<String>,
        shared_file: impl Into<String>,
        comment_prefix: impl Into<String>,
        generator: ContentGenerator,
    ) -> Result<Self> {
        let file = shared_file.into();
        validate_public_path(&file).map_err(|err| anyhow!("shared file: {err}"))?;
        let mut endpoint = Self::build(path.into(), EndpointKind::SharedSection, generator)?;
        endpoint.shared = Some(SharedSection {
            file,
            comment_prefix: comment_prefix.into(),
        });
        Ok(endpoint)
    }

    /// A route forwarding to `target`. The generator supplies the probe payload.
    pub fn proxy(
        path: impl Into<String>,
        target: ProxyTarget,
        methods: Vec<Method>,
        generator: ContentGenerator,
    ) -> Result<Self> {
        if !(target.upstream.starts_with("http://") || target.upstream.starts_with("https://")) {
            return Err(anyhow!("upstream must be an http(s) URL"));
        }
        let mut endpoint = Self::build(path.into(), EndpointKind::Proxy, generator)?;
        endpoint.proxy = Some(target);
        endpoint.supported_methods = methods;
        Ok(endpoint)
    }

    fn build(path: String, kind: EndpointKind, generator: ContentGenerator) -> Result<Self> {
        validate_public_path(&path).map_err(|err| anyhow!("endpoint path: {err}"))?;
        Ok(Self {
            path,
            kind,
            generator,
            supported_methods: vec![Method::Get],
            registered_at: Utc::now(),
            shared: None,
            proxy: None,
        })
    }

    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.supported_methods = methods;
        self
    }

    /// Build an endpoint from its `[[endpoints]]` table.
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        let methods = config
            .methods
            .iter()
            .map(|method| parse_method(method))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("endpoint '{}'", config.path))?;
        let generator = file_generator(config.content_file.clone(), config.content_type.clone());

        let endpoint = match config.kind {
            EndpointKind::Document => Self::document(config.path.clone(), generator)?,
            EndpointKind::SharedSection => {
                let file = config
                    .shared_file
                    .clone()
                    .ok_or_else(|| anyhow!("endpoint '{}': missing shared_file", config.path))?;
                Self::shared_section(
                    config.path.clone(),
                    file,
                    config.comment_prefix.clone(),
                    generator,
                )?
            }
            EndpointKind::Proxy => {
                let upstream = config
                    .upstream
                    .clone()
                    .ok_or_else(|| anyhow!("endpoint '{}': missing upstream", config.path))?;
                let target = ProxyTarget {
                    upstream,
                    timeout: Duration::from_secs(config.proxy_timeout_secs),
                    allow_origin: config.allow_origin.clone(),
                };
                return Self::proxy(config.path.clone(), target, methods, generator);
            }
        };
        Ok(endpoint.with_methods(methods))
    }

    /// Public path whose response reflects this endpoint's content.
    pub fn public_path(&self) -> &str {
        match &self.shared {
            Some(shared) => &shared.file,
            None => &self.path,
        }
    }

    pub fn generate(&self) -> Result<Content> {
        (self.generator)().with_context(|| format!("generate content for {}", self.path))
    }

    pub fn supports(&self, method: Method) -> bool {
        self.supported_methods.contains(&method)
    }
}

pub fn parse_method(raw: &str) -> Result<Method> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::Get),
        "POST" => Ok(Method::Post),
        other => Err(anyhow!("unsupported method '{other}'")),
    }
}

/// Generator that re-reads `file` on each call, so edits show up without
/// re-registering. Without a file it serves a small JSON status document.
fn file_generator(file: Option<PathBuf>, content_type: String) -> ContentGenerator {
    Arc::new(move || -> Result<Content> {
        match &file {
            Some(path) => {
                let body = fs::read(path).with_context(|| format!("read {}", path.display()))?;
                Ok(Content::new(body, content_type.clone()))
            }
            None => Ok(Content::new(
                br#"{"status":"ok"}"#.to_vec(),
                "application/json",
            )),
        }
    })
}

/// Generator returning fixed content.
pub fn static_generator(content: Content) -> ContentGenerator {
    Arc::new(move || -> Result<Content> { Ok(content.clone()) })
}
