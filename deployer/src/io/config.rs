//! Deployer configuration stored in `deployer.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::paths::{relative_fs_path, validate_public_path};
use crate::core::types::EndpointKind;

/// Deployer configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// work for a site served from `./public` on the local machine. Relative
/// paths are resolved against the directory holding the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployerConfig {
    pub site: SiteConfig,
    pub http: HttpConfig,
    pub probe: ProbeConfig,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SiteConfig {
    /// Directory the web server serves files from.
    pub document_root: PathBuf,

    /// Public origin used for round-trip probes (`https://example.org`).
    pub base_url: String,

    /// Application entry point that rewrite rules fall back to.
    pub front_controller: String,

    /// Config file that accepts rewrite fragments (`.htaccess`, nginx include).
    pub rewrite_config: Option<PathBuf>,

    /// JSON file backing the persisted strategy state.
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout for probe round-trips, in seconds.
    pub timeout_secs: u64,

    pub verify_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Overrides the detected server identity (e.g. `nginx`).
    pub declared_server: Option<String>,

    /// Ask local server binaries for their version as an extra signal.
    pub run_version_commands: bool,

    pub version_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub path: String,
    pub kind: EndpointKind,

    /// File read on every generator call; edits show up without re-registering.
    pub content_file: Option<PathBuf>,

    pub content_type: String,
    pub methods: Vec<String>,

    /// Public path of the shared file (`shared_section` endpoints only).
    pub shared_file: Option<String>,

    /// Comment prefix for section markers in the shared file.
    pub comment_prefix: String,

    /// Upstream URL (`proxy` endpoints only).
    pub upstream: Option<String>,

    pub proxy_timeout_secs: u64,
    pub allow_origin: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("public"),
            base_url: "http://127.0.0.1:3001".to_string(),
            front_controller: "index.php".to_string(),
            rewrite_config: None,
            state_path: PathBuf::from(".deployer/state.json"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            verify_tls: true,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            declared_server: None,
            run_version_commands: true,
            version_timeout_secs: 2,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            kind: EndpointKind::Document,
            content_file: None,
            content_type: "application/json".to_string(),
            methods: vec!["GET".to_string()],
            shared_file: None,
            comment_prefix: "#".to_string(),
            upstream: None,
            proxy_timeout_secs: 10,
            allow_origin: "*".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProbeConfig {
    pub fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_secs)
    }
}

impl SiteConfig {
    /// Physical location of a public path under the document root.
    pub fn physical_path(&self, public_path: &str) -> Result<PathBuf, String> {
        Ok(self.document_root.join(relative_fs_path(public_path)?))
    }

    /// Absolute URL of a public path.
    pub fn public_url(&self, public_path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), public_path)
    }
}

impl DeployerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(anyhow!("http.timeout_secs must be > 0"));
        }
        if self.probe.version_timeout_secs == 0 {
            return Err(anyhow!("probe.version_timeout_secs must be > 0"));
        }
        if !(self.site.base_url.starts_with("http://") || self.site.base_url.starts_with("https://"))
        {
            return Err(anyhow!("site.base_url must be an http(s) URL"));
        }
        if self.site.front_controller.trim().is_empty() {
            return Err(anyhow!("site.front_controller must not be empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for endpoint in &self.endpoints {
            validate_public_path(&endpoint.path)
                .map_err(|err| anyhow!("endpoints: {err}"))?;
            if !seen.insert(endpoint.path.as_str()) {
                return Err(anyhow!("endpoints: duplicate path '{}'", endpoint.path));
            }
            endpoint.validate()?;
        }
        Ok(())
    }

    /// Resolve relative paths against `base`.
    pub fn resolve_relative(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.site.document_root);
        resolve(&mut self.site.state_path);
        if let Some(rewrite) = self.site.rewrite_config.as_mut() {
            resolve(rewrite);
        }
        for endpoint in &mut self.endpoints {
            if let Some(file) = endpoint.content_file.as_mut() {
                resolve(file);
            }
        }
    }
}

impl EndpointConfig {
    fn validate(&self) -> Result<()> {
        if self.methods.is_empty() {
            return Err(anyhow!("endpoint '{}': methods must not be empty", self.path));
        }
        match self.kind {
            EndpointKind::Document => {
                if self.content_file.is_none() {
                    return Err(anyhow!(
                        "endpoint '{}': document endpoints need content_file",
                        self.path
                    ));
                }
            }
            EndpointKind::SharedSection => {
                let shared = self.shared_file.as_deref().ok_or_else(|| {
                    anyhow!("endpoint '{}': shared_section needs shared_file", self.path)
                })?;
                validate_public_path(shared)
                    .map_err(|err| anyhow!("endpoint '{}': {err}", self.path))?;
                if self.content_file.is_none() {
                    return Err(anyhow!(
                        "endpoint '{}': shared_section endpoints need content_file",
                        self.path
                    ));
                }
            }
            EndpointKind::Proxy => {
                let upstream = self.upstream.as_deref().ok_or_else(|| {
                    anyhow!("endpoint '{}': proxy endpoints need upstream", self.path)
                })?;
                if !(upstream.starts_with("http://") || upstream.starts_with("https://")) {
                    return Err(anyhow!(
                        "endpoint '{}': upstream must be an http(s) URL",
                        self.path
                    ));
                }
                if self.proxy_timeout_secs == 0 {
                    return Err(anyhow!(
                        "endpoint '{}': proxy_timeout_secs must be > 0",
                        self.path
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file and resolve relative paths.
///
/// If the file is missing, returns `DeployerConfig::default()` resolved
/// against the file's directory.
pub fn load_config(path: &Path) -> Result<DeployerConfig> {
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<DeployerConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?
    } else {
        DeployerConfig::default()
    };
    cfg.validate()?;
    cfg.resolve_relative(&base);
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DeployerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
