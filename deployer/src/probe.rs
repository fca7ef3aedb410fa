//! Environment probe: classify the server and confirm write capabilities.
//!
//! Identity signals (declared server strings, marker files, local binaries)
//! are advisory. Capabilities are only reported after they were exercised:
//! a marker fragment is written to and removed from the rewrite config, and a
//! directory is created and removed under the document root. Any failure
//! downgrades the flag; probing never returns an error.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, instrument, warn};

use crate::core::markers::SectionMarkers;
use crate::core::types::{HostingTier, PlatformType, ServerProfile};
use crate::io::config::{ProbeConfig, SiteConfig};
use crate::io::fsops::{edit_locked, read_optional, remove_file_if_exists};
use crate::io::process::version_banner;

/// Environment variables set by managed hosting platforms.
const MANAGED_ENV_MARKERS: [&str; 5] = [
    "IS_WPE",
    "PANTHEON_ENVIRONMENT",
    "KINSTA_CACHE_ZONE",
    "PRESSABLE_SITE_ID",
    "WPAAS_SITE_ID",
];

/// Install roots of hosting control panels.
const CONTROL_PANEL_ROOTS: [&str; 3] = [
    "/usr/local/cpanel",
    "/usr/local/psa",
    "/usr/local/directadmin",
];

/// Version queries, in the order they are tried.
const VERSION_COMMANDS: [(&str, &[&str]); 5] = [
    ("nginx", &["-v"]),
    ("apachectl", &["-v"]),
    ("httpd", &["-v"]),
    ("lshttpd", &["-v"]),
    ("caddy", &["version"]),
];

/// Random alphanumeric tag for transient artifacts.
pub(crate) fn random_tag(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Inputs the probe reads from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub env: BTreeMap<String, String>,
    pub run_version_commands: bool,
    pub control_panel_roots: Vec<PathBuf>,
}

impl Signals {
    pub fn from_process_env(config: &ProbeConfig) -> Self {
        let env = env::vars()
            .filter(|(key, _)| key == "SERVER_SOFTWARE" || MANAGED_ENV_MARKERS.contains(&key.as_str()))
            .collect();
        Self {
            env,
            run_version_commands: config.run_version_commands,
            control_panel_roots: CONTROL_PANEL_ROOTS.iter().map(PathBuf::from).collect(),
        }
    }
}

pub struct EnvironmentProbe<'a> {
    site: &'a SiteConfig,
    config: &'a ProbeConfig,
    signals: &'a Signals,
}

impl<'a> EnvironmentProbe<'a> {
    pub fn new(site: &'a SiteConfig, config: &'a ProbeConfig, signals: &'a Signals) -> Self {
        Self {
            site,
            config,
            signals,
        }
    }

    /// Fresh profile of the current environment.
    #[instrument(skip_all, fields(document_root = %self.site.document_root.display()))]
    pub fn probe(&self) -> ServerProfile {
        let (platform_type, local_binary) = self.detect_platform();
        let config_rewrite_supported = platform_type.accepts_rewrite_fragments()
            && self
                .site
                .rewrite_config
                .as_deref()
                .is_some_and(check_rewrite_writable);
        let filesystem_writable = check_dir_writable(&self.site.document_root);
        let hosting_tier = self.detect_tier(local_binary);

        let profile = ServerProfile {
            platform_type,
            config_rewrite_supported,
            filesystem_writable,
            hosting_tier,
        };
        info!(
            platform = %profile.platform_type,
            rewrite = profile.config_rewrite_supported,
            writable = profile.filesystem_writable,
            tier = ?profile.hosting_tier,
            "environment probed"
        );
        profile
    }

    /// Platform plus whether a server binary answered locally.
    fn detect_platform(&self) -> (PlatformType, bool) {
        let declared = self
            .config
            .declared_server
            .as_deref()
            .or_else(|| self.signals.env.get("SERVER_SOFTWARE").map(String::as_str));
        if let Some(identity) = declared {
            let platform = PlatformType::from_identity(identity);
            if platform != PlatformType::Unknown {
                debug!(identity, %platform, "platform from declared identity");
                return (platform, self.local_binary_answers(platform));
            }
        }

        let root = &self.site.document_root;
        if root.join("web.config").is_file() {
            return (PlatformType::Iis, false);
        }
        if root.join(".htaccess").is_file() {
            return (PlatformType::Apache, self.local_binary_answers(PlatformType::Apache));
        }

        if self.signals.run_version_commands {
            for (program, args) in VERSION_COMMANDS {
                if let Some(banner) = version_banner(program, args, self.config.version_timeout())
                {
                    let platform = PlatformType::from_identity(&banner);
                    if platform != PlatformType::Unknown {
                        debug!(program, %platform, "platform from version query");
                        return (platform, true);
                    }
                }
            }
        }
        (PlatformType::Unknown, false)
    }

    fn local_binary_answers(&self, platform: PlatformType) -> bool {
        if !self.signals.run_version_commands {
            return false;
        }
        VERSION_COMMANDS.iter().any(|(program, args)| {
            version_banner(program, args, self.config.version_timeout())
                .is_some_and(|banner| PlatformType::from_identity(&banner) == platform)
        })
    }

    fn detect_tier(&self, local_binary: bool) -> HostingTier {
        if MANAGED_ENV_MARKERS
            .iter()
            .any(|key| self.signals.env.contains_key(*key))
        {
            return HostingTier::Managed;
        }
        if self
            .signals
            .control_panel_roots
            .iter()
            .any(|root| root.exists())
        {
            return HostingTier::Shared;
        }
        if local_binary {
            return HostingTier::Dedicated;
        }
        HostingTier::Unknown
    }
}

/// Append and remove a marker fragment, then put the original bytes back.
fn check_rewrite_writable(path: &Path) -> bool {
    let original = match read_optional(path) {
        Ok(original) => original,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "rewrite config unreadable");
            return false;
        }
    };
    let markers = SectionMarkers::new("#", &format!("probe-{}", random_tag(8)));
    let appended = edit_locked(path, true, |text| {
        Ok(markers.append(text, "# capability check"))
    });
    let result = match appended {
        Ok(outcome) if outcome.changed => {
            edit_locked(path, false, |text| markers.remove(text)).map(|_| ())
        }
        Ok(_) => Ok(()),
        Err(err) => Err(err),
    };

    let restored = match &original {
        Some(bytes) => fs::write(path, bytes),
        None => remove_file_if_exists(path).map(|_| ()),
    };
    if let Err(err) = restored {
        warn!(path = %path.display(), err = %err, "could not restore rewrite config");
        return false;
    }
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "rewrite config not writable");
            false
        }
    }
}

/// Create and remove a temporary directory under `root`.
fn check_dir_writable(root: &Path) -> bool {
    let probe_dir = root.join(format!(".deployer-probe-{}", random_tag(8)));
    match fs::create_dir(&probe_dir) {
        Ok(()) => {
            if let Err(err) = fs::remove_dir(&probe_dir) {
                warn!(dir = %probe_dir.display(), err = %err, "could not remove probe directory");
            }
            true
        }
        Err(err) => {
            debug!(root = %root.display(), err = %err, "document root not writable");
            false
        }
    }
}
