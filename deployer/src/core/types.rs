//! Shared deterministic types for the deployment core.
//!
//! These types define the contracts between the probe, the route tester, the
//! building blocks, and the manager. They carry no I/O handles so they can be
//! compared, serialized, and asserted on directly in tests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{BlockError, CleanupError, ProbeError};

/// Web server software fronting the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Apache,
    Nginx,
    Litespeed,
    Iis,
    Caddy,
    Unknown,
}

impl PlatformType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformType::Apache => "apache",
            PlatformType::Nginx => "nginx",
            PlatformType::Litespeed => "litespeed",
            PlatformType::Iis => "iis",
            PlatformType::Caddy => "caddy",
            PlatformType::Unknown => "unknown",
        }
    }

    /// Parse a declared server identity such as `Apache/2.4.58 (Ubuntu)`.
    pub fn from_identity(identity: &str) -> PlatformType {
        let lowered = identity.to_ascii_lowercase();
        if lowered.contains("litespeed") || lowered.contains("lshttpd") {
            PlatformType::Litespeed
        } else if lowered.contains("apache") || lowered.contains("httpd") {
            PlatformType::Apache
        } else if lowered.contains("nginx") || lowered.contains("openresty") {
            PlatformType::Nginx
        } else if lowered.contains("iis") {
            PlatformType::Iis
        } else if lowered.contains("caddy") {
            PlatformType::Caddy
        } else {
            PlatformType::Unknown
        }
    }

    /// True when rewrite fragments can be dropped into a config file the
    /// engine manages (per-directory `.htaccess` or an nginx include).
    pub fn accepts_rewrite_fragments(self) -> bool {
        matches!(
            self,
            PlatformType::Apache | PlatformType::Litespeed | PlatformType::Nginx
        )
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of the hosting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingTier {
    Dedicated,
    Shared,
    Managed,
    Unknown,
}

/// Snapshot of what the environment probe learned. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub platform_type: PlatformType,
    pub config_rewrite_supported: bool,
    pub filesystem_writable: bool,
    pub hosting_tier: HostingTier,
}

impl ServerProfile {
    /// Profile used when nothing could be learned.
    pub fn unknown() -> Self {
        Self {
            platform_type: PlatformType::Unknown,
            config_rewrite_supported: false,
            filesystem_writable: false,
            hosting_tier: HostingTier::Unknown,
        }
    }
}

/// What an endpoint publishes; selects its ordered strategy list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// A standalone resource owned entirely by the engine (manifest, policy page).
    Document,
    /// A section inside a file that also holds unrelated content.
    SharedSection,
    /// A route forwarding requests to an upstream API.
    Proxy,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Document => "document",
            EndpointKind::SharedSection => "shared_section",
            EndpointKind::Proxy => "proxy",
        }
    }
}

/// Delivery mechanism under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    StaticFile,
    DynamicRoute,
}

impl Approach {
    pub fn as_str(self) -> &'static str {
        match self {
            Approach::StaticFile => "static_file",
            Approach::DynamicRoute => "dynamic_route",
        }
    }

    pub fn other(self) -> Approach {
        match self {
            Approach::StaticFile => Approach::DynamicRoute,
            Approach::DynamicRoute => Approach::StaticFile,
        }
    }
}

/// Outcome of one empirical round-trip for one approach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub approach: Approach,
    pub success: bool,
    pub http_status: Option<u16>,
    pub content_verified: bool,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn passed(approach: Approach, http_status: u16) -> Self {
        Self {
            approach,
            success: true,
            http_status: Some(http_status),
            content_verified: true,
            error: None,
        }
    }

    pub fn failed(approach: Approach, http_status: Option<u16>, error: ProbeError) -> Self {
        Self {
            approach,
            success: false,
            http_status,
            content_verified: false,
            error: Some(error),
        }
    }
}

/// What the route tester suggests after testing both approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StaticFile,
    DynamicRoute,
    ManualInterventionRequired,
}

/// Both probe results for one endpoint from a single test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTestReport {
    pub static_file: ProbeResult,
    pub dynamic_route: ProbeResult,
    pub tested_at: DateTime<Utc>,
}

impl RouteTestReport {
    pub fn result_for(&self, approach: Approach) -> &ProbeResult {
        match approach {
            Approach::StaticFile => &self.static_file,
            Approach::DynamicRoute => &self.dynamic_route,
        }
    }

    pub fn round_trips(&self, approach: Approach) -> bool {
        self.result_for(approach).success
    }

    /// Static wins when it works (no per-request cost), then dynamic.
    pub fn recommendation(&self) -> Recommendation {
        if self.static_file.success {
            Recommendation::StaticFile
        } else if self.dynamic_route.success {
            Recommendation::DynamicRoute
        } else {
            Recommendation::ManualInterventionRequired
        }
    }
}

/// Closed set of building blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockId {
    WriteStaticFile,
    AddRewriteRule,
    RegisterDynamicRoute,
    AppendToSharedFile,
    SuggestAlternateConfig,
    RegisterProxyRoute,
}

impl BlockId {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockId::WriteStaticFile => "write-static-file",
            BlockId::AddRewriteRule => "add-rewrite-rule",
            BlockId::RegisterDynamicRoute => "register-dynamic-route",
            BlockId::AppendToSharedFile => "append-to-shared-file",
            BlockId::SuggestAlternateConfig => "suggest-alternate-config",
            BlockId::RegisterProxyRoute => "register-proxy-route",
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts a block produced (paths, route keys) plus optional free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockOutput {
    pub artifact_refs: Vec<String>,
    pub detail: Option<String>,
}

/// Tagged result of a single block execute or cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockResult {
    pub block_id: BlockId,
    pub outcome: Result<BlockOutput, BlockError>,
}

impl BlockResult {
    pub fn ok(block_id: BlockId, artifact_refs: Vec<String>) -> Self {
        Self {
            block_id,
            outcome: Ok(BlockOutput {
                artifact_refs,
                detail: None,
            }),
        }
    }

    pub fn ok_with_detail(block_id: BlockId, artifact_refs: Vec<String>, detail: String) -> Self {
        Self {
            block_id,
            outcome: Ok(BlockOutput {
                artifact_refs,
                detail: Some(detail),
            }),
        }
    }

    pub fn err(block_id: BlockId, error: BlockError) -> Self {
        Self {
            block_id,
            outcome: Err(error),
        }
    }

    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&BlockError> {
        self.outcome.as_ref().err()
    }

    pub fn artifact_refs(&self) -> &[String] {
        match &self.outcome {
            Ok(output) => &output.artifact_refs,
            Err(_) => &[],
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match &self.outcome {
            Ok(output) => output.detail.as_deref(),
            Err(_) => None,
        }
    }
}

/// Record of the reverse pass after a failed run (or a teardown).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// Blocks whose cleanup succeeded, in the order they were reversed.
    pub reversed: Vec<BlockId>,
    /// Cleanup failures. Never replace the error that triggered rollback.
    pub failures: Vec<CleanupError>,
}

impl CleanupSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full per-block account of one executor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub strategy: String,
    pub success: bool,
    /// Blocks whose execute succeeded, in run order.
    pub blocks_executed: Vec<BlockId>,
    /// The block that stopped the run, if any.
    pub blocks_failed: Vec<BlockId>,
    pub block_results: Vec<BlockResult>,
    pub cleanup_summary: CleanupSummary,
}

impl ExecutionResult {
    /// The error that stopped the run.
    pub fn failure(&self) -> Option<&BlockError> {
        self.block_results.iter().find_map(BlockResult::error)
    }

    /// First free-text detail any block produced (config suggestions).
    pub fn detail(&self) -> Option<&str> {
        self.block_results.iter().find_map(BlockResult::detail)
    }
}

/// Persisted deployment status of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    StaticDeployed,
    DynamicDeployed,
    /// Nothing is deployed. With `manual-config` as the strategy, only a
    /// config suggestion exists and someone has to apply it.
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::StaticDeployed => "static_deployed",
            DeploymentStatus::DynamicDeployed => "dynamic_deployed",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn is_deployed(self) -> bool {
        matches!(
            self,
            DeploymentStatus::StaticDeployed | DeploymentStatus::DynamicDeployed
        )
    }
}

/// Per-endpoint strategy record (persisted through the state store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyState {
    pub endpoint_path: String,
    pub status: DeploymentStatus,
    /// Strategy that is active, or that was attempted when `status` is `failed`.
    pub current_strategy: Option<String>,
    /// Index of `current_strategy` in the endpoint kind's preference list.
    pub current_strategy_rank: usize,
    pub last_tested_at: DateTime<Utc>,
    /// Whether the other delivery approach also round-tripped.
    pub alternates_also_work: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl StrategyState {
    /// True when nothing is deployed and a human has to step in.
    pub fn needs_manual_intervention(&self) -> bool {
        self.status == DeploymentStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_from_identity_prefers_litespeed_over_apache_alias() {
        assert_eq!(
            PlatformType::from_identity("LiteSpeed"),
            PlatformType::Litespeed
        );
        assert_eq!(
            PlatformType::from_identity("Apache/2.4.58 (Ubuntu)"),
            PlatformType::Apache
        );
        assert_eq!(
            PlatformType::from_identity("nginx/1.25.3"),
            PlatformType::Nginx
        );
        assert_eq!(
            PlatformType::from_identity("Microsoft-IIS/10.0"),
            PlatformType::Iis
        );
        assert_eq!(PlatformType::from_identity(""), PlatformType::Unknown);
    }

    #[test]
    fn recommendation_prefers_static_then_dynamic() {
        let now = Utc::now();
        let mut report = RouteTestReport {
            static_file: ProbeResult::passed(Approach::StaticFile, 200),
            dynamic_route: ProbeResult::passed(Approach::DynamicRoute, 200),
            tested_at: now,
        };
        assert_eq!(report.recommendation(), Recommendation::StaticFile);

        report.static_file =
            ProbeResult::failed(Approach::StaticFile, Some(404), ProbeError::Status(404));
        assert_eq!(report.recommendation(), Recommendation::DynamicRoute);

        report.dynamic_route =
            ProbeResult::failed(Approach::DynamicRoute, None, ProbeError::Request("refused".into()));
        assert_eq!(
            report.recommendation(),
            Recommendation::ManualInterventionRequired
        );
    }

    #[test]
    fn strategy_state_serializes_status_in_snake_case() {
        let state = StrategyState {
            endpoint_path: "/discovery.json".to_string(),
            status: DeploymentStatus::StaticDeployed,
            current_strategy: Some("static_file".to_string()),
            current_strategy_rank: 0,
            last_tested_at: Utc::now(),
            alternates_also_work: false,
            last_error: None,
            suggestion: None,
        };
        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["status"], "static_deployed");
        let back: StrategyState = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, state);
    }
}
