//! Static strategy registry and per-kind preference lists.

use crate::core::errors::UnknownStrategy;
use crate::core::types::{Approach, BlockId, DeploymentStatus, EndpointKind};

pub const STATIC_FILE: &str = "static_file";
pub const DYNAMIC_ROUTE: &str = "dynamic_route";
pub const STATIC_WITH_FALLBACK_RULE: &str = "static-with-fallback-rule";
pub const DYNAMIC_ROUTE_WITH_BACKUP_RULE: &str = "dynamic-route-with-backup-rule";
pub const SHARED_FILE_SECTION: &str = "shared-file-section";
pub const PROXY_BASIC: &str = "proxy-basic";
pub const MANUAL_CONFIG: &str = "manual-config";

/// A named, ordered composition of building blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub blocks: &'static [BlockId],
    pub applicability_hint: &'static str,
}

impl Strategy {
    /// Delivery approach the strategy depends on, or `None` for non-deploying strategies.
    pub fn approach(&self) -> Option<Approach> {
        if self
            .blocks
            .iter()
            .any(|id| matches!(id, BlockId::WriteStaticFile | BlockId::AppendToSharedFile))
        {
            Some(Approach::StaticFile)
        } else if self
            .blocks
            .iter()
            .any(|id| matches!(id, BlockId::RegisterDynamicRoute | BlockId::RegisterProxyRoute))
        {
            Some(Approach::DynamicRoute)
        } else {
            None
        }
    }

    pub fn needs_rewrite(&self) -> bool {
        self.blocks.contains(&BlockId::AddRewriteRule)
    }

    /// Status recorded after a successful run of this strategy. A strategy
    /// that deploys nothing leaves the endpoint `failed`.
    pub fn deployed_status(&self) -> DeploymentStatus {
        match self.approach() {
            Some(Approach::StaticFile) => DeploymentStatus::StaticDeployed,
            Some(Approach::DynamicRoute) => DeploymentStatus::DynamicDeployed,
            None => DeploymentStatus::Failed,
        }
    }

    /// True when the strategy installs a dispatcher binding.
    pub fn binds_route(&self) -> bool {
        self.blocks
            .iter()
            .any(|id| matches!(id, BlockId::RegisterDynamicRoute | BlockId::RegisterProxyRoute))
    }
}

pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: STATIC_FILE,
        blocks: &[BlockId::WriteStaticFile],
        applicability_hint: "document root is writable and served directly",
    },
    Strategy {
        name: DYNAMIC_ROUTE,
        blocks: &[BlockId::RegisterDynamicRoute],
        applicability_hint: "requests for the path reach the application",
    },
    Strategy {
        name: STATIC_WITH_FALLBACK_RULE,
        blocks: &[BlockId::WriteStaticFile, BlockId::AddRewriteRule],
        applicability_hint: "static file needs a rewrite rule to bypass the front controller",
    },
    Strategy {
        name: DYNAMIC_ROUTE_WITH_BACKUP_RULE,
        blocks: &[BlockId::RegisterDynamicRoute, BlockId::AddRewriteRule],
        applicability_hint: "server drops the path before the application without a rule",
    },
    Strategy {
        name: SHARED_FILE_SECTION,
        blocks: &[BlockId::AppendToSharedFile],
        applicability_hint: "resource lives inside a file other software also edits",
    },
    Strategy {
        name: PROXY_BASIC,
        blocks: &[BlockId::RegisterProxyRoute],
        applicability_hint: "requests are forwarded to an upstream API",
    },
    Strategy {
        name: MANUAL_CONFIG,
        blocks: &[BlockId::SuggestAlternateConfig],
        applicability_hint: "nothing automatic works; an administrator applies a snippet",
    },
];

/// Resolve a strategy by name. Unknown names fail before any side effect.
pub fn resolve(name: &str) -> Result<&'static Strategy, UnknownStrategy> {
    STRATEGIES
        .iter()
        .find(|strategy| strategy.name == name)
        .ok_or_else(|| UnknownStrategy(name.to_string()))
}

/// Ordered strategy names tried for an endpoint kind; the index is the rank.
pub fn preference_list(kind: EndpointKind) -> &'static [&'static str] {
    match kind {
        EndpointKind::Document => &[
            STATIC_FILE,
            DYNAMIC_ROUTE,
            STATIC_WITH_FALLBACK_RULE,
            DYNAMIC_ROUTE_WITH_BACKUP_RULE,
            MANUAL_CONFIG,
        ],
        EndpointKind::SharedSection => &[SHARED_FILE_SECTION, MANUAL_CONFIG],
        EndpointKind::Proxy => &[PROXY_BASIC, MANUAL_CONFIG],
    }
}

/// Rank of `name` within the kind's preference list.
pub fn rank_of(kind: EndpointKind, name: &str) -> Option<usize> {
    preference_list(kind).iter().position(|entry| *entry == name)
}

/// Rank after `current`, cycling through all N strategies of the kind.
pub fn next_rank(kind: EndpointKind, current: usize) -> usize {
    let len = preference_list(kind).len();
    (current + 1) % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preference_entry_resolves() {
        for kind in [
            EndpointKind::Document,
            EndpointKind::SharedSection,
            EndpointKind::Proxy,
        ] {
            for name in preference_list(kind) {
                assert!(resolve(name).is_ok(), "{name} missing from registry");
            }
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert_eq!(
            resolve("teleport").unwrap_err(),
            UnknownStrategy("teleport".to_string())
        );
    }

    #[test]
    fn strategy_approach_follows_blocks() {
        let static_rule = resolve(STATIC_WITH_FALLBACK_RULE).expect("strategy");
        assert_eq!(static_rule.approach(), Some(Approach::StaticFile));
        assert!(static_rule.needs_rewrite());

        let proxy = resolve(PROXY_BASIC).expect("strategy");
        assert_eq!(proxy.approach(), Some(Approach::DynamicRoute));
        assert!(proxy.binds_route());

        let manual = resolve(MANUAL_CONFIG).expect("strategy");
        assert_eq!(manual.approach(), None);
        assert_eq!(manual.deployed_status(), DeploymentStatus::Failed);
    }

    #[test]
    fn next_rank_cycles_over_whole_list() {
        let len = preference_list(EndpointKind::Document).len();
        assert_eq!(next_rank(EndpointKind::Document, 0), 1);
        assert_eq!(next_rank(EndpointKind::Document, len - 1), 0);
        assert_eq!(next_rank(EndpointKind::Proxy, 0), 1);
        assert_eq!(next_rank(EndpointKind::Proxy, 1), 0);
    }
}
