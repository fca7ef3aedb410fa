//! Deterministic strategy ranking from the server profile and probe truth.

use crate::core::registry::{preference_list, resolve};
use crate::core::types::{Approach, EndpointKind, HostingTier, ServerProfile};

/// A strategy that may be executed, with its rank in the kind's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedStrategy {
    pub name: &'static str,
    pub rank: usize,
}

/// Probe truth for both approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproachTruth {
    pub static_file: bool,
    pub dynamic_route: bool,
}

impl ApproachTruth {
    pub fn works(self, approach: Approach) -> bool {
        match approach {
            Approach::StaticFile => self.static_file,
            Approach::DynamicRoute => self.dynamic_route,
        }
    }
}

/// Order the kind's strategies into executable candidates.
///
/// A strategy is eligible only when its approach round-tripped; strategies
/// without an approach (manual config) are never auto-selected, and
/// strategies carrying a rewrite rule need rewrite support. Eligible entries
/// sort by profile weight, then by list rank.
///
/// The rule-backed variants share their eligibility with `static_file` and
/// `dynamic_route`, which sit earlier in the document list with the same
/// weight. They never come first here and are reached through `switch`.
pub fn rank_strategies(
    kind: EndpointKind,
    profile: &ServerProfile,
    truth: ApproachTruth,
) -> Vec<RankedStrategy> {
    let mut eligible: Vec<(u8, RankedStrategy)> = Vec::new();
    let dynamic_eligible = truth.dynamic_route;

    for (rank, name) in preference_list(kind).iter().enumerate() {
        let Ok(strategy) = resolve(name) else {
            continue;
        };
        let Some(approach) = strategy.approach() else {
            continue;
        };
        if !truth.works(approach) {
            continue;
        }
        if strategy.needs_rewrite() && !profile.config_rewrite_supported {
            continue;
        }
        let weight = profile_weight(profile, approach, dynamic_eligible);
        eligible.push((
            weight,
            RankedStrategy {
                name: strategy.name,
                rank,
            },
        ));
    }

    eligible.sort_by_key(|(weight, candidate)| (*weight, candidate.rank));
    eligible.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Managed platforms often front static files with caches that never see a
/// freshly written file, so prefer dynamic delivery when it also works.
fn profile_weight(profile: &ServerProfile, approach: Approach, dynamic_eligible: bool) -> u8 {
    match (profile.hosting_tier, approach) {
        (HostingTier::Managed, Approach::StaticFile) if dynamic_eligible => 1,
        _ => 0,
    }
}
