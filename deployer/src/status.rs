//! Administrative read model over persisted strategy state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::lifecycle::EndpointPhase;
use crate::core::registry::MANUAL_CONFIG;
use crate::core::types::{DeploymentStatus, EndpointKind, ProbeResult, StrategyState};

/// One row of the status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub path: String,
    pub kind: Option<EndpointKind>,
    pub phase: EndpointPhase,
    pub status: Option<DeploymentStatus>,
    pub strategy: Option<String>,
    pub rank: Option<usize>,
    pub alternates_also_work: bool,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub suggestion: Option<String>,
    pub needs_attention: bool,
    /// Probe results from the last run in this process, if any.
    pub last_probe: Option<LastProbe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastProbe {
    pub static_file: ProbeResult,
    pub dynamic_route: ProbeResult,
}

impl EndpointStatus {
    pub fn from_state(
        state: &StrategyState,
        kind: Option<EndpointKind>,
        phase: EndpointPhase,
        last_probe: Option<LastProbe>,
    ) -> Self {
        Self {
            path: state.endpoint_path.clone(),
            kind,
            phase,
            status: Some(state.status),
            strategy: state.current_strategy.clone(),
            rank: Some(state.current_strategy_rank),
            alternates_also_work: state.alternates_also_work,
            last_tested_at: Some(state.last_tested_at),
            last_error: state.last_error.clone(),
            suggestion: state.suggestion.clone(),
            needs_attention: state.needs_manual_intervention(),
            last_probe,
        }
    }

    /// Row for an endpoint that is known but has no persisted state.
    pub fn pending(path: &str, kind: EndpointKind, phase: EndpointPhase) -> Self {
        Self {
            path: path.to_string(),
            kind: Some(kind),
            phase,
            status: None,
            strategy: None,
            rank: None,
            alternates_also_work: false,
            last_tested_at: None,
            last_error: None,
            suggestion: None,
            needs_attention: false,
            last_probe: None,
        }
    }

    /// Short human label for the state column.
    pub fn label(&self) -> &'static str {
        match self.status {
            Some(DeploymentStatus::StaticDeployed) => "static",
            Some(DeploymentStatus::DynamicDeployed) => "dynamic",
            Some(DeploymentStatus::Failed) => {
                let only_suggested = self.strategy.as_deref() == Some(MANUAL_CONFIG);
                let nothing_works = self
                    .last_probe
                    .as_ref()
                    .is_some_and(|probe| !probe.static_file.success && !probe.dynamic_route.success);
                if only_suggested || nothing_works {
                    "manual intervention required"
                } else {
                    "failed"
                }
            }
            None => "not registered",
        }
    }
}

/// Plain-text table for the CLI.
pub fn render_table(rows: &[EndpointStatus]) -> String {
    if rows.is_empty() {
        return "no endpoints\n".to_string();
    }
    let width = rows.iter().map(|row| row.path.len()).max().unwrap_or(0).max(4);
    let mut out = format!("{:<width$}  {:<28}  {:<32}  RANK\n", "PATH", "STATE", "STRATEGY");
    for row in rows {
        let strategy = row.strategy.as_deref().unwrap_or("-");
        let rank = row
            .rank
            .map_or_else(|| "-".to_string(), |rank| rank.to_string());
        out.push_str(&format!(
            "{:<width$}  {:<28}  {:<32}  {rank}\n",
            row.path,
            row.label(),
            strategy
        ));
        if let Some(err) = &row.last_error {
            out.push_str(&format!("{:<width$}  error: {err}\n", ""));
        }
    }
    out
}
