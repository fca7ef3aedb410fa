//! Per-endpoint deployment state machine.

use serde::Serialize;

use crate::core::types::DeploymentStatus;

/// Where an endpoint is in its deployment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointPhase {
    Unregistered,
    Probing,
    Executing,
    StaticDeployed,
    DynamicDeployed,
    Failed,
    Removed,
}

impl EndpointPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EndpointPhase::StaticDeployed | EndpointPhase::DynamicDeployed | EndpointPhase::Failed
        )
    }
}

impl From<DeploymentStatus> for EndpointPhase {
    fn from(status: DeploymentStatus) -> Self {
        match status {
            DeploymentStatus::StaticDeployed => EndpointPhase::StaticDeployed,
            DeploymentStatus::DynamicDeployed => EndpointPhase::DynamicDeployed,
            DeploymentStatus::Failed => EndpointPhase::Failed,
        }
    }
}

/// Inputs that move an endpoint between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// `register` started (first time, after removal, or re-registration).
    Register,
    /// Admin-triggered fallback to another strategy.
    Switch,
    /// Probing produced a candidate and execution starts.
    Execute,
    /// A run (or the decision not to run) finished with this status.
    Finish(DeploymentStatus),
    /// `unregister` cleaned up the active strategy.
    Remove,
}

/// Apply `event` to `from`, rejecting transitions the lifecycle does not allow.
pub fn transition(from: EndpointPhase, event: PhaseEvent) -> Result<EndpointPhase, String> {
    use EndpointPhase as P;

    let next = match (from, event) {
        (P::Unregistered | P::Removed, PhaseEvent::Register) => P::Probing,
        (phase, PhaseEvent::Register) if phase.is_terminal() => P::Probing,
        (phase, PhaseEvent::Switch) if phase.is_terminal() => P::Probing,
        (P::Probing, PhaseEvent::Execute) => P::Executing,
        (P::Probing, PhaseEvent::Finish(DeploymentStatus::Failed)) => P::Failed,
        (P::Executing, PhaseEvent::Finish(status)) => status.into(),
        (phase, PhaseEvent::Remove) if phase.is_terminal() => P::Removed,
        (from, event) => {
            return Err(format!("illegal transition {from:?} on {event:?}"));
        }
    };
    Ok(next)
}
