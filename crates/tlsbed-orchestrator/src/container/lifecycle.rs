//! Service instance lifecycle.
//!
//! A [`ServiceInstance`] moves through `Created → Starting → {Ready | Failed}`.
//! `Ready` and `Failed` are terminal for the prober; only teardown may move
//! an instance on to `Stopped`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::container::ContainerImage;
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkPlan;
use crate::trust::TrustBundle;

/// State of a launched service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Instance described but container not yet started.
    Created,

    /// Container started, readiness not yet confirmed.
    Starting,

    /// A verified TLS probe succeeded.
    Ready,

    /// Readiness was never confirmed.
    Failed,

    /// Container removed by teardown.
    Stopped,
}

impl ServiceState {
    /// Returns the lowercase state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Returns true if the prober can no longer change this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Stopped)
    }

    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Created | Starting | Ready | Failed, Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: ServiceState,

    /// New state.
    pub to: ServiceState,

    /// When the change happened (Unix milliseconds).
    pub timestamp: u64,
}

/// A containerized test double started by the launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Container name, unique per run.
    pub container_name: String,

    /// Container ID assigned by the runtime, once started.
    pub container_id: Option<String>,

    /// How the container is attached to the network.
    pub network_plan: NetworkPlan,

    /// Certificate material the service serves.
    pub trust_bundle: TrustBundle,

    /// Image the container runs.
    pub image: ContainerImage,

    state: ServiceState,

    history: Vec<StateTransition>,
}

impl ServiceInstance {
    /// Creates a new instance in the `Created` state.
    pub fn new(
        container_name: impl Into<String>,
        network_plan: NetworkPlan,
        trust_bundle: TrustBundle,
        image: ContainerImage,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            container_id: None,
            network_plan,
            trust_bundle,
            image,
            state: ServiceState::Created,
            history: Vec::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Returns all recorded transitions, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Returns true if readiness has been confirmed.
    pub fn is_ready(&self) -> bool {
        self.state == ServiceState::Ready
    }

    /// Returns the short container ID (first 12 characters).
    pub fn short_id(&self) -> Option<&str> {
        self.container_id
            .as_deref()
            .map(|id| if id.len() > 12 { &id[..12] } else { id })
    }

    /// Moves the instance to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: ServiceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::invalid_state_transition(
                self.state.name(),
                next.name(),
            ));
        }

        self.history.push(StateTransition {
            from: self.state,
            to: next,
            timestamp: now_millis(),
        });
        self.state = next;
        Ok(())
    }
}

/// Current Unix time in milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
