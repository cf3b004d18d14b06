//! Error types for the orchestrator crate.
//!
//! Every stage of a run fails with one of the classified variants below.
//! Plumbing errors (Docker API, I/O) are wrapped into the classified variant
//! of the stage that raised them before they leave that stage.

use std::time::Duration;

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while provisioning and launching the test double.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// CA creation, certificate issuance or trust-store installation failed.
    #[error("trust provisioning failed: {0}")]
    TrustProvisioning(String),

    /// The container runtime could not supply a host-gateway address.
    #[error("could not resolve host gateway address: {0}")]
    GatewayResolution(String),

    /// The container could not be started.
    #[error("failed to launch container {container}: {reason}")]
    Launch {
        /// The container name.
        container: String,
        /// The reason for the failure.
        reason: String,
    },

    /// An image could not be pulled or is missing locally.
    #[error("failed to pull image {image}: {reason}")]
    ImagePull {
        /// The image reference.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The service never answered a verified TLS probe within the deadline.
    #[error(
        "container {container} not ready after {:.1}s: {last_error}",
        .waited.as_secs_f64()
    )]
    ReadinessTimeout {
        /// The container name.
        container: String,
        /// How long the prober waited.
        waited: Duration,
        /// The last probe failure.
        last_error: String,
        /// Captured logs and connectivity output, if any.
        diagnostics: Option<String>,
    },

    /// An operation was called out of order.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The starting state.
        from: String,
        /// The target state.
        to: String,
    },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Classification of an error into the run's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// CA or certificate failure.
    TrustProvisioning,
    /// Host gateway could not be determined.
    GatewayResolution,
    /// Container failed to start.
    Launch,
    /// Service did not become ready in time.
    ReadinessTimeout,
    /// Operation called out of order, or invalid input.
    Precondition,
    /// Runtime or I/O failure outside a classified stage.
    Runtime,
}

impl OrchestratorError {
    /// Creates a trust provisioning error.
    pub fn trust(reason: impl Into<String>) -> Self {
        Self::TrustProvisioning(reason.into())
    }

    /// Creates a gateway resolution error.
    pub fn gateway(reason: impl Into<String>) -> Self {
        Self::GatewayResolution(reason.into())
    }

    /// Creates a launch error.
    pub fn launch(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates an image pull error.
    pub fn image_pull(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePull {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a readiness timeout error.
    pub fn readiness_timeout(
        container: impl Into<String>,
        waited: Duration,
        last_error: impl Into<String>,
        diagnostics: Option<String>,
    ) -> Self {
        Self::ReadinessTimeout {
            container: container.into(),
            waited,
            last_error: last_error.into(),
            diagnostics,
        }
    }

    /// Creates a precondition error.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TrustProvisioning(_) => ErrorKind::TrustProvisioning,
            Self::GatewayResolution(_) => ErrorKind::GatewayResolution,
            Self::Launch { .. } | Self::ImagePull { .. } => ErrorKind::Launch,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::Precondition(_)
            | Self::InvalidStateTransition { .. }
            | Self::Configuration(_) => ErrorKind::Precondition,
            Self::DockerApi(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Runtime,
        }
    }

    /// Returns true if the run cannot be considered a reportable test failure.
    ///
    /// A readiness timeout is the one outcome the caller surfaces as a failed
    /// step rather than a broken setup.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ReadinessTimeout { .. })
    }

    /// Returns true if the container is left running for inspection.
    pub fn leaves_container_running(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }

    /// Returns the captured diagnostics, if this error carries any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::ReadinessTimeout { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for OrchestratorError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<rcgen::Error> for OrchestratorError {
    fn from(err: rcgen::Error) -> Self {
        Self::TrustProvisioning(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::launch("echo", "image not found");
        assert_eq!(err.to_string(), "failed to launch container echo: image not found");

        let err = OrchestratorError::readiness_timeout(
            "echo",
            Duration::from_millis(1500),
            "connection refused",
            None,
        );
        assert_eq!(
            err.to_string(),
            "container echo not ready after 1.5s: connection refused"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            OrchestratorError::trust("x").kind(),
            ErrorKind::TrustProvisioning
        );
        assert_eq!(
            OrchestratorError::gateway("x").kind(),
            ErrorKind::GatewayResolution
        );
        assert_eq!(
            OrchestratorError::precondition("x").kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            OrchestratorError::from(std::io::Error::other("x")).kind(),
            ErrorKind::Runtime
        );
    }

    #[test]
    fn test_only_readiness_timeout_is_non_fatal() {
        let timeout = OrchestratorError::readiness_timeout("c", Duration::ZERO, "e", None);
        assert!(!timeout.is_fatal());
        assert!(timeout.leaves_container_running());

        for err in [
            OrchestratorError::trust("x"),
            OrchestratorError::gateway("x"),
            OrchestratorError::launch("c", "x"),
            OrchestratorError::precondition("x"),
        ] {
            assert!(err.is_fatal());
            assert!(!err.leaves_container_running());
        }
    }

    #[test]
    fn test_diagnostics_accessor() {
        let err = OrchestratorError::readiness_timeout(
            "c",
            Duration::ZERO,
            "e",
            Some("logs".to_string()),
        );
        assert_eq!(err.diagnostics(), Some("logs"));
        assert_eq!(OrchestratorError::trust("x").diagnostics(), None);
    }
}
