//! Ephemeral TLS test-double orchestration.
//!
//! This crate provisions a trusted local certificate authority, issues a
//! server certificate for a hostname, starts an HTTPS test double in a
//! container, waits until the service answers a *verified* TLS request, and
//! publishes the facts downstream test steps need (service URL, certificate
//! paths, host-gateway address).
//!
//! # Overview
//!
//! A run is five stages executed strictly in sequence:
//!
//! - **Provisioning** ([`trust`]): create or reuse the CA, install it into a
//!   trust store idempotently, and issue a leaf certificate
//! - **Topology** ([`topology`]): host networking or a published port, and
//!   the host-gateway address sibling containers must use
//! - **Launch** ([`launch`]): start the container under a reusable name,
//!   replacing any container already holding it
//! - **Readiness** ([`readiness`]): poll over HTTPS, trusting only the run's
//!   CA, until success or the deadline
//! - **Publishing** ([`publish`]): derive the outputs from the ready instance
//!
//! [`Orchestrator`] runs the whole sequence; each stage can also be used on
//! its own.
//!
//! # Example
//!
//! ```ignore
//! use tlsbed_orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig {
//!         port: 8443,
//!         ..Default::default()
//!     };
//!
//!     let orchestrator = Orchestrator::docker(config).await?;
//!     let report = orchestrator.run().await?;
//!     println!("{}", report.outputs.service_url);
//!
//!     orchestrator.down(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The container runtime ([`ContainerRuntime`]), the health probe
//! ([`HealthProbe`]) and time ([`Clock`]) are traits, so the sequencing
//! logic can be exercised without Docker or real waiting.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod launch;
pub mod orchestrator;
pub mod publish;
pub mod readiness;
pub mod topology;
pub mod trust;

// Re-export commonly used types at the crate root
pub use backend::{ContainerInfo, ContainerRuntime, ContainerSpec, DockerBackend};
pub use config::OrchestratorConfig;
pub use container::{ContainerImage, ImagePullPolicy, ServiceInstance, ServiceState};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use launch::{LaunchConfig, ServiceLauncher};
pub use orchestrator::{Orchestrator, RunReport};
pub use publish::{OutputPublisher, PublishedOutputs};
pub use readiness::{
    Clock, Diagnostics, HealthProbe, HttpsProbe, ManualClock, ProberConfig, ReadinessProber,
    ReadinessResult, SystemClock,
};
pub use topology::{NetworkMode, NetworkPlan, TopologyResolver};
pub use trust::{TrustBundle, TrustProvisioner, TrustStore, TrustStoreKind};
