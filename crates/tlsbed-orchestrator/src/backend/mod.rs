//! Container runtime backends.
//!
//! This module provides the trait the orchestrator uses to drive a
//! container runtime and the Docker implementation of it.

mod docker;
mod r#trait;

pub use docker::{DockerBackend, DockerBackendConfig, DEFAULT_GATEWAY_NETWORK};
pub use r#trait::{BindMount, ContainerInfo, ContainerRuntime, ContainerSpec};
