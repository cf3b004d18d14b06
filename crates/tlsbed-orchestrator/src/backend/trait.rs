//! Container runtime trait definition.
//!
//! The orchestrator needs only a narrow slice of a container runtime:
//! start, inspect, logs, remove, and a host-gateway lookup. Keeping the
//! slice narrow lets the sequencing logic run against a fake runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::container::ContainerImage;
use crate::error::Result;
use crate::topology::PortMapping;

/// Core trait for container runtimes.
///
/// # Lifecycle
///
/// 1. `ping()` to check the runtime answers before anything is launched
/// 2. `inspect()` to detect a container left over under the same name
/// 3. `remove()` to clear it
/// 4. `pull_image()` according to the image's pull policy
/// 5. `start()` to create and start the container
/// 6. `logs()` / `inspect()` for diagnostics
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator holds the runtime
/// behind an `Arc`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the name of this runtime.
    fn name(&self) -> &str;

    /// Checks that the runtime is reachable.
    async fn ping(&self) -> Result<()>;

    /// Returns the address containers use to reach ports published on the host.
    ///
    /// `Ok(None)` means the runtime has no such address.
    async fn host_gateway(&self) -> Result<Option<IpAddr>>;

    /// Pulls an image, honoring its pull policy.
    async fn pull_image(&self, image: &ContainerImage) -> Result<()>;

    /// Looks up a container by name; `Ok(None)` if it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Creates and starts a container, returning its ID.
    async fn start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Fetches container logs (stdout and stderr interleaved).
    async fn logs(&self, name: &str, tail: Option<usize>) -> Result<String>;

    /// Force-removes a container. Removing a missing container is not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Docker network mode (`host` or `bridge`).
    pub network_mode: String,

    /// Ports to publish.
    pub ports: Vec<PortMapping>,

    /// Environment variables.
    pub env: HashMap<String, String>,

    /// Bind mounts.
    pub mounts: Vec<BindMount>,

    /// Container labels.
    pub labels: HashMap<String, String>,

    /// Command override.
    pub command: Option<Vec<String>>,
}

impl ContainerSpec {
    /// Returns the environment as `KEY=value` strings, sorted by key.
    pub fn env_list(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();
        env
    }
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Path on the host.
    pub source: PathBuf,

    /// Path inside the container.
    pub target: String,

    /// Mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Creates a read-only bind mount.
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    /// Returns the Docker bind string (`/src:/dst:ro`).
    pub fn as_docker_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Runtime view of an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID.
    pub id: String,

    /// Container name (without the leading slash).
    pub name: String,

    /// Runtime status string (`running`, `exited`, ...).
    pub status: String,

    /// Whether the container process is running.
    pub running: bool,

    /// Exit code, once the container has exited.
    pub exit_code: Option<i64>,
}

impl ContainerInfo {
    /// Returns a one-line description for diagnostics.
    pub fn summary(&self) -> String {
        match self.exit_code {
            Some(code) if !self.running => {
                format!("{} ({}) status={} exit_code={}", self.name, self.id, self.status, code)
            }
            _ => format!("{} ({}) status={}", self.name, self.id, self.status),
        }
    }
}
