//! Orchestrator configuration.
//!
//! All options have defaults, so an empty TOML document is a valid
//! configuration that serves `https://localhost:8080` from go-httpbin.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{DockerBackendConfig, DEFAULT_GATEWAY_NETWORK};
use crate::container::{ContainerImage, ImagePullPolicy};
use crate::error::{OrchestratorError, Result};
use crate::launch::LaunchConfig;
use crate::readiness::{ProberConfig, DEFAULT_PROBE_PATH};
use crate::trust::{
    DirectoryTrustStore, NoopTrustStore, TrustStore, TrustStoreKind, DEFAULT_LEAF_VALIDITY,
};

/// Default container name.
pub const DEFAULT_CONTAINER_NAME: &str = "tlsbed-echo";

/// Default test-double image.
pub const DEFAULT_IMAGE: &str = "mccutchen/go-httpbin:latest";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Container name; replaced if it already exists. Empty means generated.
    pub container_name: String,

    /// Port the service listens on and is published at.
    pub port: u16,

    /// Test-double image reference.
    pub image: String,

    /// When to pull the image.
    pub pull_policy: ImagePullPolicy,

    /// Share the host network namespace instead of publishing the port.
    pub use_host_network: bool,

    /// Readiness deadline in seconds.
    pub wait_timeout_secs: u64,

    /// Verbose logging and diagnostics even on success.
    pub debug: bool,

    /// Hostname the certificate is issued for.
    pub hostname: String,

    /// Directory holding the CA and issued certificates.
    pub cert_dir: PathBuf,

    /// Where the CA is installed.
    pub install_ca: TrustStoreKind,

    /// Anchor directory when `install_ca = "directory"`.
    pub trust_dir: Option<PathBuf>,

    /// Extra DNS names or IPs for the certificate.
    pub extra_sans: Vec<String>,

    /// Validity of issued leaf certificates in days.
    pub leaf_validity_days: u64,

    /// Liveness path probed over HTTPS.
    pub probe_path: String,

    /// Delay between probes in milliseconds.
    pub poll_interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,

    /// Fixed host-gateway address instead of asking the runtime.
    pub gateway_override: Option<IpAddr>,

    /// Docker network whose gateway is the host gateway.
    pub gateway_network: String,

    /// Host name a published port is reachable at.
    pub published_host: String,

    /// Log lines captured on failure.
    pub log_tail: usize,

    /// File the outputs are appended to as `KEY=value` lines.
    pub outputs_file: Option<PathBuf>,

    /// Extra container environment.
    pub env: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            port: 8080,
            image: DEFAULT_IMAGE.to_string(),
            pull_policy: ImagePullPolicy::default(),
            use_host_network: false,
            wait_timeout_secs: 60,
            debug: false,
            hostname: "localhost".to_string(),
            cert_dir: std::env::temp_dir().join("tlsbed"),
            install_ca: TrustStoreKind::default(),
            trust_dir: None,
            extra_sans: Vec::new(),
            leaf_validity_days: DEFAULT_LEAF_VALIDITY.as_secs() / SECS_PER_DAY,
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            poll_interval_ms: 1000,
            probe_timeout_ms: 2000,
            gateway_override: None,
            gateway_network: DEFAULT_GATEWAY_NETWORK.to_string(),
            published_host: "localhost".to_string(),
            log_tail: 200,
            outputs_file: None,
            env: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Returns the readiness deadline.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Returns the validity of issued leaf certificates.
    pub fn leaf_validity(&self) -> Duration {
        Duration::from_secs(self.leaf_validity_days * SECS_PER_DAY)
    }

    /// Returns the Docker backend settings.
    pub fn docker_backend_config(&self) -> DockerBackendConfig {
        DockerBackendConfig {
            gateway_network: self.gateway_network.clone(),
        }
    }

    /// Returns the image with its pull policy.
    pub fn image(&self) -> ContainerImage {
        ContainerImage::new(&self.image).with_pull_policy(self.pull_policy)
    }

    /// Returns the prober tuning.
    pub fn prober_config(&self) -> ProberConfig {
        ProberConfig {
            poll_interval: self.poll_interval(),
            probe_timeout: self.probe_timeout(),
            probe_path: self.probe_path.clone(),
            log_tail: self.log_tail,
            debug: self.debug,
        }
    }

    /// Returns the container launch settings.
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            env: self.env.clone(),
            ..Default::default()
        }
    }

    /// Builds the trust store selected by `install_ca`.
    pub fn trust_store(&self) -> Result<Arc<dyn TrustStore>> {
        Ok(match self.install_ca {
            TrustStoreKind::System => Arc::new(DirectoryTrustStore::system()),
            TrustStoreKind::Directory => {
                let dir = self.trust_dir.as_ref().ok_or_else(|| {
                    OrchestratorError::configuration("install_ca = directory requires trust_dir")
                })?;
                Arc::new(DirectoryTrustStore::new(dir))
            }
            TrustStoreKind::None => Arc::new(NoopTrustStore),
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(OrchestratorError::configuration("port must be non-zero"));
        }

        if self.image.trim().is_empty() {
            return Err(OrchestratorError::configuration("image must not be empty"));
        }

        crate::trust::validate_hostname(&self.hostname)
            .map_err(|e| OrchestratorError::configuration(e.to_string()))?;

        if !self.container_name.is_empty() && !is_valid_container_name(&self.container_name) {
            return Err(OrchestratorError::configuration(format!(
                "invalid container name: {}",
                self.container_name
            )));
        }

        if !self.probe_path.starts_with('/') {
            return Err(OrchestratorError::configuration(format!(
                "probe_path must start with '/': {}",
                self.probe_path
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(OrchestratorError::configuration(
                "poll_interval_ms must be non-zero",
            ));
        }

        if self.probe_timeout_ms == 0 {
            return Err(OrchestratorError::configuration(
                "probe_timeout_ms must be non-zero",
            ));
        }

        if self.leaf_validity_days == 0 {
            return Err(OrchestratorError::configuration(
                "leaf_validity_days must be non-zero",
            ));
        }

        if self.gateway_network.trim().is_empty() {
            return Err(OrchestratorError::configuration(
                "gateway_network must not be empty",
            ));
        }

        if self.published_host.trim().is_empty() {
            return Err(OrchestratorError::configuration(
                "published_host must not be empty",
            ));
        }

        if self.install_ca == TrustStoreKind::Directory && self.trust_dir.is_none() {
            return Err(OrchestratorError::configuration(
                "install_ca = directory requires trust_dir",
            ));
        }

        Ok(())
    }
}

/// Docker's container name rule: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
