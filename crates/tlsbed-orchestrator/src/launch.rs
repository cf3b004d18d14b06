//! Service launching and teardown.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{BindMount, ContainerRuntime, ContainerSpec};
use crate::container::{ContainerImage, ServiceInstance, ServiceState};
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkPlan;
use crate::trust::TrustBundle;

/// Label marking containers started by this crate.
pub const MANAGED_LABEL: &str = "tlsbed.managed";

/// Label carrying the certificate hostname.
pub const HOSTNAME_LABEL: &str = "tlsbed.hostname";

/// Prefix of generated container names.
pub const GENERATED_NAME_PREFIX: &str = "tlsbed-";

/// How the test double is configured inside its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Directory the certificate and key are mounted under.
    pub cert_mount_dir: String,

    /// Variable telling the service which port to listen on.
    pub port_env: String,

    /// Variable pointing at the mounted certificate.
    pub cert_env: String,

    /// Variable pointing at the mounted key.
    pub key_env: String,

    /// Extra environment passed to the container.
    pub env: HashMap<String, String>,

    /// Extra labels applied to the container.
    pub labels: HashMap<String, String>,

    /// Command override.
    pub command: Option<Vec<String>>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            cert_mount_dir: "/certs".to_string(),
            port_env: "PORT".to_string(),
            cert_env: "HTTPS_CERT_FILE".to_string(),
            key_env: "HTTPS_KEY_FILE".to_string(),
            env: HashMap::new(),
            labels: HashMap::new(),
            command: None,
        }
    }
}

impl LaunchConfig {
    /// Path of the certificate inside the container.
    pub fn container_cert_path(&self) -> String {
        format!("{}/cert.pem", self.cert_mount_dir.trim_end_matches('/'))
    }

    /// Path of the key inside the container.
    pub fn container_key_path(&self) -> String {
        format!("{}/key.pem", self.cert_mount_dir.trim_end_matches('/'))
    }
}

/// Starts and removes the containerized test double.
pub struct ServiceLauncher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ServiceLauncher {
    /// Creates a launcher on the given runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Returns a fresh container name (`tlsbed-<8 hex chars>`).
    pub fn generate_name() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", GENERATED_NAME_PREFIX, &id[..8])
    }

    /// Checks that the container runtime answers.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Launch`] for `container_name` if the
    /// runtime is unreachable.
    pub async fn check_runtime(&self, container_name: &str) -> Result<()> {
        self.runtime.ping().await.map_err(|e| {
            OrchestratorError::launch(
                container_name,
                format!("{} runtime unavailable: {}", self.runtime.name(), e),
            )
        })
    }

    /// Builds the container description for a plan and bundle.
    pub fn container_spec(
        &self,
        plan: &NetworkPlan,
        trust: &TrustBundle,
        image: &ContainerImage,
        container_name: &str,
        config: &LaunchConfig,
    ) -> ContainerSpec {
        let mut env = config.env.clone();
        env.insert(config.port_env.clone(), plan.port.to_string());
        env.insert(config.cert_env.clone(), config.container_cert_path());
        env.insert(config.key_env.clone(), config.container_key_path());

        let mut labels = config.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(HOSTNAME_LABEL.to_string(), trust.subject_hostname.clone());

        ContainerSpec {
            name: container_name.to_string(),
            image: image.pull_reference(),
            network_mode: plan.mode.as_docker_mode().to_string(),
            ports: plan.port_mappings(),
            env,
            mounts: vec![
                BindMount::read_only(&trust.leaf_certificate_path, config.container_cert_path()),
                BindMount::read_only(&trust.leaf_key_path, config.container_key_path()),
            ],
            labels,
            command: config.command.clone(),
        }
    }

    /// Starts the test double and returns it in the `Starting` state.
    ///
    /// A container already holding `container_name` is removed first, so a
    /// retried run replaces it instead of failing on the name. An empty name
    /// is replaced by a generated one. Does not wait for health.
    ///
    /// # Errors
    ///
    /// Every failure (runtime unreachable, image pull, create/start) is
    /// returned as [`OrchestratorError::Launch`].
    pub async fn launch(
        &self,
        plan: NetworkPlan,
        trust: TrustBundle,
        image: ContainerImage,
        container_name: &str,
        config: &LaunchConfig,
    ) -> Result<ServiceInstance> {
        let name = if container_name.trim().is_empty() {
            Self::generate_name()
        } else {
            container_name.to_string()
        };
        let launch_err = |e: OrchestratorError| match e {
            OrchestratorError::Launch { .. } => e,
            other => OrchestratorError::launch(&name, other.to_string()),
        };

        let mut instance = ServiceInstance::new(&name, plan, trust, image);

        if let Some(existing) = self.runtime.inspect(&name).await.map_err(launch_err)? {
            warn!(
                container = %name,
                existing = %existing.summary(),
                "Replacing existing container"
            );
            self.runtime.remove(&name).await.map_err(launch_err)?;
        }

        self.runtime
            .pull_image(&instance.image)
            .await
            .map_err(launch_err)?;

        let spec = self.container_spec(
            &instance.network_plan,
            &instance.trust_bundle,
            &instance.image,
            &name,
            config,
        );
        let id = self.runtime.start(&spec).await.map_err(launch_err)?;

        instance.container_id = Some(id);
        instance.transition(ServiceState::Starting)?;

        info!(
            container = %name,
            id = instance.short_id().unwrap_or(""),
            image = %instance.image.reference(),
            network = %instance.network_plan.mode.name(),
            port = instance.network_plan.port,
            "Launched service"
        );

        Ok(instance)
    }

    /// Removes the instance's container and marks it `Stopped`.
    pub async fn teardown(&self, instance: &mut ServiceInstance) -> Result<()> {
        self.remove(&instance.container_name).await?;
        instance.transition(ServiceState::Stopped)
    }

    /// Removes a container by name; a missing container is not an error.
    pub async fn remove(&self, container_name: &str) -> Result<()> {
        self.runtime.remove(container_name).await?;
        info!(container = %container_name, "Service torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bundle() -> TrustBundle {
        TrustBundle {
            ca_certificate_path: PathBuf::from("/c/rootCA.pem"),
            leaf_certificate_path: PathBuf::from("/c/echo.test.pem"),
            leaf_key_path: PathBuf::from("/c/echo.test-key.pem"),
            subject_hostname: "echo.test".to_string(),
            ca_fingerprint: "ff".to_string(),
        }
    }

    #[test]
    fn test_generated_name() {
        let name = ServiceLauncher::generate_name();
        assert!(name.starts_with("tlsbed-"));
        assert_eq!(name.len(), "tlsbed-".len() + 8);
        assert_ne!(name, ServiceLauncher::generate_name());
    }

    #[test]
    fn test_launch_config_paths() {
        let config = LaunchConfig {
            cert_mount_dir: "/tls/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.container_cert_path(), "/tls/cert.pem");
        assert_eq!(config.container_key_path(), "/tls/key.pem");
    }

    #[test]
    fn test_launch_config_from_toml() {
        let config: LaunchConfig = toml::from_str("port_env = \"LISTEN_PORT\"").unwrap();
        assert_eq!(config.port_env, "LISTEN_PORT");
        assert_eq!(config.cert_env, "HTTPS_CERT_FILE");
    }
}
