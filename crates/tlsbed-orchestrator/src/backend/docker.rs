//! Docker backend implementation.
//!
//! Talks to the local Docker daemon through bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::network::InspectNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::backend::r#trait::{ContainerInfo, ContainerRuntime, ContainerSpec};
use crate::container::{ContainerImage, ImagePullPolicy};
use crate::error::{OrchestratorError, Result};

/// Default network whose gateway is reported as the host gateway.
pub const DEFAULT_GATEWAY_NETWORK: &str = "bridge";

/// Configuration for the Docker backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerBackendConfig {
    /// Network whose gateway is reported as the host gateway.
    pub gateway_network: String,
}

impl Default for DockerBackendConfig {
    fn default() -> Self {
        Self {
            gateway_network: DEFAULT_GATEWAY_NETWORK.to_string(),
        }
    }
}

/// Docker container runtime.
pub struct DockerBackend {
    docker: Docker,
    config: DockerBackendConfig,
}

impl DockerBackend {
    /// Connects to the local Docker daemon with the given configuration.
    ///
    /// The daemon is not contacted until the first call; use
    /// [`ContainerRuntime::ping`] to check that it answers.
    pub async fn with_config(config: DockerBackendConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        info!(
            gateway_network = %config.gateway_network,
            "Using local Docker daemon"
        );

        Ok(Self { docker, config })
    }

    async fn image_present(&self, reference: &str) -> Result<bool> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn build_config(&self, spec: &ContainerSpec) -> Config<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (p.container_key(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                let binding = bollard::service::PortBinding {
                    host_ip: None,
                    host_port: p.host_port.map(|port| port.to_string()),
                };
                (p.container_key(), Some(vec![binding]))
            })
            .collect();

        let binds: Vec<String> = spec.mounts.iter().map(|m| m.as_docker_bind()).collect();

        let host_config = bollard::service::HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: Some(spec.network_mode.clone()),
            binds: (!binds.is_empty()).then_some(binds),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env_list()),
            labels: Some(spec.labels.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            cmd: spec.command.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn host_gateway(&self) -> Result<Option<IpAddr>> {
        let network = self
            .docker
            .inspect_network(
                &self.config.gateway_network,
                None::<InspectNetworkOptions<String>>,
            )
            .await?;

        let gateway = network
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|cfg| cfg.gateway)
            .find_map(|gw| gw.parse::<IpAddr>().ok());

        debug!(network = %self.config.gateway_network, gateway = ?gateway, "Inspected gateway network");
        Ok(gateway)
    }

    async fn pull_image(&self, image: &ContainerImage) -> Result<()> {
        let reference = image.pull_reference();

        match image.pull_policy {
            ImagePullPolicy::Never => {
                if self.image_present(&reference).await? {
                    return Ok(());
                }
                return Err(OrchestratorError::image_pull(
                    &reference,
                    "image not present locally and pull policy is never",
                ));
            }
            ImagePullPolicy::IfNotPresent => {
                if self.image_present(&reference).await? {
                    debug!(image = %reference, "Image present, skipping pull");
                    return Ok(());
                }
            }
            ImagePullPolicy::Always => {}
        }

        info!(image = %reference, "Pulling image");

        let options = CreateImageOptions {
            from_image: reference.as_str(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(OrchestratorError::image_pull(&reference, e.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = inspect.state.unwrap_or_default();
        Ok(Some(ContainerInfo {
            id: inspect.id.unwrap_or_default(),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        }))
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), self.build_config(spec))
            .await?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker warning on create");
        }

        info!(
            container = %spec.name,
            id = %response.id,
            "Created container"
        );

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(container = %spec.name, "Started container");

        Ok(response.id)
    }

    async fn logs(&self, name: &str, tail: Option<usize>) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => {
                    output.push_str(&log.to_string());
                }
                Err(e) => {
                    return Err(OrchestratorError::DockerApi(e));
                }
            }
        }

        Ok(output)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                info!(container = %name, "Removed container");
                Ok(())
            }
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Returns true if the Docker API answered 404.
fn is_missing(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
