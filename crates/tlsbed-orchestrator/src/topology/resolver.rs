//! Network topology resolution.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::ContainerRuntime;
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkPlan;

/// Decides how the service is attached to the network.
///
/// The decision is a pure function of configuration; only the port-mapped
/// topology consults the runtime, to learn the host-gateway address sibling
/// containers must use.
pub struct TopologyResolver {
    runtime: Arc<dyn ContainerRuntime>,
    gateway_override: Option<IpAddr>,
    published_host: String,
}

impl TopologyResolver {
    /// Creates a resolver backed by the given runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            gateway_override: None,
            published_host: "localhost".to_string(),
        }
    }

    /// Uses a fixed gateway address instead of asking the runtime.
    pub fn gateway_override(mut self, gateway: Option<IpAddr>) -> Self {
        self.gateway_override = gateway;
        self
    }

    /// Sets the host name under which a published port is reachable.
    pub fn published_host(mut self, host: impl Into<String>) -> Self {
        self.published_host = host.into();
        self
    }

    /// Resolves the network plan.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::GatewayResolution`] in port-mapped mode
    /// when the runtime cannot supply a host-gateway address, and
    /// [`OrchestratorError::Precondition`] for port 0.
    pub async fn resolve(&self, use_host_network: bool, port: u16) -> Result<NetworkPlan> {
        if port == 0 {
            return Err(OrchestratorError::precondition(
                "service port must be non-zero",
            ));
        }

        if use_host_network {
            info!(port, "Using host network");
            return Ok(NetworkPlan::host(port));
        }

        let gateway = match self.gateway_override {
            Some(gateway) => {
                debug!(gateway = %gateway, "Using configured host gateway");
                gateway
            }
            None => self
                .runtime
                .host_gateway()
                .await
                .map_err(|e| OrchestratorError::gateway(e.to_string()))?
                .ok_or_else(|| {
                    OrchestratorError::gateway(format!(
                        "{} runtime reported no gateway address",
                        self.runtime.name()
                    ))
                })?,
        };

        if gateway.is_unspecified() {
            return Err(OrchestratorError::gateway(format!(
                "runtime reported unspecified address {}",
                gateway
            )));
        }

        info!(port, gateway = %gateway, "Using published port mapping");
        Ok(NetworkPlan::port_mapped(port, gateway, &self.published_host))
    }
}
