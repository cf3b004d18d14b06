//! Network plan types.
//!
//! A [`NetworkPlan`] fixes how the test double is attached to the network
//! before launch. The two topologies differ structurally in the container
//! arguments, so the choice cannot be changed on a running container.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// How the service container is attached to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    /// Container shares the host network namespace.
    ///
    /// The service is reachable at `localhost:port` from the host and from
    /// sibling containers that also share the host namespace.
    Host,

    /// Container port is published on the host.
    PortMapped {
        /// Address sibling containers use to reach the published port.
        gateway: IpAddr,

        /// Host name under which the published port is reachable from the host.
        published_host: String,
    },
}

impl NetworkMode {
    /// Returns the Docker network mode string.
    pub fn as_docker_mode(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::PortMapped { .. } => "bridge",
        }
    }

    /// Returns a short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Host => "host-network",
            Self::PortMapped { .. } => "port-mapped",
        }
    }
}

/// Resolved network topology for one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlan {
    /// Attachment mode (carries the gateway when port-mapped).
    pub mode: NetworkMode,

    /// Port the service listens on and is exposed at.
    pub port: u16,
}

impl NetworkPlan {
    /// Creates a host-network plan.
    pub fn host(port: u16) -> Self {
        Self {
            mode: NetworkMode::Host,
            port,
        }
    }

    /// Creates a port-mapped plan.
    pub fn port_mapped(port: u16, gateway: IpAddr, published_host: impl Into<String>) -> Self {
        Self {
            mode: NetworkMode::PortMapped {
                gateway,
                published_host: published_host.into(),
            },
            port,
        }
    }

    /// Returns true if the container shares the host network namespace.
    pub fn is_host_network(&self) -> bool {
        matches!(self.mode, NetworkMode::Host)
    }

    /// Returns the host-gateway address; present only when port-mapped.
    pub fn gateway_address(&self) -> Option<IpAddr> {
        match &self.mode {
            NetworkMode::Host => None,
            NetworkMode::PortMapped { gateway, .. } => Some(*gateway),
        }
    }

    /// Returns the host name the service is reachable at from the host.
    pub fn service_host(&self) -> &str {
        match &self.mode {
            NetworkMode::Host => "localhost",
            NetworkMode::PortMapped { published_host, .. } => published_host,
        }
    }

    /// Returns the port mappings to publish; empty on the host network.
    pub fn port_mappings(&self) -> Vec<PortMapping> {
        match self.mode {
            NetworkMode::Host => Vec::new(),
            NetworkMode::PortMapped { .. } => vec![PortMapping::tcp(self.port).host_port(self.port)],
        }
    }
}

/// Port mapping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container port.
    pub container_port: u16,

    /// Host port (if None, the runtime assigns one).
    pub host_port: Option<u16>,
}

impl PortMapping {
    /// Creates a new TCP port mapping.
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
        }
    }

    /// Sets the host port.
    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    /// Returns the exposed-port key Docker uses (`8080/tcp`).
    pub fn container_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_host_plan_has_no_gateway() {
        let plan = NetworkPlan::host(8080);
        assert!(plan.is_host_network());
        assert_eq!(plan.gateway_address(), None);
        assert_eq!(plan.service_host(), "localhost");
        assert!(plan.port_mappings().is_empty());
        assert_eq!(plan.mode.as_docker_mode(), "host");
    }

    #[test]
    fn test_port_mapped_plan() {
        let gw = IpAddr::V4(Ipv4Addr::new(172, 17, 0, 1));
        let plan = NetworkPlan::port_mapped(8443, gw, "localhost");
        assert_eq!(plan.gateway_address(), Some(gw));
        assert_eq!(plan.mode.as_docker_mode(), "bridge");
        assert_eq!(
            plan.port_mappings(),
            vec![PortMapping::tcp(8443).host_port(8443)]
        );
    }

    #[test]
    fn test_port_mapping_key() {
        let port = PortMapping::tcp(8080).host_port(18080);
        assert_eq!(port.container_key(), "8080/tcp");
        assert_eq!(port.host_port, Some(18080));
    }

    #[test]
    fn test_plan_serialization_tags_mode() {
        let gw = IpAddr::V4(Ipv4Addr::new(172, 17, 0, 1));
        let json = serde_json::to_value(NetworkPlan::port_mapped(8080, gw, "localhost")).unwrap();
        assert_eq!(json["mode"]["mode"], "port_mapped");
        assert_eq!(json["mode"]["gateway"], "172.17.0.1");
    }
}
