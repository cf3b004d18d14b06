//! Published outputs of a ready service.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::container::ServiceInstance;
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkMode;

/// The facts downstream steps consume.
///
/// Field names are serialized in camelCase and are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedOutputs {
    /// `https://<host>:<port>` of the service.
    pub service_url: String,

    /// Name of the running container.
    pub container_name: String,

    /// Address sibling containers reach the service through (port-mapped only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_gateway_ip: Option<IpAddr>,

    /// CA certificate path.
    pub ca_cert_path: PathBuf,

    /// Leaf certificate path.
    pub cert_file: PathBuf,

    /// Leaf key path.
    pub key_file: PathBuf,
}

impl PublishedOutputs {
    /// Returns the outputs as environment-style pairs for shell consumers.
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("TLSBED_SERVICE_URL", self.service_url.clone()),
            ("TLSBED_CONTAINER_NAME", self.container_name.clone()),
            ("TLSBED_CA_CERT", self.ca_cert_path.display().to_string()),
            ("TLSBED_CERT_FILE", self.cert_file.display().to_string()),
            ("TLSBED_KEY_FILE", self.key_file.display().to_string()),
        ];
        if let Some(ip) = self.host_gateway_ip {
            pairs.push(("TLSBED_HOST_GATEWAY_IP", ip.to_string()));
        }
        pairs
    }

    /// Appends the env pairs to `path` as `KEY=value` lines.
    pub fn write_env_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        for (key, value) in self.env_pairs() {
            writeln!(file, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Derives [`PublishedOutputs`] from a ready instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputPublisher;

impl OutputPublisher {
    /// Creates a publisher.
    pub fn new() -> Self {
        Self
    }

    /// Publishes the outputs of `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Precondition`] unless the instance is
    /// `Ready`.
    pub fn publish(&self, instance: &ServiceInstance) -> Result<PublishedOutputs> {
        if !instance.is_ready() {
            return Err(OrchestratorError::precondition(format!(
                "cannot publish outputs for {} in state {}",
                instance.container_name,
                instance.state()
            )));
        }

        let plan = &instance.network_plan;
        let host = match &plan.mode {
            NetworkMode::Host => "localhost",
            NetworkMode::PortMapped { published_host, .. } => published_host.as_str(),
        };
        let host = match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
            _ => host.to_string(),
        };

        let bundle = &instance.trust_bundle;
        Ok(PublishedOutputs {
            service_url: format!("https://{}:{}", host, plan.port),
            container_name: instance.container_name.clone(),
            host_gateway_ip: plan.gateway_address(),
            ca_cert_path: bundle.ca_certificate_path.clone(),
            cert_file: bundle.leaf_certificate_path.clone(),
            key_file: bundle.leaf_key_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerImage, ServiceState};
    use crate::topology::NetworkPlan;
    use crate::trust::TrustBundle;

    fn instance(plan: NetworkPlan) -> ServiceInstance {
        let bundle = TrustBundle {
            ca_certificate_path: PathBuf::from("/c/rootCA.pem"),
            leaf_certificate_path: PathBuf::from("/c/localhost.pem"),
            leaf_key_path: PathBuf::from("/c/localhost-key.pem"),
            subject_hostname: "localhost".to_string(),
            ca_fingerprint: "aa".to_string(),
        };
        ServiceInstance::new("echo", plan, bundle, ContainerImage::new("httpbin"))
    }

    fn ready(plan: NetworkPlan) -> ServiceInstance {
        let mut svc = instance(plan);
        svc.transition(ServiceState::Starting).unwrap();
        svc.transition(ServiceState::Ready).unwrap();
        svc
    }

    #[test]
    fn test_publish_requires_ready() {
        let mut svc = instance(NetworkPlan::host(8080));
        let publisher = OutputPublisher::new();
        assert!(publisher.publish(&svc).is_err());

        svc.transition(ServiceState::Starting).unwrap();
        let err = publisher.publish(&svc).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Precondition);

        svc.transition(ServiceState::Failed).unwrap();
        assert!(publisher.publish(&svc).is_err());
    }

    #[test]
    fn test_publish_host_network() {
        let outputs = OutputPublisher::new()
            .publish(&ready(NetworkPlan::host(8080)))
            .unwrap();
        assert_eq!(outputs.service_url, "https://localhost:8080");
        assert_eq!(outputs.host_gateway_ip, None);
        assert_eq!(outputs.ca_cert_path, PathBuf::from("/c/rootCA.pem"));
    }

    #[test]
    fn test_publish_port_mapped() {
        let gateway: IpAddr = "172.17.0.1".parse().unwrap();
        let outputs = OutputPublisher::new()
            .publish(&ready(NetworkPlan::port_mapped(9443, gateway, "localhost")))
            .unwrap();
        assert_eq!(outputs.service_url, "https://localhost:9443");
        assert_eq!(outputs.host_gateway_ip, Some(gateway));
    }

    #[test]
    fn test_serialized_names_are_stable() {
        let gateway: IpAddr = "172.17.0.1".parse().unwrap();
        let outputs = OutputPublisher::new()
            .publish(&ready(NetworkPlan::port_mapped(8080, gateway, "localhost")))
            .unwrap();
        let json = serde_json::to_value(&outputs).unwrap();
        for key in [
            "serviceUrl",
            "containerName",
            "hostGatewayIp",
            "caCertPath",
            "certFile",
            "keyFile",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }

        let host = OutputPublisher::new()
            .publish(&ready(NetworkPlan::host(8080)))
            .unwrap();
        let json = serde_json::to_value(&host).unwrap();
        assert!(json.get("hostGatewayIp").is_none());
    }

    #[test]
    fn test_env_file_appends_pairs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outputs.env");
        std::fs::write(&path, "EXISTING=1\n").unwrap();

        let outputs = OutputPublisher::new()
            .publish(&ready(NetworkPlan::host(8080)))
            .unwrap();
        outputs.write_env_file(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("EXISTING=1\n"));
        assert!(contents.contains("TLSBED_SERVICE_URL=https://localhost:8080\n"));
        assert!(contents.contains("TLSBED_CA_CERT=/c/rootCA.pem\n"));
        assert!(!contents.contains("TLSBED_HOST_GATEWAY_IP"));
    }
}
