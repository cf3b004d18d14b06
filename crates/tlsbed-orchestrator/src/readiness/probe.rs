//! TLS health probes.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::container::ServiceInstance;

/// Default liveness path; go-httpbin answers it with 200.
pub const DEFAULT_PROBE_PATH: &str = "/status/200";

/// Why a single probe attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The probe could not be set up (unreadable CA, bad URL).
    #[error("probe setup failed: {0}")]
    Setup(String),

    /// The published host did not resolve to an address.
    #[error("cannot resolve published host: {0}")]
    Resolve(String),

    /// TCP connect or TLS handshake failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response within the attempt timeout.
    #[error("no response within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The service answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// Where and how to probe a launched service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// URL requested, using the certificate's hostname.
    pub url: String,

    /// Hostname the certificate must be valid for.
    pub hostname: String,

    /// Address the connection is actually made to.
    pub connect_addr: SocketAddr,

    /// CA used to verify the server certificate.
    pub ca_certificate_path: PathBuf,
}

impl ProbeTarget {
    /// Builds the probe target for an instance, resolving its published host.
    ///
    /// The request names the certificate's subject hostname, so the TLS
    /// handshake verifies the issued leaf, but the connection goes to the
    /// address the service is published at. `localhost` maps to the IPv4
    /// loopback; other names go through the system resolver, preferring
    /// IPv4 results.
    pub async fn resolve(instance: &ServiceInstance, path: &str) -> Result<Self, ProbeError> {
        let port = instance.network_plan.port;
        let host = instance.network_plan.service_host();

        let connect_ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) if host.eq_ignore_ascii_case("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(_) => {
                let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|e| ProbeError::Resolve(format!("{}: {}", host, e)))?
                    .collect();
                addrs.sort_by_key(|addr| !addr.is_ipv4());
                let addr = addrs
                    .first()
                    .ok_or_else(|| ProbeError::Resolve(format!("{}: no addresses", host)))?;
                debug!(host, addr = %addr, "Resolved published host");
                addr.ip()
            }
        };

        Ok(Self::with_connect_addr(
            instance,
            path,
            SocketAddr::new(connect_ip, port),
        ))
    }

    /// Builds the probe target for an instance connecting to `connect_addr`.
    pub fn with_connect_addr(
        instance: &ServiceInstance,
        path: &str,
        connect_addr: SocketAddr,
    ) -> Self {
        let hostname = instance.trust_bundle.subject_hostname.clone();

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let url_host = match hostname.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
            _ => hostname.clone(),
        };

        Self {
            url: format!("https://{}:{}{}", url_host, connect_addr.port(), path),
            hostname,
            connect_addr,
            ca_certificate_path: instance.trust_bundle.ca_certificate_path.clone(),
        }
    }
}

/// A single readiness check against a service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Performs one verified request; returns the HTTP status on success.
    async fn check(&self, target: &ProbeTarget, timeout: Duration) -> Result<u16, ProbeError>;

    /// Performs one request without certificate verification.
    ///
    /// Used only for diagnostics after a failed wait; the result is a
    /// human-readable description either way.
    async fn check_unverified(&self, target: &ProbeTarget, timeout: Duration) -> String;
}

/// HTTPS probe using reqwest with the run's CA as the only trust root.
#[derive(Debug, Clone, Default)]
pub struct HttpsProbe;

impl HttpsProbe {
    /// Creates a probe.
    pub fn new() -> Self {
        Self
    }

    async fn verified_client(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> Result<reqwest::Client, ProbeError> {
        let pem = tokio::fs::read(&target.ca_certificate_path)
            .await
            .map_err(|e| {
                ProbeError::Setup(format!(
                    "cannot read CA {}: {}",
                    target.ca_certificate_path.display(),
                    e
                ))
            })?;
        let ca = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| ProbeError::Setup(format!("invalid CA certificate: {}", e)))?;

        reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .resolve(&target.hostname, target.connect_addr)
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Setup(e.to_string()))
    }
}

#[async_trait]
impl HealthProbe for HttpsProbe {
    async fn check(&self, target: &ProbeTarget, timeout: Duration) -> Result<u16, ProbeError> {
        let client = self.verified_client(target, timeout).await?;

        let response = client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }

    async fn check_unverified(&self, target: &ProbeTarget, timeout: Duration) -> String {
        let client = match reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .resolve(&target.hostname, target.connect_addr)
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => return format!("could not build client: {}", e),
        };

        match client.get(&target.url).send().await {
            Ok(response) => {
                debug!(url = %target.url, status = %response.status(), "Unverified probe answered");
                format!(
                    "GET {} via {} (certificate not verified): HTTP {}",
                    target.url,
                    target.connect_addr,
                    response.status()
                )
            }
            Err(e) => format!(
                "GET {} via {} (certificate not verified): {}",
                target.url,
                target.connect_addr,
                classify(e, timeout)
            ),
        }
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if err.is_connect() {
        ProbeError::Connect(error_chain(&err))
    } else {
        ProbeError::Request(error_chain(&err))
    }
}

/// Joins an error and its sources; reqwest hides the TLS cause in the chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerImage;
    use crate::topology::NetworkPlan;
    use crate::trust::{NoopTrustStore, TrustBundle, TrustProvisioner};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::rustls;
    use tokio_rustls::TlsAcceptor;

    fn instance(plan: NetworkPlan, hostname: &str) -> ServiceInstance {
        let bundle = TrustBundle {
            ca_certificate_path: PathBuf::from("/certs/rootCA.pem"),
            leaf_certificate_path: PathBuf::from("/certs/leaf.pem"),
            leaf_key_path: PathBuf::from("/certs/leaf-key.pem"),
            subject_hostname: hostname.to_string(),
            ca_fingerprint: "ab".to_string(),
        };
        ServiceInstance::new("echo", plan, bundle, ContainerImage::new("httpbin"))
    }

    /// Serves `HTTP 200` over TLS with the bundle's leaf until the test ends.
    async fn serve_leaf(bundle: &TrustBundle) -> u16 {
        let cert_pem = std::fs::read(&bundle.leaf_certificate_path).unwrap();
        let key_pem = std::fs::read(&bundle.leaf_key_path).unwrap();
        let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .unwrap()
            .unwrap();

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    // Handshakes fail when the client rejects the leaf.
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = tls
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                        )
                        .await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn test_target_uses_subject_hostname_and_loopback() {
        let plan = NetworkPlan::port_mapped(8443, "172.17.0.1".parse().unwrap(), "localhost");
        let target = ProbeTarget::resolve(&instance(plan, "echo.test"), "status/200")
            .await
            .unwrap();

        assert_eq!(target.url, "https://echo.test:8443/status/200");
        assert_eq!(target.connect_addr, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(target.ca_certificate_path, PathBuf::from("/certs/rootCA.pem"));
    }

    #[tokio::test]
    async fn test_target_connects_to_published_ip() {
        let plan = NetworkPlan::port_mapped(8080, "172.17.0.1".parse().unwrap(), "10.0.0.5");
        let target = ProbeTarget::resolve(&instance(plan, "localhost"), DEFAULT_PROBE_PATH)
            .await
            .unwrap();
        assert_eq!(target.connect_addr, "10.0.0.5:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_published_host_is_an_error() {
        // `.invalid` never resolves.
        let plan = NetworkPlan::port_mapped(8443, "172.17.0.1".parse().unwrap(), "dind.invalid");
        let err = ProbeTarget::resolve(&instance(plan, "localhost"), "/")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Resolve(ref msg) if msg.contains("dind.invalid")));
    }

    #[test]
    fn test_target_brackets_ipv6_hostname() {
        let target = ProbeTarget::with_connect_addr(
            &instance(NetworkPlan::host(8080), "::1"),
            "/",
            "[::1]:8080".parse().unwrap(),
        );
        assert_eq!(target.url, "https://[::1]:8080/");
    }

    #[test]
    fn test_probe_error_display() {
        assert_eq!(ProbeError::Status(503).to_string(), "unexpected HTTP status 503");
        assert_eq!(
            ProbeError::Timeout(Duration::from_secs(2)).to_string(),
            "no response within 2000ms"
        );
    }

    #[tokio::test]
    async fn test_missing_ca_is_setup_error() {
        let target = ProbeTarget::resolve(&instance(NetworkPlan::host(1), "localhost"), "/")
            .await
            .unwrap();
        let err = HttpsProbe::new()
            .check(&target, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Setup(_)));
    }

    #[tokio::test]
    async fn test_verified_check_accepts_issued_leaf() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bundle = TrustProvisioner::new(temp_dir.path(), Arc::new(NoopTrustStore))
            .provision("echo.test")
            .await
            .unwrap();
        let port = serve_leaf(&bundle).await;

        let mut svc = instance(NetworkPlan::host(port), "echo.test");
        svc.trust_bundle = bundle;
        let target = ProbeTarget::resolve(&svc, DEFAULT_PROBE_PATH).await.unwrap();
        assert_eq!(target.url, format!("https://echo.test:{}/status/200", port));

        let status = HttpsProbe::new()
            .check(&target, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_verified_check_rejects_foreign_ca() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bundle = TrustProvisioner::new(temp_dir.path().join("run"), Arc::new(NoopTrustStore))
            .provision("localhost")
            .await
            .unwrap();
        let foreign = TrustProvisioner::new(temp_dir.path().join("other"), Arc::new(NoopTrustStore))
            .provision("localhost")
            .await
            .unwrap();
        let port = serve_leaf(&bundle).await;

        let mut svc = instance(NetworkPlan::host(port), "localhost");
        svc.trust_bundle = bundle;
        svc.trust_bundle.ca_certificate_path = foreign.ca_certificate_path;
        let target = ProbeTarget::resolve(&svc, "/").await.unwrap();

        let err = HttpsProbe::new()
            .check(&target, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(!matches!(err, ProbeError::Status(_) | ProbeError::Setup(_)));
        assert!(err.to_string().contains("certificate"), "{}", err);

        let report = HttpsProbe::new()
            .check_unverified(&target, Duration::from_secs(5))
            .await;
        assert!(report.contains("HTTP 200"), "{}", report);
    }

    #[tokio::test]
    async fn test_unverified_attempt_reports_connection_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut svc = instance(NetworkPlan::host(port), "localhost");
        svc.trust_bundle.ca_certificate_path = temp_dir.path().join("missing.pem");
        let target = ProbeTarget::resolve(&svc, "/").await.unwrap();

        let report = HttpsProbe::new()
            .check_unverified(&target, Duration::from_millis(500))
            .await;
        assert!(report.contains("certificate not verified"));
        assert!(!report.contains("HTTP 2"));
    }
}
