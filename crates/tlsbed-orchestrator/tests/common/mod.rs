//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tlsbed_orchestrator::readiness::{ProbeError, ProbeTarget};
use tlsbed_orchestrator::trust::NoopTrustStore;
use tlsbed_orchestrator::{
    ContainerImage, ContainerInfo, ContainerRuntime, ContainerSpec, HealthProbe, ManualClock,
    Orchestrator, OrchestratorConfig, OrchestratorError, Result, TrustStoreKind,
};

pub const GATEWAY: &str = "172.17.0.1";

/// In-memory container runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    pub gateway: Option<IpAddr>,
    pub gateway_fails: bool,
    /// Containers stop right after start.
    pub exit_on_start: bool,
    /// The daemon does not answer.
    pub unavailable: bool,
    pub logs: String,
    /// Added to every `inspect` and `logs` call.
    delay: Mutex<Duration>,
    containers: Mutex<HashMap<String, ContainerInfo>>,
    started: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            gateway: Some(GATEWAY.parse().unwrap()),
            logs: "go-httpbin listening on https://0.0.0.0:8080\n".to_string(),
            ..Default::default()
        }
    }

    pub fn without_gateway() -> Self {
        Self {
            gateway: None,
            ..Self::new()
        }
    }

    pub fn failing_gateway() -> Self {
        Self {
            gateway_fails: true,
            ..Self::new()
        }
    }

    pub fn exiting() -> Self {
        Self {
            exit_on_start: true,
            ..Self::new()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    /// Makes `inspect` and `logs` hang for `delay` from now on.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn stall(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Registers a container as if left over from an earlier run.
    pub fn add_existing(&self, name: &str) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                id: "old0000000000000".to_string(),
                name: name.to_string(),
                status: "running".to_string(),
                running: true,
                exit_code: None,
            },
        );
    }

    pub fn started(&self) -> Vec<ContainerSpec> {
        self.started.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        if self.unavailable {
            return Err(OrchestratorError::configuration(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            ));
        }
        Ok(())
    }

    async fn host_gateway(&self) -> Result<Option<IpAddr>> {
        if self.gateway_fails {
            return Err(OrchestratorError::from(std::io::Error::other(
                "network bridge not found",
            )));
        }
        Ok(self.gateway)
    }

    async fn pull_image(&self, image: &ContainerImage) -> Result<()> {
        if image.reference().contains("does-not-exist") {
            return Err(OrchestratorError::image_pull(
                image.pull_reference(),
                "manifest unknown",
            ));
        }
        self.pulled.lock().unwrap().push(image.pull_reference());
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.stall().await;
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(OrchestratorError::launch(
                &spec.name,
                "Conflict. The container name is already in use",
            ));
        }

        let id = format!("{:0>64}", containers.len() + 1);
        let (status, running, exit_code) = if self.exit_on_start {
            ("exited", false, Some(1))
        } else {
            ("running", true, None)
        };
        containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                status: status.to_string(),
                running,
                exit_code,
            },
        );
        self.started.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn logs(&self, _name: &str, _tail: Option<usize>) -> Result<String> {
        self.stall().await;
        Ok(self.logs.clone())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.containers.lock().unwrap().remove(name);
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Health probe replaying scripted outcomes; the last one repeats.
#[derive(Debug)]
pub struct ScriptedProbe {
    outcomes: Mutex<VecDeque<std::result::Result<u16, ProbeError>>>,
    last: Mutex<std::result::Result<u16, ProbeError>>,
    checks: AtomicU32,
    unverified: AtomicU32,
    targets: Mutex<Vec<ProbeTarget>>,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<std::result::Result<u16, ProbeError>>) -> Self {
        let last = outcomes
            .last()
            .cloned()
            .unwrap_or(Err(ProbeError::Connect("connection refused".to_string())));
        Self {
            outcomes: Mutex::new(outcomes.into()),
            last: Mutex::new(last),
            checks: AtomicU32::new(0),
            unverified: AtomicU32::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn healthy() -> Self {
        Self::new(vec![Ok(200)])
    }

    pub fn refusing() -> Self {
        Self::new(vec![Err(ProbeError::Connect("connection refused".to_string()))])
    }

    /// Fails `n` times, then succeeds.
    pub fn ready_after(n: usize) -> Self {
        let mut outcomes: Vec<_> = (0..n)
            .map(|_| Err(ProbeError::Connect("connection refused".to_string())))
            .collect();
        outcomes.push(Ok(200));
        Self::new(outcomes)
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn unverified_checks(&self) -> u32 {
        self.unverified.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<ProbeTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(
        &self,
        target: &ProbeTarget,
        _timeout: Duration,
    ) -> std::result::Result<u16, ProbeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => self.last.lock().unwrap().clone(),
        }
    }

    async fn check_unverified(&self, target: &ProbeTarget, _timeout: Duration) -> String {
        self.unverified.fetch_add(1, Ordering::SeqCst);
        format!("GET {} (certificate not verified): HTTP 200 OK", target.url)
    }
}

/// Configuration writing certificates under `dir` and installing nothing.
pub fn test_config(dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        container_name: "tlsbed-test".to_string(),
        cert_dir: dir.join("certs"),
        install_ca: TrustStoreKind::None,
        wait_timeout_secs: 60,
        ..Default::default()
    }
}

/// Orchestrator wired to fakes and a manual clock.
pub fn orchestrator(
    config: OrchestratorConfig,
    runtime: Arc<FakeRuntime>,
    probe: Arc<ScriptedProbe>,
) -> (Orchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let orchestrator = Orchestrator::new(config, runtime)
        .with_probe(probe)
        .with_clock(clock.clone())
        .with_trust_store(Arc::new(NoopTrustStore));
    (orchestrator, clock)
}
