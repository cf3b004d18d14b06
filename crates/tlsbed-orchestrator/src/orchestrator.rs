//! Run sequencing.
//!
//! A run executes the stages strictly in order:
//!
//! ```text
//! TrustProvisioner ─▶ TopologyResolver ─▶ ServiceLauncher ─▶ ReadinessProber ─▶ OutputPublisher
//! ```
//!
//! The first failing stage aborts the run; no partial outputs are returned.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{ContainerRuntime, DockerBackend};
use crate::config::OrchestratorConfig;
use crate::container::ServiceInstance;
use crate::error::{OrchestratorError, Result};
use crate::launch::ServiceLauncher;
use crate::publish::{OutputPublisher, PublishedOutputs};
use crate::readiness::{Clock, HealthProbe, HttpsProbe, ReadinessProber, ReadinessResult, SystemClock};
use crate::topology::TopologyResolver;
use crate::trust::{TrustProvisioner, TrustStore};

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The published facts.
    pub outputs: PublishedOutputs,

    /// The ready instance.
    pub instance: ServiceInstance,

    /// How readiness was reached.
    pub readiness: ReadinessResult,
}

/// Sequences provisioning, launch, readiness and publishing for one service.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    trust_store: Option<Arc<dyn TrustStore>>,
}

impl Orchestrator {
    /// Creates an orchestrator on the given runtime, probing over HTTPS.
    pub fn new(config: OrchestratorConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            probe: Arc::new(HttpsProbe::new()),
            clock: Arc::new(SystemClock::new()),
            trust_store: None,
        }
    }

    /// Creates an orchestrator on the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Launch`] if no Docker client can be set up.
    pub async fn docker(config: OrchestratorConfig) -> Result<Self> {
        let backend = DockerBackend::with_config(config.docker_backend_config())
            .await
            .map_err(|e| {
                OrchestratorError::launch(
                    &config.container_name,
                    format!("docker runtime unavailable: {}", e),
                )
            })?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Replaces the health probe.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the clock used by the prober.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the trust store selected by the configuration.
    pub fn with_trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs all stages and returns the published outputs.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the first failing stage. A
    /// [`ReadinessTimeout`](crate::OrchestratorError::ReadinessTimeout)
    /// leaves the container running and carries the captured diagnostics.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let config = &self.config;

        let store = match &self.trust_store {
            Some(store) => Arc::clone(store),
            None => config.trust_store()?,
        };
        let bundle = TrustProvisioner::new(&config.cert_dir, store)
            .extra_sans(config.extra_sans.clone())
            .leaf_validity(config.leaf_validity())
            .provision(&config.hostname)
            .await?;

        let launcher = ServiceLauncher::new(Arc::clone(&self.runtime));
        launcher.check_runtime(&config.container_name).await?;

        let plan = TopologyResolver::new(Arc::clone(&self.runtime))
            .gateway_override(config.gateway_override)
            .published_host(&config.published_host)
            .resolve(config.use_host_network, config.port)
            .await?;

        let mut instance = launcher
            .launch(
                plan,
                bundle,
                config.image(),
                &config.container_name,
                &config.launch_config(),
            )
            .await?;

        let prober = ReadinessProber::new(Arc::clone(&self.runtime), Arc::clone(&self.probe))
            .with_clock(Arc::clone(&self.clock))
            .with_config(config.prober_config());
        let readiness = prober
            .await_ready(&mut instance, config.wait_timeout())
            .await?;
        if !readiness.ready {
            warn!(
                container = %instance.container_name,
                "Leaving container running for inspection"
            );
        }
        let readiness = readiness.ensure_ready(&instance.container_name)?;

        let outputs = OutputPublisher::new().publish(&instance)?;
        if let Some(path) = &config.outputs_file {
            outputs.write_env_file(path)?;
            info!(path = %path.display(), "Wrote outputs file");
        }

        info!(
            container = %outputs.container_name,
            url = %outputs.service_url,
            "Service published"
        );

        Ok(RunReport {
            outputs,
            instance,
            readiness,
        })
    }

    /// Removes the named container, or the configured one if `None`.
    pub async fn down(&self, container_name: Option<&str>) -> Result<()> {
        let name = container_name.unwrap_or(&self.config.container_name);
        if name.is_empty() {
            return Err(OrchestratorError::precondition(
                "no container name to tear down",
            ));
        }
        ServiceLauncher::new(Arc::clone(&self.runtime))
            .remove(name)
            .await
    }
}
