//! Health-gated readiness polling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::ContainerRuntime;
use crate::container::{ServiceInstance, ServiceState};
use crate::error::{OrchestratorError, Result};
use crate::readiness::{
    Clock, HealthProbe, ProbeError, ProbeTarget, SystemClock, DEFAULT_PROBE_PATH,
};

/// Prober tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProberConfig {
    /// Fixed delay between attempts.
    pub poll_interval: Duration,

    /// Upper bound on a single attempt.
    pub probe_timeout: Duration,

    /// Path requested on the service.
    pub probe_path: String,

    /// Number of log lines captured on failure.
    pub log_tail: usize,

    /// Capture diagnostics even when the service becomes ready.
    pub debug: bool,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            log_tail: 200,
            debug: false,
        }
    }
}

/// Context captured to explain a failed (or, in debug mode, any) wait.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Container state as reported by the runtime.
    pub container_state: Option<String>,

    /// Tail of the container logs.
    pub logs: Option<String>,

    /// Outcome of one request made without certificate verification.
    pub unverified_attempt: Option<String>,
}

impl Diagnostics {
    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.container_state.is_none() && self.logs.is_none() && self.unverified_attempt.is_none()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(state) = &self.container_state {
            writeln!(f, "container: {}", state)?;
        }
        if let Some(attempt) = &self.unverified_attempt {
            writeln!(f, "connectivity: {}", attempt)?;
        }
        if let Some(logs) = &self.logs {
            writeln!(f, "--- container logs ---")?;
            write!(f, "{}", logs)?;
            if !logs.ends_with('\n') {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessResult {
    /// Whether a verified probe succeeded.
    pub ready: bool,

    /// Time spent waiting.
    pub elapsed: Duration,

    /// Number of probe attempts made.
    pub attempts: u32,

    /// The last probe failure.
    pub last_error: Option<String>,

    /// Captured diagnostics.
    pub diagnostics: Option<Diagnostics>,
}

impl ReadinessResult {
    /// Converts a failed wait into [`OrchestratorError::ReadinessTimeout`].
    pub fn ensure_ready(self, container: &str) -> Result<Self> {
        if self.ready {
            return Ok(self);
        }
        Err(OrchestratorError::readiness_timeout(
            container,
            self.elapsed,
            self.last_error
                .unwrap_or_else(|| "service never answered".to_string()),
            self.diagnostics.map(|d| d.to_string()),
        ))
    }
}

/// Polls a started service until a verified TLS probe succeeds.
pub struct ReadinessProber {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    config: ProberConfig,
}

impl ReadinessProber {
    /// Creates a prober using the system clock and default tuning.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            runtime,
            probe,
            clock: Arc::new(SystemClock::new()),
            config: ProberConfig::default(),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the tuning.
    pub fn with_config(mut self, config: ProberConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the tuning.
    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Waits up to `timeout` for the instance to answer a verified probe.
    ///
    /// Moves the instance to `Ready` on success and to `Failed` otherwise.
    /// A zero timeout fails immediately without probing. Polling stops early
    /// if the container exits. Every probe and runtime call inside the wait
    /// is cut off at the deadline; diagnostics capture afterwards is bounded
    /// by the per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Precondition`] if the instance is not
    /// `Starting`. A timeout is not an error here; it is reported through
    /// the returned [`ReadinessResult`].
    pub async fn await_ready(
        &self,
        instance: &mut ServiceInstance,
        timeout: Duration,
    ) -> Result<ReadinessResult> {
        if instance.state() != ServiceState::Starting {
            return Err(OrchestratorError::precondition(format!(
                "cannot probe {} in state {}",
                instance.container_name,
                instance.state()
            )));
        }

        let name = instance.container_name.clone();

        if timeout.is_zero() {
            warn!(container = %name, "Wait timeout is zero, not probing");
            let diagnostics = self.capture_diagnostics(&name, None).await;
            instance.transition(ServiceState::Failed)?;
            return Ok(ReadinessResult {
                ready: false,
                elapsed: Duration::ZERO,
                attempts: 0,
                last_error: Some("wait timeout is zero; no probe attempted".to_string()),
                diagnostics: Some(diagnostics),
            });
        }

        info!(
            container = %name,
            host = %instance.network_plan.service_host(),
            port = instance.network_plan.port,
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for service readiness"
        );

        let start = self.clock.now();
        let deadline = start + timeout;
        let mut target: Option<ProbeTarget> = None;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        let mut ready = false;
        let mut exited = false;

        loop {
            let now = self.clock.now();
            if now >= deadline {
                break;
            }

            attempts += 1;
            let budget = self.config.probe_timeout.min(deadline - now);
            match self.attempt(instance, &mut target, budget).await {
                Ok(status) => {
                    debug!(container = %name, attempt = attempts, status, "Probe succeeded");
                    ready = true;
                    break;
                }
                Err(e) => {
                    debug!(container = %name, attempt = attempts, error = %e, "Probe failed");
                    last_error = Some(e.to_string());
                }
            }

            let budget = self
                .config
                .probe_timeout
                .min(deadline.saturating_sub(self.clock.now()));
            match tokio::time::timeout(budget, self.runtime.inspect(&name)).await {
                Ok(Ok(Some(info))) if !info.running => {
                    warn!(container = %name, state = %info.summary(), "Container stopped while waiting");
                    last_error = Some(format!(
                        "container is no longer running ({}); last probe error: {}",
                        info.summary(),
                        last_error.as_deref().unwrap_or("none")
                    ));
                    exited = true;
                    break;
                }
                Ok(Ok(None)) => {
                    warn!(container = %name, "Container disappeared while waiting");
                    last_error = Some("container no longer exists".to_string());
                    exited = true;
                    break;
                }
                Ok(Ok(Some(_))) => {}
                Ok(Err(e)) => debug!(container = %name, error = %e, "Inspect failed during wait"),
                Err(_) => debug!(container = %name, "Inspect timed out during wait"),
            }

            let now = self.clock.now();
            if now >= deadline {
                break;
            }
            self.clock
                .sleep(self.config.poll_interval.min(deadline - now))
                .await;
        }

        let elapsed = self.clock.now().saturating_sub(start);

        let diagnostics = if !ready || self.config.debug {
            let unverified_target = if exited { None } else { target.as_ref() };
            Some(self.capture_diagnostics(&name, unverified_target).await)
        } else {
            None
        };

        if ready {
            instance.transition(ServiceState::Ready)?;
            info!(
                container = %name,
                attempts,
                elapsed_secs = elapsed.as_secs_f64(),
                "Service ready"
            );
        } else {
            instance.transition(ServiceState::Failed)?;
            warn!(
                container = %name,
                attempts,
                elapsed_secs = elapsed.as_secs_f64(),
                last_error = last_error.as_deref().unwrap_or(""),
                "Service did not become ready"
            );
        }

        Ok(ReadinessResult {
            ready,
            elapsed,
            attempts,
            last_error,
            diagnostics,
        })
    }

    /// One probe attempt, resolving the target first if needed.
    ///
    /// Resolution and the request together are cut off after `budget`.
    async fn attempt(
        &self,
        instance: &ServiceInstance,
        target: &mut Option<ProbeTarget>,
        budget: Duration,
    ) -> std::result::Result<u16, ProbeError> {
        let started = tokio::time::Instant::now();

        let resolved = match target.take() {
            Some(resolved) => resolved,
            None => {
                let resolving = ProbeTarget::resolve(instance, &self.config.probe_path);
                match tokio::time::timeout(budget, resolving).await {
                    Ok(resolved) => resolved?,
                    Err(_) => {
                        return Err(ProbeError::Resolve(format!(
                            "{}: no answer within {}ms",
                            instance.network_plan.service_host(),
                            budget.as_millis()
                        )))
                    }
                }
            }
        };

        let remaining = budget.saturating_sub(started.elapsed());
        let outcome = tokio::time::timeout(remaining, self.probe.check(&resolved, remaining))
            .await
            .unwrap_or(Err(ProbeError::Timeout(budget)));
        *target = Some(resolved);
        outcome
    }

    /// Collects container state, logs and, given a target, one unverified
    /// request. The three run concurrently, each bounded by the per-attempt
    /// timeout.
    async fn capture_diagnostics(&self, name: &str, target: Option<&ProbeTarget>) -> Diagnostics {
        let bound = self.config.probe_timeout;

        let container_state = async {
            match tokio::time::timeout(bound, self.runtime.inspect(name)).await {
                Ok(Ok(Some(info))) => info.summary(),
                Ok(Ok(None)) => "not found".to_string(),
                Ok(Err(e)) => format!("inspect failed: {}", e),
                Err(_) => format!("inspect timed out after {}ms", bound.as_millis()),
            }
        };

        let logs = async {
            match tokio::time::timeout(bound, self.runtime.logs(name, Some(self.config.log_tail)))
                .await
            {
                Ok(Ok(logs)) => logs,
                Ok(Err(e)) => format!("<could not fetch logs: {}>", e),
                Err(_) => format!("<logs timed out after {}ms>", bound.as_millis()),
            }
        };

        let unverified_attempt = async {
            let Some(target) = target else {
                return None;
            };
            let report = tokio::time::timeout(bound, self.probe.check_unverified(target, bound))
                .await
                .unwrap_or_else(|_| {
                    format!(
                        "GET {} (certificate not verified): no response within {}ms",
                        target.url,
                        bound.as_millis()
                    )
                });
            Some(report)
        };

        let (container_state, logs, unverified_attempt) =
            futures::join!(container_state, logs, unverified_attempt);

        Diagnostics {
            container_state: Some(container_state),
            logs: Some(logs),
            unverified_attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProberConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.probe_path, "/status/200");
        assert!(!config.debug);
    }

    #[test]
    fn test_ensure_ready_maps_timeout() {
        let result = ReadinessResult {
            ready: false,
            elapsed: Duration::from_secs(3),
            attempts: 3,
            last_error: Some("connection refused".to_string()),
            diagnostics: Some(Diagnostics {
                logs: Some("listening".to_string()),
                ..Default::default()
            }),
        };

        let err = result.ensure_ready("echo").unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.diagnostics().unwrap().contains("listening"));
    }

    #[test]
    fn test_diagnostics_render() {
        let diag = Diagnostics {
            container_state: Some("echo (abc) status=running".to_string()),
            logs: Some("line 1\nline 2".to_string()),
            unverified_attempt: Some("HTTP 200".to_string()),
        };
        let text = diag.to_string();
        assert!(text.starts_with("container: echo (abc) status=running\n"));
        assert!(text.contains("connectivity: HTTP 200\n"));
        assert!(text.ends_with("line 2\n"));
        assert!(Diagnostics::default().is_empty());
    }
}
