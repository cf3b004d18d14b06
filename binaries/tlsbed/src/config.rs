//! CLI configuration.
//!
//! The file format is the orchestrator's options at the top level plus a
//! `[logging]` table:
//!
//! ```toml
//! container_name = "ci-echo"
//! port = 8443
//! use_host_network = false
//! install_ca = "system"
//!
//! [logging]
//! level = "debug"
//! format = "compact"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tlsbed_orchestrator::OrchestratorConfig;

/// Complete CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsbedConfig {
    /// Orchestrator options.
    #[serde(flatten)]
    pub run: OrchestratorConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl TlsbedConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges global CLI flags into the configuration.
    pub fn merge_global_args(&mut self, args: &super::CliArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.format = "json".to_string();
        }
    }

    /// Merges `up` flags into the configuration.
    pub fn merge_up_args(&mut self, args: &super::UpArgs) {
        let run = &mut self.run;

        if let Some(ref name) = args.container_name {
            run.container_name = name.clone();
        }
        if let Some(port) = args.port {
            run.port = port;
        }
        if let Some(ref image) = args.image {
            run.image = image.clone();
        }
        if args.host_network {
            run.use_host_network = true;
        }
        if let Some(secs) = args.wait_timeout {
            run.wait_timeout_secs = secs;
        }
        if args.debug {
            run.debug = true;
        }
        if let Some(ref hostname) = args.hostname {
            run.hostname = hostname.clone();
        }
        if let Some(ref dir) = args.cert_dir {
            run.cert_dir = dir.clone();
        }
        if let Some(kind) = args.install_ca {
            run.install_ca = kind;
        }
        if let Some(ref dir) = args.trust_dir {
            run.trust_dir = Some(dir.clone());
        }
        if !args.extra_san.is_empty() {
            run.extra_sans.extend(args.extra_san.iter().cloned());
        }
        if let Some(gateway) = args.gateway {
            run.gateway_override = Some(gateway);
        }
        if let Some(ref path) = args.outputs_file {
            run.outputs_file = Some(path.clone());
        }

        // Debug runs log at debug level unless a level was asked for.
        if run.debug && self.logging.level == LoggingConfig::default().level {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        self.run.validate()?;
        Ok(())
    }
}
