//! Trust stores the local CA is installed into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

/// Where the CA is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustStoreKind {
    /// The host's system anchors, refreshed with `update-ca-certificates`.
    #[default]
    System,

    /// A plain directory of anchors (no refresh command).
    Directory,

    /// Do not install the CA anywhere.
    None,
}

/// A place a CA certificate can be trusted from.
///
/// `install` must be idempotent: installing the same fingerprint twice
/// leaves a single entry.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Returns the name of this store.
    fn name(&self) -> &str;

    /// Returns true if a CA with this fingerprint is already trusted.
    async fn contains(&self, fingerprint: &str) -> Result<bool>;

    /// Trusts the CA.
    async fn install(&self, ca_pem: &str, fingerprint: &str) -> Result<()>;
}

/// A directory of PEM anchors, optionally followed by a refresh command.
#[derive(Debug, Clone)]
pub struct DirectoryTrustStore {
    dir: PathBuf,
    refresh_command: Option<Vec<String>>,
}

impl DirectoryTrustStore {
    /// Debian/Ubuntu system anchor directory.
    pub const SYSTEM_ANCHOR_DIR: &'static str = "/usr/local/share/ca-certificates";

    /// Creates a store writing anchors to `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            refresh_command: None,
        }
    }

    /// Creates a store for the system anchors, refreshed after install.
    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ANCHOR_DIR).refresh_command(["update-ca-certificates"])
    }

    /// Sets the command run after an anchor is written.
    pub fn refresh_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        self.refresh_command = (!command.is_empty()).then_some(command);
        self
    }

    /// Returns the anchor directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the anchor path for a fingerprint.
    ///
    /// The name is derived from the fingerprint, so re-installing the same CA
    /// overwrites rather than duplicates.
    pub fn anchor_path(&self, fingerprint: &str) -> PathBuf {
        let short: String = fingerprint.chars().take(16).collect();
        self.dir.join(format!("tlsbed-{}.crt", short))
    }

    async fn refresh(&self) -> Result<()> {
        let Some((program, args)) = self.refresh_command.as_ref().and_then(|c| c.split_first())
        else {
            return Ok(());
        };

        debug!(program = %program, "Refreshing trust store");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::trust(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(OrchestratorError::trust(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TrustStore for DirectoryTrustStore {
    fn name(&self) -> &str {
        if self.refresh_command.is_some() {
            "system"
        } else {
            "directory"
        }
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.anchor_path(fingerprint))
            .await
            .unwrap_or(false))
    }

    async fn install(&self, ca_pem: &str, fingerprint: &str) -> Result<()> {
        let path = self.anchor_path(fingerprint);

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            OrchestratorError::trust(format!(
                "cannot create trust anchor directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        tokio::fs::write(&path, ca_pem).await.map_err(|e| {
            OrchestratorError::trust(format!(
                "cannot write trust anchor {}: {}",
                path.display(),
                e
            ))
        })?;

        self.refresh().await?;

        info!(store = %self.name(), path = %path.display(), "Installed CA into trust store");
        Ok(())
    }
}

/// A trust store that trusts nothing and installs nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrustStore;

#[async_trait]
impl TrustStore for NoopTrustStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn contains(&self, _fingerprint: &str) -> Result<bool> {
        Ok(true)
    }

    async fn install(&self, _ca_pem: &str, _fingerprint: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn test_directory_store_install_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::new(temp_dir.path().join("anchors"));

        assert!(!store.contains(FP).await.unwrap());
        store.install("PEM", FP).await.unwrap();
        store.install("PEM", FP).await.unwrap();
        assert!(store.contains(FP).await.unwrap());

        let entries = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);
        assert_eq!(
            store.anchor_path(FP).file_name().unwrap(),
            "tlsbed-0123456789abcdef.crt"
        );
    }

    #[tokio::test]
    async fn test_refresh_command_failure_is_trust_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::new(temp_dir.path()).refresh_command(["false"]);

        let err = store.install("PEM", FP).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TrustProvisioning);
    }

    #[tokio::test]
    async fn test_missing_refresh_program_is_trust_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::new(temp_dir.path())
            .refresh_command(["tlsbed-definitely-not-installed"]);

        let err = store.install("PEM", FP).await.unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }

    #[test]
    fn test_anchor_path_handles_short_and_non_ascii_names() {
        let store = DirectoryTrustStore::new("/anchors");
        assert_eq!(store.anchor_path("abc"), PathBuf::from("/anchors/tlsbed-abc.crt"));
        assert_eq!(
            store.anchor_path("ééééééééééééééééé"),
            PathBuf::from("/anchors/tlsbed-éééééééééééééééé.crt")
        );
    }

    #[test]
    fn test_store_names() {
        assert_eq!(DirectoryTrustStore::system().name(), "system");
        assert_eq!(DirectoryTrustStore::new("/tmp").name(), "directory");
        assert_eq!(NoopTrustStore.name(), "none");
    }

    #[test]
    fn test_store_kind_serde() {
        let kind: TrustStoreKind = serde_json::from_str("\"directory\"").unwrap();
        assert_eq!(kind, TrustStoreKind::Directory);
    }
}
