//! Certificate provisioning.
//!
//! Creates (or reuses) the local CA, makes sure it is trusted, and issues a
//! server certificate for the target hostname. Files are written to a fixed
//! directory so later steps can find them:
//!
//! ```text
//! <cert_dir>/rootCA.pem              CA certificate
//! <cert_dir>/rootCA-key.pem          CA private key (0600)
//! <cert_dir>/rootCA.fingerprint      fingerprint of the installed CA
//! <cert_dir>/<hostname>.pem          leaf certificate
//! <cert_dir>/<hostname>-key.pem      leaf private key (0600)
//! <cert_dir>/.ca.lock                held while the CA is created/installed
//! ```

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::trust::authority::{self, CertificateAuthority};
use crate::trust::TrustStore;

const CA_CERT_FILE: &str = "rootCA.pem";
const CA_KEY_FILE: &str = "rootCA-key.pem";
const FINGERPRINT_FILE: &str = "rootCA.fingerprint";
const LOCK_FILE: &str = ".ca.lock";

/// Default validity of issued leaf certificates.
pub const DEFAULT_LEAF_VALIDITY: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Certificate material for one run.
///
/// The leaf at `leaf_certificate_path` is signed by the CA at
/// `ca_certificate_path` and valid for `subject_hostname`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundle {
    /// CA certificate (PEM).
    pub ca_certificate_path: PathBuf,

    /// Leaf certificate (PEM).
    pub leaf_certificate_path: PathBuf,

    /// Leaf private key (PEM, PKCS#8).
    pub leaf_key_path: PathBuf,

    /// Hostname the leaf is issued for.
    pub subject_hostname: String,

    /// SHA-256 fingerprint of the CA certificate.
    pub ca_fingerprint: String,
}

/// Creates the CA and issues leaf certificates.
pub struct TrustProvisioner {
    cert_dir: PathBuf,
    store: Arc<dyn TrustStore>,
    extra_sans: Vec<String>,
    leaf_validity: Duration,
}

impl TrustProvisioner {
    /// Creates a provisioner writing into `cert_dir` and trusting via `store`.
    pub fn new(cert_dir: impl Into<PathBuf>, store: Arc<dyn TrustStore>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            store,
            extra_sans: Vec::new(),
            leaf_validity: DEFAULT_LEAF_VALIDITY,
        }
    }

    /// Adds names (DNS or IP) the leaf should also be valid for.
    pub fn extra_sans(mut self, sans: Vec<String>) -> Self {
        self.extra_sans = sans;
        self
    }

    /// Sets the leaf validity period.
    pub fn leaf_validity(mut self, validity: Duration) -> Self {
        self.leaf_validity = validity;
        self
    }

    /// Returns the certificate directory.
    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    /// Returns the CA certificate path.
    pub fn ca_cert_path(&self) -> PathBuf {
        self.cert_dir.join(CA_CERT_FILE)
    }

    /// Returns the CA key path.
    pub fn ca_key_path(&self) -> PathBuf {
        self.cert_dir.join(CA_KEY_FILE)
    }

    /// Returns the `(certificate, key)` paths for a hostname.
    pub fn leaf_paths(&self, hostname: &str) -> (PathBuf, PathBuf) {
        let stem = hostname.replace('*', "_wildcard").replace(':', "_");
        (
            self.cert_dir.join(format!("{}.pem", stem)),
            self.cert_dir.join(format!("{}-key.pem", stem)),
        )
    }

    /// Provisions a trust bundle for `hostname`.
    ///
    /// Reuses a CA left by a previous run when it is still valid, installs it
    /// into the trust store unless the store already holds it, then issues a
    /// fresh leaf. Concurrent callers sharing a certificate directory are
    /// serialized by an exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TrustProvisioning`] for an invalid
    /// hostname, unwritable directories, trust-store failures, or a leaf that
    /// does not verify against the CA.
    pub async fn provision(&self, hostname: &str) -> Result<TrustBundle> {
        authority::validate_hostname(hostname)?;

        std::fs::create_dir_all(&self.cert_dir).map_err(|e| {
            OrchestratorError::trust(format!(
                "cannot create certificate directory {}: {}",
                self.cert_dir.display(),
                e
            ))
        })?;

        info!(cert_dir = %self.cert_dir.display(), "Acquiring CA lock");
        let lock = self.lock().await?;

        let result = self.provision_locked(hostname).await;

        if let Err((_, e)) = lock.unlock() {
            warn!(error = %e, "Failed to release CA lock");
        }

        let bundle = result?;
        info!(
            hostname = %bundle.subject_hostname,
            ca = %bundle.ca_certificate_path.display(),
            cert = %bundle.leaf_certificate_path.display(),
            "Trust bundle provisioned"
        );
        Ok(bundle)
    }

    async fn provision_locked(&self, hostname: &str) -> Result<TrustBundle> {
        let ca = self.ensure_ca()?;
        self.ensure_trusted(&ca).await?;

        let (leaf_pem, key_pem) = ca.issue_leaf(hostname, &self.extra_sans, self.leaf_validity)?;
        authority::verify_leaf(ca.cert_pem(), &leaf_pem, hostname)?;

        let (leaf_path, key_path) = self.leaf_paths(hostname);
        write_atomic(&leaf_path, leaf_pem.as_bytes(), 0o644)?;
        write_atomic(&key_path, key_pem.as_bytes(), 0o600)?;

        Ok(TrustBundle {
            ca_certificate_path: self.ca_cert_path(),
            leaf_certificate_path: leaf_path,
            leaf_key_path: key_path,
            subject_hostname: hostname.to_string(),
            ca_fingerprint: ca.fingerprint().to_string(),
        })
    }

    async fn lock(&self) -> Result<Flock<File>> {
        let lock_path = self.cert_dir.join(LOCK_FILE);
        let lock_fd = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&lock_path)
            .map_err(|e| {
                OrchestratorError::trust(format!(
                    "cannot open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        tokio::task::spawn_blocking(move || {
            Flock::lock(lock_fd, FlockArg::LockExclusive).map_err(|(_, err)| err)
        })
        .await
        .map_err(|e| OrchestratorError::trust(format!("lock task failed: {}", e)))?
        .map_err(|e| OrchestratorError::trust(format!("cannot acquire CA lock: {}", e)))
    }

    /// Loads the stored CA, or generates and stores a new one.
    fn ensure_ca(&self) -> Result<CertificateAuthority> {
        let cert_path = self.ca_cert_path();
        let key_path = self.ca_key_path();

        if cert_path.exists() && key_path.exists() {
            let loaded = std::fs::read_to_string(&cert_path)
                .and_then(|cert| Ok((cert, std::fs::read_to_string(&key_path)?)))
                .map_err(|e| OrchestratorError::trust(format!("cannot read stored CA: {}", e)))
                .and_then(|(cert, key)| CertificateAuthority::load(&cert, &key));

            match loaded {
                Ok(ca) => {
                    info!(fingerprint = %ca.fingerprint(), "Reusing existing CA");
                    return Ok(ca);
                }
                Err(e) => {
                    warn!(error = %e, "Stored CA unusable, generating a new one");
                }
            }
        }

        let ca = CertificateAuthority::generate()?;
        write_atomic(&key_path, ca.key_pem().as_bytes(), 0o600)?;
        write_atomic(&cert_path, ca.cert_pem().as_bytes(), 0o644)?;
        info!(fingerprint = %ca.fingerprint(), "Generated new CA");
        Ok(ca)
    }

    /// Installs the CA unless the marker and the store both already have it.
    async fn ensure_trusted(&self, ca: &CertificateAuthority) -> Result<()> {
        let marker_path = self.cert_dir.join(FINGERPRINT_FILE);
        let marker = std::fs::read_to_string(&marker_path).unwrap_or_default();

        if marker.trim() == ca.fingerprint() && self.store.contains(ca.fingerprint()).await? {
            debug!(store = %self.store.name(), "CA already trusted");
            return Ok(());
        }

        self.store.install(ca.cert_pem(), ca.fingerprint()).await?;
        write_atomic(&marker_path, ca.fingerprint().as_bytes(), 0o644)?;
        Ok(())
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    use std::io::Write;

    let tmp = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        OrchestratorError::trust(format!("cannot write {}: {}", path.display(), e))
    })
}
