//! Local certificate authority and leaf issuance.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::time::Duration;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use crate::error::{OrchestratorError, Result};

const CA_COMMON_NAME: &str = "tlsbed local development CA";
const ORGANIZATION: &str = "tlsbed";
const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Names every leaf is valid for, in addition to the subject hostname.
const LOOPBACK_NAMES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// A CA able to sign leaf certificates.
pub(crate) struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    cert_pem: String,
    key_pem: String,
    fingerprint: String,
}

impl CertificateAuthority {
    /// Generates a fresh self-signed CA.
    pub(crate) fn generate() -> Result<Self> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params
            .distinguished_name
            .push(DnType::CommonName, CA_COMMON_NAME);
        params
            .distinguished_name
            .push(DnType::OrganizationName, ORGANIZATION);
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + CA_VALIDITY;

        let cert = params.self_signed(&key)?;
        let cert_pem = cert.pem();
        let key_pem = key.serialize_pem();
        let fingerprint = fingerprint_pem(&cert_pem)?;

        Ok(Self {
            cert,
            key,
            cert_pem,
            key_pem,
            fingerprint,
        })
    }

    /// Loads a CA written by a previous run.
    ///
    /// Fails if the certificate is not a CA, has expired, or does not belong
    /// to the key.
    pub(crate) fn load(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)?;

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| OrchestratorError::trust(format!("failed to parse CA PEM: {:?}", e)))?;
        let parsed = pem
            .parse_x509()
            .map_err(|e| OrchestratorError::trust(format!("failed to parse CA X509: {:?}", e)))?;

        if !parsed.is_ca() {
            return Err(OrchestratorError::trust("stored certificate is not a CA"));
        }
        if !parsed.validity().is_valid() {
            return Err(OrchestratorError::trust("stored CA certificate has expired"));
        }
        if parsed.public_key().raw != key.public_key_der().as_slice() {
            return Err(OrchestratorError::trust(
                "stored CA certificate does not match its key",
            ));
        }

        // Re-derive a signing certificate with the stored subject and key so
        // issued leaves chain to the certificate on disk.
        let cert = CertificateParams::from_ca_cert_pem(cert_pem)?.self_signed(&key)?;

        Ok(Self {
            cert,
            key,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            fingerprint: fingerprint_pem(cert_pem)?,
        })
    }

    pub(crate) fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub(crate) fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// SHA-256 fingerprint of the CA certificate, lowercase hex.
    pub(crate) fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Issues a server certificate for `hostname`, returning `(cert_pem, key_pem)`.
    pub(crate) fn issue_leaf(
        &self,
        hostname: &str,
        extra_sans: &[String],
        validity: Duration,
    ) -> Result<(String, String)> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, hostname);
        params
            .distinguished_name
            .push(DnType::OrganizationName, ORGANIZATION);
        params.subject_alt_names = subject_alt_names(hostname, extra_sans)?;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::hours(1);
        params.not_after = now + validity;

        let cert = params.signed_by(&key, &self.cert, &self.key)?;
        Ok((cert.pem(), key.serialize_pem()))
    }
}

/// Builds the SAN list: hostname first, then loopback names, then extras.
fn subject_alt_names(hostname: &str, extra_sans: &[String]) -> Result<Vec<SanType>> {
    let mut names: Vec<&str> = vec![hostname];
    names.extend(LOOPBACK_NAMES);
    names.extend(extra_sans.iter().map(String::as_str));

    let mut seen = std::collections::HashSet::new();
    let mut sans = Vec::new();
    for name in names {
        if !seen.insert(name.to_ascii_lowercase()) {
            continue;
        }
        let san = match name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => {
                validate_hostname(name)?;
                SanType::DnsName(name.to_string().try_into()?)
            }
        };
        sans.push(san);
    }
    Ok(sans)
}

/// Checks that `name` is an IP literal or a syntactically valid DNS name.
///
/// A single leading `*.` wildcard label is accepted.
pub(crate) fn validate_hostname(name: &str) -> Result<()> {
    let invalid = |why: &str| OrchestratorError::trust(format!("invalid hostname {:?}: {}", name, why));

    if name.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }

    let body = name.strip_prefix("*.").unwrap_or(name);
    let body = body.strip_suffix('.').unwrap_or(body);
    if body.is_empty() {
        return Err(invalid("no labels"));
    }

    for label in body.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("label must be 1 to 63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label starts or ends with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("label contains characters other than letters, digits and '-'"));
        }
    }
    Ok(())
}

/// SHA-256 over the DER of the first certificate in `pem`.
pub(crate) fn fingerprint_pem(pem: &str) -> Result<String> {
    let (_, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| OrchestratorError::trust(format!("failed to parse PEM: {:?}", e)))?;
    Ok(hex::encode(Sha256::digest(&parsed.contents)))
}

/// Checks that `leaf_pem` is signed by `ca_pem` and valid for `hostname`.
pub(crate) fn verify_leaf(ca_pem: &str, leaf_pem: &str, hostname: &str) -> Result<()> {
    let (_, ca_raw) = parse_x509_pem(ca_pem.as_bytes())
        .map_err(|e| OrchestratorError::trust(format!("failed to parse CA PEM: {:?}", e)))?;
    let ca = ca_raw
        .parse_x509()
        .map_err(|e| OrchestratorError::trust(format!("failed to parse CA X509: {:?}", e)))?;

    let (_, leaf_raw) = parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|e| OrchestratorError::trust(format!("failed to parse leaf PEM: {:?}", e)))?;
    let leaf = leaf_raw
        .parse_x509()
        .map_err(|e| OrchestratorError::trust(format!("failed to parse leaf X509: {:?}", e)))?;

    if leaf.issuer().as_raw() != ca.subject().as_raw() {
        return Err(OrchestratorError::trust("leaf issuer does not match CA subject"));
    }
    leaf.verify_signature(Some(ca.public_key()))
        .map_err(|e| OrchestratorError::trust(format!("leaf signature does not verify against CA: {}", e)))?;
    if !leaf.validity().is_valid() {
        return Err(OrchestratorError::trust("leaf certificate is not currently valid"));
    }

    let san = leaf
        .subject_alternative_name()
        .map_err(|e| OrchestratorError::trust(format!("failed to read leaf SANs: {}", e)))?
        .ok_or_else(|| OrchestratorError::trust("leaf certificate has no SAN extension"))?;

    let wanted_ip = hostname.parse::<IpAddr>().ok();
    let covered = san.value.general_names.iter().any(|name| match (name, wanted_ip) {
        (GeneralName::DNSName(dns), None) => dns.eq_ignore_ascii_case(hostname),
        (GeneralName::IPAddress(bytes), Some(ip)) => match ip {
            IpAddr::V4(v4) => *bytes == v4.octets().as_slice(),
            IpAddr::V6(v6) => *bytes == v6.octets().as_slice(),
        },
        _ => false,
    });

    if !covered {
        return Err(OrchestratorError::trust(format!(
            "leaf certificate is not valid for {}",
            hostname
        )));
    }
    Ok(())
}
