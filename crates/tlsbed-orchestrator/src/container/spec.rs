//! Container image types.

use serde::{Deserialize, Serialize};

/// Container image specification.
///
/// Represents an image reference with optional registry, tag, and digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// Full image reference (registry/repository:tag@digest).
    reference: String,

    /// Image pull policy.
    pub pull_policy: ImagePullPolicy,
}

impl ContainerImage {
    /// Creates a new container image from a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use tlsbed_orchestrator::container::ContainerImage;
    ///
    /// let image = ContainerImage::new("mccutchen/go-httpbin:v2.15.0");
    /// assert_eq!(image.reference(), "mccutchen/go-httpbin:v2.15.0");
    /// assert_eq!(image.tag(), Some("v2.15.0"));
    /// ```
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pull_policy: ImagePullPolicy::default(),
        }
    }

    /// Creates an image with a specific pull policy.
    pub fn with_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Returns the full image reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the image tag if present.
    pub fn tag(&self) -> Option<&str> {
        let without_digest = self.reference.split('@').next()?;
        match without_digest.rsplit_once(':') {
            // A colon before the last slash belongs to a registry port.
            Some((_, tag)) if !tag.contains('/') => Some(tag),
            _ => None,
        }
    }

    /// Returns the image digest if present.
    pub fn digest(&self) -> Option<&str> {
        self.reference.split_once('@').map(|(_, digest)| digest)
    }

    /// Returns the reference to pull, defaulting the tag to `latest`.
    pub fn pull_reference(&self) -> String {
        if self.tag().is_some() || self.digest().is_some() {
            self.reference.clone()
        } else {
            format!("{}:latest", self.reference)
        }
    }
}

impl From<&str> for ContainerImage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerImage {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagePullPolicy {
    /// Always pull the image.
    Always,

    /// Pull if not present locally.
    #[default]
    IfNotPresent,

    /// Never pull (image must be present).
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_parsing() {
        let image = ContainerImage::new("ghcr.io/acme/echo:1.2@sha256:abc");
        assert_eq!(image.tag(), Some("1.2"));
        assert_eq!(image.digest(), Some("sha256:abc"));
        assert_eq!(image.pull_reference(), "ghcr.io/acme/echo:1.2@sha256:abc");
    }

    #[test]
    fn test_image_with_registry_port() {
        let image = ContainerImage::new("localhost:5000/echo");
        assert_eq!(image.tag(), None);
        assert_eq!(image.pull_reference(), "localhost:5000/echo:latest");
    }

    #[test]
    fn test_docker_hub_image() {
        let image = ContainerImage::new("mccutchen/go-httpbin");
        assert_eq!(image.tag(), None);
        assert_eq!(image.pull_reference(), "mccutchen/go-httpbin:latest");
    }

    #[test]
    fn test_pull_policy_serde() {
        let policy: ImagePullPolicy = serde_json::from_str("\"if-not-present\"").unwrap();
        assert_eq!(policy, ImagePullPolicy::IfNotPresent);
        assert_eq!(
            serde_json::to_string(&ImagePullPolicy::Always).unwrap(),
            "\"always\""
        );
    }
}
