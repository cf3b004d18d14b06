//! Certificate authority and trust-store management.

mod authority;
mod provisioner;
mod store;

pub(crate) use authority::validate_hostname;
pub use provisioner::{TrustBundle, TrustProvisioner, DEFAULT_LEAF_VALIDITY};
pub use store::{DirectoryTrustStore, NoopTrustStore, TrustStore, TrustStoreKind};
