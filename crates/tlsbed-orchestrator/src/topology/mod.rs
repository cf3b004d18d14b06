//! Network topology for the service container.
//!
//! The service is either attached to the host network or published through
//! a port mapping; [`TopologyResolver`] picks one from configuration before
//! launch.

mod network;
mod resolver;

pub use network::{NetworkMode, NetworkPlan, PortMapping};
pub use resolver::TopologyResolver;
