//! Container images and the service instance lifecycle.

mod lifecycle;
mod spec;

pub use lifecycle::{ServiceInstance, ServiceState, StateTransition};
pub use spec::{ContainerImage, ImagePullPolicy};
