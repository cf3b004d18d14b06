//! Readiness probing of launched services.

mod clock;
mod probe;
mod prober;

pub use clock::{Clock, ManualClock, SystemClock};
pub use probe::{HealthProbe, HttpsProbe, ProbeError, ProbeTarget, DEFAULT_PROBE_PATH};
pub use prober::{Diagnostics, ProberConfig, ReadinessProber, ReadinessResult};
