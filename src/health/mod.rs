//! Health engine: capability probing, score transitions and periodic revalidation

pub mod probe;
pub mod scheduler;
pub mod transition;

pub use probe::{CapabilityProbe, EchoProbe, ProbeResult};
pub use scheduler::{Revalidator, RevalidatorConfig, RevalidatorHandle, SweepReport};
pub use transition::{admit, transition, Outcome};
