/// Start-up, readiness and network switching for the light client
pub mod lifecycle;

pub use lifecycle::{NetworkSwitch, NodeLifecycleManager, Readiness};
