//! Events published on the engine's broadcast bus.
//!
//! Serialized as tagged JSON so external adapters (dashboard, control
//! plane) can consume them without knowing the Rust types.

use serde::{Deserialize, Serialize};

use super::{Alert, AttackStatusReport, Device};

/// One event on the subscribe port. Subscriptions are lossy: a slow
/// consumer sees a lag gap, never backpressure into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "device_update")]
    DeviceUpdate {
        device: Box<Device>,
        /// True on the first observation of this MAC.
        discovered: bool,
    },
    #[serde(rename = "alert")]
    Alert { alert: Alert },
    #[serde(rename = "attack_status")]
    AttackStatus { report: AttackStatusReport },
    /// A capture worker exited (fatal driver error or shutdown). The
    /// restart hook for callers that want one.
    #[serde(rename = "worker_exit")]
    WorkerExit { interface: String, error: String },
}
