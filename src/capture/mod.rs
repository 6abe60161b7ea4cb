//! Multi-interface capture pipeline: workers, channel hoppers, the
//! lock arbiter, and the fan-in manager.

pub mod hopper;
pub mod lock;
pub mod manager;
pub mod worker;

pub use hopper::{partition_channels, HopperHandle, HopperState, DEFAULT_DWELL_MS};
pub use lock::{LockArbiter, LockError};
pub use manager::CaptureManager;
pub use worker::{
    CaptureError, CapturedPacket, FrameSource, InterfaceMetrics, MetricsSnapshot, PcapMirror,
    PcapSource,
};
