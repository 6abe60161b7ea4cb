//! Domain model shared across the engine.
//!
//! Pure data types with serde derives — no I/O, no engine logic. The
//! authoritative mutation rules for [`Device`] live in the registry; the
//! attack lifecycle rules live in the inject engines.

mod alert;
mod attack;
mod device;
mod event;

pub use alert::{Alert, AlertRule, AlertType, RuleType, Severity};
pub use attack::{
    AttackKind, AttackState, AttackStatusReport, AuthFloodConfig, DeauthConfig, DeauthMode,
    WpsConfig,
};
pub use device::{
    Akm, BehavioralProfile, Cipher, ConnectionState, Device, DeviceKind, DeviceObservation, Mac,
    MacParseError, RsnInfo, Security, Standard, Vulnerability, WpsDetails, WpsState,
};
pub use event::EngineEvent;
