//! Attack session types: configurations, lifecycle states, and the
//! status reports the engines publish.
//!
//! Lifecycle: `Pending -> Running`, then one of the absorbing terminal
//! states. `Paused` is terminal in practice — resume is unimplemented and
//! callers start a new attack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Mac;

/// Which engine owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Deauth,
    AuthFlood,
    Wps,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackState {
    Pending,
    Running,
    Paused,
    Stopped,
    Failed,
    /// WPS only: the child recovered a PIN.
    Success,
    /// WPS only: the deadline elapsed.
    Timeout,
}

impl AttackState {
    /// Terminal states absorb all further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttackState::Pending | AttackState::Running)
    }
}

/// Deauthentication targeting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeauthMode {
    /// Addr1 = broadcast, spray every client of the AP.
    #[default]
    Broadcast,
    /// Addr1 = one client.
    Unicast,
    /// AP->client and client->AP pairs per iteration.
    Targeted,
}

/// Deauthentication attack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeauthConfig {
    pub interface: String,
    /// The AP under attack.
    pub target_mac: Mac,
    /// Required for unicast and targeted modes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_mac: Option<Mac>,
    pub channel: u8,
    pub mode: DeauthMode,
    /// 0 means continuous until cancelled.
    pub packet_count: u32,
    pub interval_ms: u64,
    pub reason_code: u16,
    pub spoof_source: bool,
    pub use_jitter: bool,
    pub use_reason_fuzzing: bool,
}

impl Default for DeauthConfig {
    fn default() -> Self {
        DeauthConfig {
            interface: String::new(),
            target_mac: Mac::ZERO,
            client_mac: None,
            channel: 1,
            mode: DeauthMode::Broadcast,
            packet_count: 10,
            interval_ms: 100,
            reason_code: 7,
            spoof_source: false,
            use_jitter: true,
            use_reason_fuzzing: false,
        }
    }
}

/// Authentication-flood attack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthFloodConfig {
    pub interface: String,
    pub target_mac: Mac,
    pub channel: u8,
    /// 0 means flood until cancelled.
    pub packet_count: u64,
    pub packet_interval_ms: u64,
    pub use_random_mac: bool,
}

impl Default for AuthFloodConfig {
    fn default() -> Self {
        AuthFloodConfig {
            interface: String::new(),
            target_mac: Mac::ZERO,
            channel: 1,
            packet_count: 0,
            packet_interval_ms: 10,
            use_random_mac: true,
        }
    }
}

/// WPS Pixie-Dust driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WpsConfig {
    pub interface: String,
    pub bssid: Mac,
    pub channel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essid: Option<String>,
    pub timeout_secs: u64,
    /// Path of the Pixie-Dust binary to drive.
    pub binary: String,
}

impl Default for WpsConfig {
    fn default() -> Self {
        WpsConfig {
            interface: String::new(),
            bssid: Mac::ZERO,
            channel: 1,
            essid: None,
            timeout_secs: 300,
            binary: "reaver".to_string(),
        }
    }
}

/// Point-in-time status published on the event bus and returned by the
/// query port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackStatusReport {
    pub id: Uuid,
    pub kind: AttackKind,
    pub state: AttackState,
    pub packets_sent: u64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_psk: Option<String>,
}

impl AttackStatusReport {
    pub fn new(id: Uuid, kind: AttackKind) -> AttackStatusReport {
        AttackStatusReport {
            id,
            kind,
            state: AttackState::Pending,
            packets_sent: 0,
            start_time: Utc::now(),
            end_time: None,
            error_message: String::new(),
            recovered_pin: None,
            recovered_psk: None,
        }
    }
}
