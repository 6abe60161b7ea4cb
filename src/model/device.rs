//! The device model — access points, stations, and everything observed
//! about them over the air.
//!
//! A [`Device`] is created on the first frame attributable to a MAC and
//! mutated only by the registry's merge rules. The [`DeviceObservation`]
//! carries one frame's worth of extracted facts; fields left `None` (or
//! zero, for counters) are "not carried" and never clobber known state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 6-octet IEEE 802 MAC address.
///
/// Canonical text form is lowercase, colon-separated. Used directly as the
/// registry key; `Display` produces the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xFF; 6]);
    pub const ZERO: Mac = Mac([0x00; 6]);

    /// First three octets, identifying the vendor.
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Group bit (first octet bit 0). Broadcast is a special case of this.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Locally-administered bit (first octet bit 1) — set by randomizing
    /// clients and by our own spoofed source addresses.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// A random unicast, locally-administered address: first octet forced
    /// to `(b & 0xFE) | 0x02`.
    pub fn random_local() -> Mac {
        let mut octets: [u8; 6] = rand::random();
        octets[0] = (octets[0] & 0xFE) | 0x02;
        Mac(octets)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for Mac {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(|c| c == ':' || c == '-') {
            if count == 6 {
                return Err(MacParseError);
            }
            octets[count] = u8::from_str_radix(part, 16).map_err(|_| MacParseError)?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError);
        }
        Ok(Mac(octets))
    }
}

/// The input was not a 6-octet colon- or dash-separated hex address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacParseError;

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address")
    }
}

impl std::error::Error for MacParseError {}

impl Serialize for Mac {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| D::Error::custom("invalid MAC address"))
    }
}

/// Device role as inferred from frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Ap,
    Station,
    #[default]
    Unknown,
}

/// Security label derived from beacon/probe-response IEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "WPA")]
    Wpa,
    #[serde(rename = "WPA2")]
    Wpa2,
    #[serde(rename = "WPA2-PSK")]
    Wpa2Psk,
    #[serde(rename = "WPA2-Enterprise")]
    Wpa2Enterprise,
    #[serde(rename = "WPA3")]
    Wpa3,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::Open => "OPEN",
            Security::Wpa => "WPA",
            Security::Wpa2 => "WPA2",
            Security::Wpa2Psk => "WPA2-PSK",
            Security::Wpa2Enterprise => "WPA2-Enterprise",
            Security::Wpa3 => "WPA3",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PHY generation advertised in management-frame IEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Standard {
    #[serde(rename = "802.11g/a")]
    Dot11ga,
    #[serde(rename = "802.11n")]
    Dot11n,
    #[serde(rename = "802.11ac")]
    Dot11ac,
    #[serde(rename = "802.11ax")]
    Dot11ax,
    #[serde(rename = "802.11be")]
    Dot11be,
}

/// Cipher suite types from the RSN IE (suite type octet, OUI 00-0F-AC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Cipher {
    Wep40,
    Tkip,
    Ccmp,
    Wep104,
    Gcmp128,
    Gcmp256,
    Ccmp256,
    Unknown,
}

impl Cipher {
    pub fn from_suite_type(t: u8) -> Cipher {
        match t {
            1 => Cipher::Wep40,
            2 => Cipher::Tkip,
            4 => Cipher::Ccmp,
            5 => Cipher::Wep104,
            8 => Cipher::Gcmp128,
            9 => Cipher::Gcmp256,
            10 => Cipher::Ccmp256,
            _ => Cipher::Unknown,
        }
    }
}

/// Authentication and key management suites from the RSN IE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Akm {
    Dot1x,
    Psk,
    FtDot1x,
    FtPsk,
    Dot1xSha256,
    PskSha256,
    Sae,
    FtSae,
    Owe,
    Unknown,
}

impl Akm {
    pub fn from_suite_type(t: u8) -> Akm {
        match t {
            1 => Akm::Dot1x,
            2 => Akm::Psk,
            3 => Akm::FtDot1x,
            4 => Akm::FtPsk,
            5 => Akm::Dot1xSha256,
            6 => Akm::PskSha256,
            8 => Akm::Sae,
            9 => Akm::FtSae,
            18 => Akm::Owe,
            _ => Akm::Unknown,
        }
    }
}

/// Parsed RSN IE (tag 48).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsnInfo {
    pub version: u16,
    pub group_cipher: Cipher,
    pub pairwise_ciphers: Vec<Cipher>,
    pub akm_suites: Vec<Akm>,
    /// Raw RSN capability bitfield (trailing u16, if present).
    pub capabilities: u16,
    pub mfp_capable: bool,
    pub mfp_required: bool,
}

/// WPS configuration state (attribute 0x1044).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WpsState {
    Unconfigured,
    Configured,
    #[default]
    Unknown,
}

/// WPS attributes extracted from the vendor IE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WpsDetails {
    pub state: WpsState,
    /// "1.0" or "2.0" per attribute 0x104A.
    pub version: String,
    pub manufacturer: String,
    pub model: String,
    pub device_name: String,
    pub locked: bool,
    pub config_methods: Vec<String>,
}

/// Station connection FSM as observed passively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Authenticating,
    Associating,
    Handshake,
    Connected,
}

/// A vulnerability tag attached to a device by the detector pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub tag: String,
    pub severity: super::Severity,
}

/// Longitudinal behavior derived from a device's probe history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BehavioralProfile {
    /// EMA of inter-probe intervals in seconds (0.7 old / 0.3 new).
    pub probe_frequency: f64,
    pub unique_ssids: usize,
    /// Hours of day (0-23) in which any frame from this device was seen.
    pub active_hours: BTreeSet<u8>,
    /// Detector subtype -> contribution in [0, 1].
    pub anomaly_details: BTreeMap<String, f64>,
    /// Sorted, comma-joined probed SSIDs; stable across MAC rotation.
    pub ssid_signature: String,
    pub ie_tags: Vec<u8>,
    /// Correlated real MAC, when a randomized address was linked.
    pub linked_mac: Option<Mac>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<DateTime<Utc>>,
}

impl BehavioralProfile {
    /// Maximum over all detector contributions.
    pub fn anomaly_score(&self) -> f64 {
        self.anomaly_details.values().fold(0.0, |a, &b| a.max(b))
    }

    /// Fold a new inter-probe interval into the EMA.
    pub fn record_probe(&mut self, at: DateTime<Utc>) {
        if let Some(prev) = self.last_probe {
            let interval = (at - prev).num_milliseconds() as f64 / 1000.0;
            if interval >= 0.0 {
                if self.probe_frequency == 0.0 {
                    self.probe_frequency = interval;
                } else {
                    self.probe_frequency = self.probe_frequency * 0.7 + interval * 0.3;
                }
            }
        }
        self.last_probe = Some(at);
    }

    /// Recompute the SSID signature from the probed-SSID set.
    pub fn update_ssid_signature<'a, I: Iterator<Item = &'a str>>(&mut self, ssids: I) {
        let mut list: Vec<&str> = ssids.collect();
        list.sort_unstable();
        self.unique_ssids = list.len();
        self.ssid_signature = list.join(",");
    }
}

/// The central entity: everything known about one MAC address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub mac: Mac,
    pub vendor: String,
    pub is_randomized: bool,
    pub kind: DeviceKind,

    // Radio
    pub rssi: i32,
    pub frequency: u32,
    pub channel: u8,
    pub channel_width: u8,

    // Identity
    pub ssid: String,
    pub connected_ssid: String,
    pub model: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<Standard>,
    pub dot11k: bool,
    pub dot11r: bool,
    pub dot11v: bool,
    pub wifi6: bool,
    pub wifi7: bool,
    pub has_handshake: bool,

    // Security
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsn_info: Option<RsnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wps_details: Option<WpsDetails>,

    // Traffic
    pub packets: u64,
    pub retries: u64,
    pub data_tx: u64,
    pub data_rx: u64,
    /// Ordered IE tag ids exactly as seen on the wire. Never sorted —
    /// the fingerprint depends on wire order.
    pub ie_tags: Vec<u8>,
    /// Hex MD5 over the ordered IE tag list.
    pub signature: String,

    // Temporal
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_packet_time: DateTime<Utc>,

    /// SSID -> time last probed for it.
    pub probed_ssids: BTreeMap<String, DateTime<Utc>>,

    // Connection FSM
    pub connection_state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_target: Option<Mac>,
    pub connection_error: String,

    // Derived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavioral_profile: Option<BehavioralProfile>,
    pub vulnerabilities: Vec<Vulnerability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<(f64, f64)>,
}

impl Device {
    pub fn new(mac: Mac, now: DateTime<Utc>) -> Device {
        Device {
            mac,
            vendor: String::new(),
            is_randomized: mac.is_locally_administered(),
            kind: DeviceKind::Unknown,
            rssi: 0,
            frequency: 0,
            channel: 0,
            channel_width: 0,
            ssid: String::new(),
            connected_ssid: String::new(),
            model: String::new(),
            os: String::new(),
            standard: None,
            dot11k: false,
            dot11r: false,
            dot11v: false,
            wifi6: false,
            wifi7: false,
            has_handshake: false,
            security: None,
            rsn_info: None,
            wps_details: None,
            packets: 0,
            retries: 0,
            data_tx: 0,
            data_rx: 0,
            ie_tags: Vec::new(),
            signature: String::new(),
            first_seen: now,
            last_seen: now,
            last_packet_time: now,
            probed_ssids: BTreeMap::new(),
            connection_state: ConnectionState::Disconnected,
            connection_target: None,
            connection_error: String::new(),
            behavioral_profile: None,
            vulnerabilities: Vec::new(),
            location: None,
        }
    }
}

/// One frame's worth of extracted device facts, produced by the packet
/// handler and merged by the registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceObservation {
    pub mac: Mac,
    pub kind: DeviceKind,
    pub timestamp: DateTime<Utc>,

    pub rssi: Option<i32>,
    pub frequency: Option<u32>,
    pub channel: Option<u8>,
    pub channel_width: Option<u8>,

    pub ssid: Option<String>,
    pub connected_ssid: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub os: Option<String>,
    pub is_randomized: bool,

    pub standard: Option<Standard>,
    pub dot11k: bool,
    pub dot11r: bool,
    pub dot11v: bool,
    pub wifi6: bool,
    pub wifi7: bool,
    pub has_handshake: bool,

    pub security: Option<Security>,
    pub rsn_info: Option<RsnInfo>,
    pub wps_details: Option<WpsDetails>,

    /// Per-frame counter deltas.
    pub packets: u64,
    pub retries: u64,
    pub data_tx: u64,
    pub data_rx: u64,

    pub ie_tags: Vec<u8>,
    pub signature: Option<String>,

    pub probed_ssid: Option<String>,
    pub connection_state: Option<ConnectionState>,
    pub connection_target: Option<Mac>,

    pub location: Option<(f64, f64)>,
}

impl Default for Mac {
    fn default() -> Self {
        Mac::ZERO
    }
}
