//! Engine configuration with compiled-in defaults.
//!
//! Every runtime knob lives here so adapters can adjust behavior without
//! recompiling. All sections have `Default` impls with the engine's
//! canonical constants; the whole tree is serde-derived so the bin can
//! load a JSON file.

use serde::{Deserialize, Serialize};

/// 2.4 GHz channels commonly scanned.
pub const CHANNELS_24GHZ: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];

/// Non-DFS 5 GHz channels commonly scanned.
pub const CHANNELS_5GHZ: &[u8] = &[36, 40, 44, 48, 149, 153, 157, 161, 165];

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Monitor-mode interfaces to capture on.
    pub interfaces: Vec<String>,
    pub capture: CaptureConfig,
    pub hopper: HopperConfig,
    pub registry: RegistryConfig,
    pub handshake: HandshakeConfig,
    pub attack: AttackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Per-interface packet bus capacity. Full bus drops, never blocks.
    pub bus_capacity: usize,
    /// Observation / alert channel capacities into the registry pipeline.
    pub pipeline_capacity: usize,
    /// Optional raw mirror PCAP path prefix (one file per interface).
    pub mirror_pcap_dir: Option<String>,
    /// BPF applied to every capture handle.
    pub bpf_filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            bus_capacity: 5000,
            pipeline_capacity: 100,
            mirror_pcap_dir: None,
            bpf_filter: "type mgt or type data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HopperConfig {
    /// Dwell time per channel in milliseconds.
    pub dwell_ms: u64,
    /// Channels to cycle; empty means both default bands, partitioned
    /// across interfaces.
    pub channels: Vec<u8>,
    /// Hopper pause requested when an EAPOL frame is seen, in seconds.
    pub eapol_pause_secs: u64,
}

impl Default for HopperConfig {
    fn default() -> Self {
        HopperConfig {
            dwell_ms: 300,
            channels: Vec::new(),
            eapol_pause_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Device TTL in seconds; stale devices are swept out.
    pub device_ttl_secs: u64,
    /// Sweep cadence in seconds.
    pub sweep_interval_secs: u64,
    /// Connection-state staleness timeout in seconds.
    pub connection_timeout_secs: u64,
    /// Bounded alert history kept for the query port.
    pub alert_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            device_ttl_secs: 600,
            sweep_interval_secs: 60,
            connection_timeout_secs: 300,
            alert_history: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Directory receiving per-session handshake PCAPs.
    pub handshake_dir: String,
    /// Frames retained per session.
    pub max_frames: usize,
    /// Sessions idle longer than this are dropped, in seconds.
    pub session_ttl_secs: u64,
    /// Cleanup cadence in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            handshake_dir: "handshakes".to_string(),
            max_frames: 20,
            session_ttl_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Bound on simultaneously tracked sessions per engine.
    pub max_concurrent: usize,
    /// WPS attack deadline in seconds when the config omits one.
    pub wps_timeout_secs: u64,
    /// Finished WPS attacks are removed after this many seconds.
    pub wps_janitor_secs: u64,
}

impl Default for AttackConfig {
    fn default() -> Self {
        AttackConfig {
            max_concurrent: 5,
            wps_timeout_secs: 300,
            wps_janitor_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_constants() {
        let config = Config::default();
        assert_eq!(config.capture.bus_capacity, 5000);
        assert_eq!(config.capture.pipeline_capacity, 100);
        assert_eq!(config.capture.bpf_filter, "type mgt or type data");
        assert_eq!(config.hopper.dwell_ms, 300);
        assert_eq!(config.hopper.eapol_pause_secs, 5);
        assert_eq!(config.registry.device_ttl_secs, 600);
        assert_eq!(config.handshake.max_frames, 20);
        assert_eq!(config.handshake.session_ttl_secs, 300);
        assert_eq!(config.attack.max_concurrent, 5);
        assert_eq!(config.attack.wps_timeout_secs, 300);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"interfaces":["wlan0"],"hopper":{"dwell_ms":150}}"#).unwrap();
        assert_eq!(config.interfaces, vec!["wlan0"]);
        assert_eq!(config.hopper.dwell_ms, 150);
        assert_eq!(config.capture.bus_capacity, 5000);
    }
}
