//! Frame classification: one captured packet in, at most one device
//! observation and some alerts out.
//!
//! The handler is a pure function over its context — it never touches
//! the registry and owns no state. Hopper pauses are requested through
//! a plain callback wired at construction, which keeps the capture
//! side free of a reference cycle back into the pipeline.

use std::time::Duration;

use crate::capture::CapturedPacket;
use crate::codec::{self, dot11, eapol, ie, radiotap, FrameType, KeyMessage};
use crate::handshake::HandshakeTracker;
use crate::model::{
    Alert, AlertType, ConnectionState, DeviceKind, DeviceObservation, Mac, Security, Severity,
    Standard,
};
use crate::ports::{LocationProvider, OuiResolver};

/// Everything the handler needs, wired once at pipeline construction.
pub struct HandlerContext<'a> {
    pub tracker: &'a HandshakeTracker,
    pub oui: &'a dyn OuiResolver,
    pub location: &'a dyn LocationProvider,
    /// Pause-all-hoppers capability.
    pub pause: &'a (dyn Fn(Duration) + Sync),
    /// Pause requested on EAPOL sightings and handshake saves.
    pub eapol_pause: Duration,
}

/// Result of classifying one frame.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    pub observation: Option<DeviceObservation>,
    pub alerts: Vec<Alert>,
}

/// Classify one captured packet. Must never panic on arbitrary bytes —
/// anything unparseable is silently discarded.
pub fn handle_packet(packet: &CapturedPacket, ctx: &HandlerContext) -> HandlerOutput {
    let Some(frame) = codec::parse_frame(&packet.data) else {
        return HandlerOutput::default();
    };

    // EAPOL first: pause hopping to catch the rest of the exchange.
    if let Some(key) = frame.eapol_key() {
        (ctx.pause)(ctx.eapol_pause);
        return handle_eapol(packet, &frame, key, ctx);
    }

    match frame.dot11.ftype {
        FrameType::Mgmt => handle_mgmt(packet, &frame, ctx),
        FrameType::Data => handle_data(packet, &frame, ctx),
        _ => HandlerOutput::default(),
    }
}

fn base_observation(mac: Mac, packet: &CapturedPacket, frame: &codec::Frame<'_>) -> DeviceObservation {
    DeviceObservation {
        mac,
        timestamp: packet.timestamp,
        rssi: frame.radiotap.dbm_antenna_signal.map(|s| s as i32),
        frequency: frame.radiotap.channel_frequency.map(|f| f as u32),
        channel: frame
            .radiotap
            .channel_frequency
            .and_then(|f| radiotap::channel_from_frequency(f as u32)),
        packets: 1,
        retries: frame.dot11.retry as u64,
        is_randomized: mac.is_locally_administered(),
        ..DeviceObservation::default()
    }
}

fn finish_observation(mut obs: DeviceObservation, ctx: &HandlerContext) -> DeviceObservation {
    obs.vendor = Some(if obs.is_randomized {
        "Randomized".to_string()
    } else {
        ctx.oui.lookup(&obs.mac)
    });
    obs.location = ctx.location.get_location();
    obs
}

fn apply_ies(obs: &mut DeviceObservation, summary: &ie::IeSummary) {
    if let Some(channel) = summary.channel {
        obs.channel = Some(channel);
    }
    obs.channel_width = summary.channel_width;
    obs.standard = summary.standard;
    obs.dot11k = summary.dot11k;
    obs.dot11r = summary.dot11r;
    obs.dot11v = summary.dot11v;
    obs.wifi6 = summary.wifi6;
    obs.wifi7 = summary.wifi7;
    obs.rsn_info = summary.rsn.clone();
    obs.security = summary.security;
    obs.wps_details = summary.wps.clone();
    if !summary.tags.is_empty() {
        obs.signature = Some(ie::signature(&summary.tags));
        obs.ie_tags = summary.tags.clone();
    }
    // Vendor IEs are a coarse OS hint; Apple first since its OUI is
    // unambiguous while Microsoft's doubles as the WPS/WPA OUI.
    if summary.apple_vendor {
        obs.os = Some("Apple".to_string());
    } else if summary.microsoft_vendor {
        obs.os = Some("Windows".to_string());
    }
}

fn handle_eapol(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    key: &[u8],
    ctx: &HandlerContext,
) -> HandlerOutput {
    let Some(bssid) = frame.dot11.bssid() else {
        return HandlerOutput::default();
    };
    let Some(message) = eapol::classify(key) else {
        return HandlerOutput::default();
    };
    // The station is the non-BSSID side of the exchange.
    let station = match (frame.dot11.addr1, frame.dot11.addr2) {
        (addr1, _) if addr1 != bssid => addr1,
        (_, Some(addr2)) if addr2 != bssid => addr2,
        _ => return HandlerOutput::default(),
    };

    let saved = ctx
        .tracker
        .process_eapol(bssid, station, message, &packet.data, packet.timestamp);
    if saved.is_some() {
        // Richer capture just landed on disk; linger a little longer.
        (ctx.pause)(ctx.eapol_pause);
        let mut alert = Alert::anomaly(
            "HANDSHAKE_CAPTURED",
            Severity::Info,
            station,
            format!("WPA handshake for {bssid} captured"),
        );
        alert.target_mac = Some(bssid);
        alert.details = "WPA_HANDSHAKE".to_string();
        alert.timestamp = packet.timestamp;
        return HandlerOutput {
            observation: None,
            alerts: vec![alert],
        };
    }

    // Mid-exchange: surface the station's FSM progress.
    let mut obs = base_observation(station, packet, frame);
    obs.kind = DeviceKind::Station;
    obs.connection_state = Some(if message == KeyMessage::M4 {
        ConnectionState::Connected
    } else {
        ConnectionState::Handshake
    });
    obs.connection_target = Some(bssid);
    HandlerOutput {
        observation: Some(finish_observation(obs, ctx)),
        alerts: Vec::new(),
    }
}

fn handle_mgmt(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    ctx: &HandlerContext,
) -> HandlerOutput {
    match frame.dot11.subtype {
        dot11::SUBTYPE_DEAUTH | dot11::SUBTYPE_DISASSOC => deauth_alert(packet, frame),
        dot11::SUBTYPE_BEACON | dot11::SUBTYPE_PROBE_RESP => ap_observation(packet, frame, ctx),
        dot11::SUBTYPE_PROBE_REQ => probe_observation(packet, frame, ctx),
        dot11::SUBTYPE_AUTH => {
            connection_observation(packet, frame, ctx, ConnectionState::Authenticating)
        }
        dot11::SUBTYPE_ASSOC_REQ => {
            connection_observation(packet, frame, ctx, ConnectionState::Associating)
        }
        _ => HandlerOutput::default(),
    }
}

fn deauth_alert(packet: &CapturedPacket, frame: &codec::Frame<'_>) -> HandlerOutput {
    let source = frame.dot11.addr2.unwrap_or(Mac::ZERO);
    let broadcast = frame.dot11.addr1.is_broadcast();
    let (subtype, severity) = if broadcast {
        ("BROADCAST_DEAUTH", Severity::High)
    } else {
        ("DEAUTH_DETECTED", Severity::Medium)
    };
    let alert = Alert {
        alert_type: AlertType::Anomaly,
        subtype: subtype.to_string(),
        severity,
        device_mac: source,
        target_mac: Some(frame.dot11.addr1),
        message: format!(
            "{} frame from {source} to {}",
            if frame.dot11.subtype == dot11::SUBTYPE_DEAUTH {
                "deauthentication"
            } else {
                "disassociation"
            },
            frame.dot11.addr1
        ),
        details: String::new(),
        timestamp: packet.timestamp,
        rule_id: None,
    };
    HandlerOutput {
        observation: None,
        alerts: vec![alert],
    }
}

fn ap_observation(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    ctx: &HandlerContext,
) -> HandlerOutput {
    let Some(bssid) = frame.dot11.bssid() else {
        return HandlerOutput::default();
    };
    let Some(summary) = frame.ies() else {
        return HandlerOutput::default();
    };

    let mut obs = base_observation(bssid, packet, frame);
    obs.kind = DeviceKind::Ap;
    apply_ies(&mut obs, &summary);
    obs.ssid = summary.ssid.clone();
    // An AP advertising no security IEs at all is open.
    if obs.security.is_none() {
        obs.security = Some(Security::Open);
    }
    if obs.standard.is_none() {
        obs.standard = Some(Standard::Dot11ga);
    }
    obs.has_handshake = ctx.tracker.has_handshake(&bssid);

    if let Some(ssid) = &summary.ssid {
        if ssid != codec::HIDDEN_SSID {
            ctx.tracker.note_beacon(bssid, ssid);
        }
    }

    HandlerOutput {
        observation: Some(finish_observation(obs, ctx)),
        alerts: Vec::new(),
    }
}

fn probe_observation(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    ctx: &HandlerContext,
) -> HandlerOutput {
    let Some(station) = frame.dot11.addr2 else {
        return HandlerOutput::default();
    };
    let summary = frame.ies().unwrap_or_default();

    let mut obs = base_observation(station, packet, frame);
    obs.kind = DeviceKind::Station;
    apply_ies(&mut obs, &summary);
    obs.security = None; // a probing station advertises no security
    match summary.ssid {
        Some(ssid) if !ssid.is_empty() && ssid != codec::HIDDEN_SSID => {
            obs.probed_ssid = Some(ssid);
        }
        _ => {}
    }

    HandlerOutput {
        observation: Some(finish_observation(obs, ctx)),
        alerts: Vec::new(),
    }
}

fn connection_observation(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    ctx: &HandlerContext,
    state: ConnectionState,
) -> HandlerOutput {
    let Some(bssid) = frame.dot11.bssid() else {
        return HandlerOutput::default();
    };
    let station = if frame.dot11.addr2 == Some(bssid) {
        frame.dot11.addr1
    } else {
        match frame.dot11.addr2 {
            Some(addr2) => addr2,
            None => return HandlerOutput::default(),
        }
    };
    if station.is_multicast() {
        return HandlerOutput::default();
    }

    let mut obs = base_observation(station, packet, frame);
    obs.kind = DeviceKind::Station;
    if let Some(summary) = frame.ies() {
        apply_ies(&mut obs, &summary);
        obs.security = None;
    }
    obs.connection_state = Some(state);
    obs.connection_target = Some(bssid);
    HandlerOutput {
        observation: Some(finish_observation(obs, ctx)),
        alerts: Vec::new(),
    }
}

fn handle_data(
    packet: &CapturedPacket,
    frame: &codec::Frame<'_>,
    ctx: &HandlerContext,
) -> HandlerOutput {
    let payload_len = frame.body.len() as u64;
    let (station, bssid, destination, is_upload) = match (frame.dot11.to_ds, frame.dot11.from_ds) {
        // Upload: station (Addr2) -> AP (Addr1); Addr1 is the receiver.
        (true, false) => {
            let Some(station) = frame.dot11.addr2 else {
                return HandlerOutput::default();
            };
            (station, frame.dot11.addr1, frame.dot11.addr1, true)
        }
        // Download: AP (Addr2) -> station (Addr1); Addr1 is the receiver.
        (false, true) => {
            let station = frame.dot11.addr1;
            let Some(bssid) = frame.dot11.addr2 else {
                return HandlerOutput::default();
            };
            (station, bssid, station, false)
        }
        _ => return HandlerOutput::default(),
    };
    // Multicast-destined traffic never attributes to a station.
    if destination.is_multicast() {
        return HandlerOutput::default();
    }

    let mut obs = base_observation(station, packet, frame);
    obs.kind = DeviceKind::Station;
    if is_upload {
        obs.data_tx = payload_len;
    } else {
        obs.data_rx = payload_len;
    }
    obs.connected_ssid = ctx.tracker.essid_of(&bssid);
    obs.connection_state = Some(ConnectionState::Connected);
    obs.connection_target = Some(bssid);

    HandlerOutput {
        observation: Some(finish_observation(obs, ctx)),
        alerts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testutil;
    use crate::ports::{FixedLocationProvider, StaticOuiResolver};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const AP: Mac = Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    const STATION: Mac = Mac([0x00, 0x22, 0x33, 0x44, 0x55, 0x66]);

    struct Harness {
        tracker: HandshakeTracker,
        pauses: Arc<AtomicU64>,
    }

    impl Harness {
        fn new(label: &str) -> Harness {
            let dir = std::env::temp_dir().join(format!("aw-handler-{label}-{}", std::process::id()));
            std::fs::remove_dir_all(&dir).ok();
            Harness {
                tracker: HandshakeTracker::new(dir, 20),
                pauses: Arc::new(AtomicU64::new(0)),
            }
        }

        fn handle(&self, data: Vec<u8>) -> HandlerOutput {
            let pauses = self.pauses.clone();
            let pause = move |_: Duration| {
                pauses.fetch_add(1, Ordering::SeqCst);
            };
            let ctx = HandlerContext {
                tracker: &self.tracker,
                oui: &StaticOuiResolver,
                location: &FixedLocationProvider(Some((52.0, 13.0))),
                pause: &pause,
                eapol_pause: Duration::from_secs(5),
            };
            let packet = CapturedPacket {
                interface: Arc::from("wlan0"),
                data,
                timestamp: Utc::now(),
            };
            handle_packet(&packet, &ctx)
        }
    }

    // ── E1: probe request pipeline ──────────────────────────────────

    #[test]
    fn probe_request_yields_station_with_probed_ssid() {
        let harness = Harness::new("probe");
        let ies = crate::codec::ie::build_ie(0, b"HomeWiFi");
        let output = harness.handle(testutil::probe_req(STATION, &ies));

        assert!(output.alerts.is_empty());
        let obs = output.observation.unwrap();
        assert_eq!(obs.mac, STATION);
        assert_eq!(obs.kind, DeviceKind::Station);
        assert_eq!(obs.probed_ssid.as_deref(), Some("HomeWiFi"));
        assert_eq!(obs.location, Some((52.0, 13.0)));
    }

    #[test]
    fn wildcard_probe_records_no_ssid() {
        let harness = Harness::new("wildcard");
        let ies = crate::codec::ie::build_ie(0, &[]);
        let output = harness.handle(testutil::probe_req(STATION, &ies));
        let obs = output.observation.unwrap();
        assert_eq!(obs.probed_ssid, None);
    }

    // ── E2: hidden beacon ───────────────────────────────────────────

    #[test]
    fn hidden_beacon_yields_hidden_ap() {
        let harness = Harness::new("hidden");
        let ies = crate::codec::ie::build_ie(0, &[]);
        let output = harness.handle(testutil::beacon(AP, &ies));
        let obs = output.observation.unwrap();
        assert_eq!(obs.kind, DeviceKind::Ap);
        assert_eq!(obs.ssid.as_deref(), Some(codec::HIDDEN_SSID));
        // Hidden SSIDs must not enter the essid map.
        assert_eq!(harness.tracker.essid_of(&AP), None);
    }

    #[test]
    fn open_beacon_labelled_open_and_essid_noted() {
        let harness = Harness::new("open");
        let mut ies = crate::codec::ie::build_ie(0, b"CafeNet");
        ies.extend(crate::codec::ie::build_ie(3, &[6]));
        let output = harness.handle(testutil::beacon(AP, &ies));
        let obs = output.observation.unwrap();
        assert_eq!(obs.security, Some(Security::Open));
        assert_eq!(obs.channel, Some(6));
        assert_eq!(obs.standard, Some(Standard::Dot11ga));
        assert_eq!(harness.tracker.essid_of(&AP).as_deref(), Some("CafeNet"));
    }

    #[test]
    fn rsn_beacon_carries_security_and_signature() {
        let harness = Harness::new("rsn");
        let mut ies = crate::codec::ie::build_ie(0, b"Corp");
        ies.extend(crate::codec::ie::build_ie(
            48,
            &crate::codec::rsn::build_ie_body(4, &[4], &[2], Some(0)),
        ));
        let output = harness.handle(testutil::beacon(AP, &ies));
        let obs = output.observation.unwrap();
        assert_eq!(obs.security, Some(Security::Wpa2));
        assert_eq!(obs.ie_tags, vec![0, 48]);
        assert_eq!(obs.signature.unwrap().len(), 32);
    }

    // ── deauth alerts ───────────────────────────────────────────────

    #[test]
    fn broadcast_deauth_raises_high_alert() {
        let harness = Harness::new("bdeauth");
        let data = crate::codec::synth::deauth(Mac::BROADCAST, AP, AP, 1, 7);
        let output = harness.handle(data);
        assert!(output.observation.is_none());
        let alert = &output.alerts[0];
        assert_eq!(alert.subtype, "BROADCAST_DEAUTH");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.device_mac, AP);
    }

    #[test]
    fn unicast_deauth_raises_medium_alert() {
        let harness = Harness::new("udeauth");
        let data = crate::codec::synth::deauth(STATION, AP, AP, 1, 7);
        let output = harness.handle(data);
        let alert = &output.alerts[0];
        assert_eq!(alert.subtype, "DEAUTH_DETECTED");
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.target_mac, Some(STATION));
    }

    // ── EAPOL path ──────────────────────────────────────────────────

    fn eapol_frame(key_info: u16, key_data_len: u16, from_ap: bool) -> Vec<u8> {
        let body = crate::codec::eapol::build_data_body(key_info, key_data_len);
        if from_ap {
            testutil::data_frame(false, true, STATION, AP, AP, &body)
        } else {
            testutil::data_frame(true, false, AP, STATION, AP, &body)
        }
    }

    #[test]
    fn eapol_requests_pause_and_tracks_station() {
        let harness = Harness::new("eapol");
        let output = harness.handle(eapol_frame(0x0088, 0, true)); // M1
        assert_eq!(harness.pauses.load(Ordering::SeqCst), 1);
        let obs = output.observation.unwrap();
        assert_eq!(obs.mac, STATION);
        assert_eq!(obs.connection_state, Some(ConnectionState::Handshake));
        assert_eq!(obs.connection_target, Some(AP));
    }

    #[test]
    fn handshake_save_pauses_again_and_alerts() {
        let harness = Harness::new("hssave");
        harness.handle(eapol_frame(0x0088, 0, true)); // M1
        let output = harness.handle(eapol_frame(0x0108, 22, false)); // M2 -> save
        assert_eq!(harness.pauses.load(Ordering::SeqCst), 3, "2 eapol + 1 save");
        assert!(output.observation.is_none());
        let alert = &output.alerts[0];
        assert_eq!(alert.subtype, "HANDSHAKE_CAPTURED");
        assert_eq!(alert.device_mac, STATION);
        assert_eq!(alert.target_mac, Some(AP));
    }

    // ── data frames ─────────────────────────────────────────────────

    #[test]
    fn upload_data_attributes_station_tx() {
        let harness = Harness::new("upload");
        harness.handle(testutil::beacon(
            AP,
            &crate::codec::ie::build_ie(0, b"CafeNet"),
        ));
        let output = harness.handle(testutil::data_frame(true, false, AP, STATION, AP, &[0u8; 40]));
        let obs = output.observation.unwrap();
        assert_eq!(obs.mac, STATION);
        assert_eq!(obs.data_tx, 40);
        assert_eq!(obs.data_rx, 0);
        assert_eq!(obs.connected_ssid.as_deref(), Some("CafeNet"));
        assert_eq!(obs.connection_state, Some(ConnectionState::Connected));
    }

    #[test]
    fn download_data_attributes_station_rx() {
        let harness = Harness::new("download");
        let output = harness.handle(testutil::data_frame(false, true, STATION, AP, AP, &[0u8; 64]));
        let obs = output.observation.unwrap();
        assert_eq!(obs.mac, STATION);
        assert_eq!(obs.data_rx, 64);
        assert_eq!(obs.data_tx, 0);
    }

    #[test]
    fn multicast_destination_dropped_on_download() {
        let harness = Harness::new("mcast-down");
        let multicast = Mac([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
        let output = harness.handle(testutil::data_frame(false, true, multicast, AP, AP, &[0u8; 8]));
        assert!(output.observation.is_none());
    }

    #[test]
    fn multicast_destination_dropped_on_upload() {
        let harness = Harness::new("mcast-up");
        let multicast = Mac([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
        // Addr1 (the receiver) is the group address; Addr2 is a real
        // station that must not collect data_tx from it.
        let output = harness.handle(testutil::data_frame(
            true,
            false,
            multicast,
            STATION,
            multicast,
            &[0u8; 8],
        ));
        assert!(output.observation.is_none());
    }

    // ── randomization & vendor ──────────────────────────────────────

    #[test]
    fn randomized_mac_labelled_randomized() {
        let harness = Harness::new("rand");
        let random = Mac([0x02, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let output = harness.handle(testutil::probe_req(random, &[]));
        let obs = output.observation.unwrap();
        assert!(obs.is_randomized);
        assert_eq!(obs.vendor.as_deref(), Some("Randomized"));
    }

    #[test]
    fn burned_in_mac_resolves_vendor() {
        let harness = Harness::new("vendor");
        let apple = Mac([0x00, 0x17, 0xF2, 0x01, 0x02, 0x03]);
        let output = harness.handle(testutil::probe_req(apple, &[]));
        assert_eq!(output.observation.unwrap().vendor.as_deref(), Some("Apple"));
    }

    #[test]
    fn apple_vendor_ie_hints_os() {
        let harness = Harness::new("os");
        let ies = crate::codec::ie::build_ie(221, &[0x00, 0x17, 0xF2, 0x0A, 0x00]);
        let output = harness.handle(testutil::probe_req(STATION, &ies));
        assert_eq!(output.observation.unwrap().os.as_deref(), Some("Apple"));
    }

    // ── robustness ──────────────────────────────────────────────────

    #[test]
    fn garbage_bytes_yield_nothing() {
        let harness = Harness::new("garbage");
        for data in [vec![], vec![0xFF; 3], vec![0x00; 200]] {
            let output = harness.handle(data);
            assert!(output.observation.is_none());
            assert!(output.alerts.is_empty());
        }
    }
}
