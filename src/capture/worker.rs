//! One capture worker per monitor-mode interface.
//!
//! The worker owns a blocking capture handle on a dedicated OS thread
//! and pushes frames onto the shared bounded bus. A full bus drops the
//! frame and counts it — the kernel read is never blocked. Driver
//! statistics are snapshotted into the per-interface metrics at 1 Hz.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture driver error: {0}")]
    Driver(String),
    #[error("pcap write error: {0}")]
    PcapWrite(String),
}

/// A raw frame off the air, still Radiotap-framed.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub interface: Arc<str>,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Cumulative driver statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    pub received: u32,
    pub dropped: u32,
    pub if_dropped: u32,
}

/// Per-interface counters, shared with the query port.
#[derive(Debug, Default)]
pub struct InterfaceMetrics {
    pub packets_received: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub packets_if_dropped: AtomicU64,
    /// Frames lost to a full bus — our loss, not the driver's.
    pub app_packets_dropped: AtomicU64,
}

/// Plain-data copy of [`InterfaceMetrics`] for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_if_dropped: u64,
    pub app_packets_dropped: u64,
}

impl InterfaceMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_if_dropped: self.packets_if_dropped.load(Ordering::Relaxed),
            app_packets_dropped: self.app_packets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The blocking frame feed a worker drains. `Ok(None)` is a read
/// timeout tick; an `Err` is fatal for the worker.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<(Vec<u8>, DateTime<Utc>)>, CaptureError>;
    fn stats(&mut self) -> Option<DriverStats>;
}

/// Live pcap capture in monitor mode with the management/data BPF.
pub struct PcapSource {
    capture: pcap::Capture<pcap::Active>,
}

impl PcapSource {
    pub fn open(iface: &str, bpf: &str) -> Result<PcapSource, CaptureError> {
        let mut capture = pcap::Capture::from_device(iface)
            .map_err(|e| CaptureError::Driver(e.to_string()))?
            .promisc(true)
            .immediate_mode(true)
            .timeout(1000)
            .open()
            .map_err(|e| CaptureError::Driver(e.to_string()))?;
        capture
            .filter(bpf, true)
            .map_err(|e| CaptureError::Driver(e.to_string()))?;
        Ok(PcapSource { capture })
    }
}

impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> Result<Option<(Vec<u8>, DateTime<Utc>)>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = Utc
                    .timestamp_opt(ts.tv_sec as i64, (ts.tv_usec as u32) * 1000)
                    .single()
                    .unwrap_or_else(Utc::now);
                Ok(Some((packet.data.to_vec(), timestamp)))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(err) => Err(CaptureError::Driver(err.to_string())),
        }
    }

    fn stats(&mut self) -> Option<DriverStats> {
        self.capture.stats().ok().map(|s| DriverStats {
            received: s.received,
            dropped: s.dropped,
            if_dropped: s.if_dropped,
        })
    }
}

/// Synchronous Radiotap-linktype PCAP mirror of everything captured on
/// one interface.
pub struct PcapMirror {
    writer: PcapWriter<std::fs::File>,
}

impl PcapMirror {
    pub fn create(path: &std::path::Path) -> Result<PcapMirror, CaptureError> {
        let file = std::fs::File::create(path)?;
        let header = PcapHeader {
            datalink: DataLink::IEEE802_11_RADIOTAP,
            ..Default::default()
        };
        let writer = PcapWriter::with_header(file, header)
            .map_err(|e| CaptureError::PcapWrite(e.to_string()))?;
        Ok(PcapMirror { writer })
    }

    pub fn write(&mut self, data: &[u8], timestamp: DateTime<Utc>) -> Result<(), CaptureError> {
        let ts = Duration::new(
            timestamp.timestamp().max(0) as u64,
            timestamp.timestamp_subsec_nanos(),
        );
        let packet = PcapPacket::new(ts, data.len() as u32, data);
        self.writer
            .write_packet(&packet)
            .map_err(|e| CaptureError::PcapWrite(e.to_string()))?;
        Ok(())
    }
}

/// One interface's capture loop. Runs on a dedicated thread until
/// cancellation, bus closure, or a fatal driver error.
pub struct CaptureWorker {
    interface: Arc<str>,
    source: Box<dyn FrameSource>,
    bus: mpsc::Sender<CapturedPacket>,
    metrics: Arc<InterfaceMetrics>,
    mirror: Option<PcapMirror>,
    cancel: CancellationToken,
}

impl CaptureWorker {
    pub fn new(
        interface: &str,
        source: Box<dyn FrameSource>,
        bus: mpsc::Sender<CapturedPacket>,
        metrics: Arc<InterfaceMetrics>,
        mirror: Option<PcapMirror>,
        cancel: CancellationToken,
    ) -> CaptureWorker {
        CaptureWorker {
            interface: Arc::from(interface),
            source,
            bus,
            metrics,
            mirror,
            cancel,
        }
    }

    /// Blocking capture loop. Returns `Ok` on cancellation or bus
    /// closure, `Err` on a fatal driver error.
    pub fn run(mut self) -> Result<(), CaptureError> {
        let mut last_stats = Instant::now();
        log::info!("{}: capture worker started", self.interface);

        while !self.cancel.is_cancelled() {
            match self.source.next_frame() {
                Ok(Some((data, timestamp))) => {
                    if let Some(mirror) = self.mirror.as_mut() {
                        if let Err(err) = mirror.write(&data, timestamp) {
                            log::warn!("{}: mirror write failed: {err}", self.interface);
                        }
                    }
                    let packet = CapturedPacket {
                        interface: self.interface.clone(),
                        data,
                        timestamp,
                    };
                    match self.bus.try_send(packet) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            self.metrics
                                .app_packets_dropped
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            log::debug!("{}: packet bus closed", self.interface);
                            return Ok(());
                        }
                    }
                }
                Ok(None) => {} // read timeout, loop for cancellation
                Err(err) => {
                    log::error!("{}: capture failed: {err}", self.interface);
                    return Err(err);
                }
            }

            if last_stats.elapsed() >= Duration::from_secs(1) {
                last_stats = Instant::now();
                if let Some(stats) = self.source.stats() {
                    self.metrics
                        .packets_received
                        .store(stats.received as u64, Ordering::Relaxed);
                    self.metrics
                        .packets_dropped
                        .store(stats.dropped as u64, Ordering::Relaxed);
                    self.metrics
                        .packets_if_dropped
                        .store(stats.if_dropped as u64, Ordering::Relaxed);
                }
            }
        }
        log::info!("{}: capture worker cancelled", self.interface);
        Ok(())
    }
}
