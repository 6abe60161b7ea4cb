//! Fan-in of N capture workers onto one packet bus.
//!
//! The manager owns interface bring-up, channel partitioning, hopper
//! and injector registries, and the worker threads. `start` returns
//! when every worker has exited; worker failures surface as
//! `WorkerExit` events so a caller can decide on a restart policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::{CaptureConfig, HopperConfig, CHANNELS_24GHZ, CHANNELS_5GHZ};
use crate::inject::Injector;
use crate::model::EngineEvent;
use crate::ports::InterfaceController;

use super::hopper::{self, HopperHandle};
use super::worker::{
    CaptureError, CaptureWorker, CapturedPacket, InterfaceMetrics, PcapMirror, PcapSource,
};

pub struct CaptureManager {
    interfaces: Vec<String>,
    capture_config: CaptureConfig,
    controller: Arc<dyn InterfaceController>,
    cancel: CancellationToken,
    bus_tx: mpsc::Sender<CapturedPacket>,
    bus_rx: Option<mpsc::Receiver<CapturedPacket>>,
    hoppers: HashMap<String, HopperHandle>,
    injectors: HashMap<String, Arc<Injector>>,
    metrics: HashMap<String, Arc<InterfaceMetrics>>,
}

impl CaptureManager {
    /// Build the registries: partitioned hoppers, one injector and one
    /// metrics block per interface, and the shared bounded bus. No I/O
    /// happens until [`start`](Self::start).
    pub fn new(
        interfaces: Vec<String>,
        capture_config: CaptureConfig,
        hopper_config: &HopperConfig,
        controller: Arc<dyn InterfaceController>,
        cancel: CancellationToken,
    ) -> CaptureManager {
        let capacity = capture_config.bus_capacity.max(1) * interfaces.len().max(1);
        let (bus_tx, bus_rx) = mpsc::channel(capacity);

        let combined = if hopper_config.channels.is_empty() {
            let mut all = CHANNELS_24GHZ.to_vec();
            all.extend_from_slice(CHANNELS_5GHZ);
            all
        } else {
            hopper_config.channels.clone()
        };
        let partitions = hopper::partition_channels(&combined, interfaces.len());

        let mut hoppers = HashMap::new();
        let mut injectors = HashMap::new();
        let mut metrics = HashMap::new();
        for (i, iface) in interfaces.iter().enumerate() {
            let channels = partitions.get(i).cloned().unwrap_or_default();
            let handle = hopper::spawn(
                iface.clone(),
                channels,
                Duration::from_millis(hopper_config.dwell_ms),
                controller.clone(),
                cancel.child_token(),
            );
            hoppers.insert(iface.clone(), handle);
            injectors.insert(
                iface.clone(),
                Arc::new(Injector::new(iface.clone(), controller.clone())),
            );
            metrics.insert(iface.clone(), Arc::new(InterfaceMetrics::default()));
        }

        CaptureManager {
            interfaces,
            capture_config,
            controller,
            cancel,
            bus_tx,
            bus_rx: Some(bus_rx),
            hoppers,
            injectors,
            metrics,
        }
    }

    /// The single consumer end of the packet bus. Takeable once.
    pub fn take_packet_bus(&mut self) -> Option<mpsc::Receiver<CapturedPacket>> {
        self.bus_rx.take()
    }

    /// A producer handle onto the bus — workers hold one; tests and
    /// synthetic replay can too.
    pub fn packet_sender(&self) -> mpsc::Sender<CapturedPacket> {
        self.bus_tx.clone()
    }

    pub fn hoppers(&self) -> HashMap<String, HopperHandle> {
        self.hoppers.clone()
    }

    pub fn injector(&self, iface: &str) -> Option<Arc<Injector>> {
        self.injectors.get(iface).cloned()
    }

    pub fn metrics(&self) -> &HashMap<String, Arc<InterfaceMetrics>> {
        &self.metrics
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Pause every hopper — the handler's reaction to EAPOL sightings.
    pub fn pause_all(&self, duration: Duration) {
        for handle in self.hoppers.values() {
            handle.pause(duration);
        }
    }

    /// Bring up monitor mode, spawn the workers, start the hoppers, and
    /// wait until all workers exit.
    pub async fn start(&self, events: broadcast::Sender<EngineEvent>) -> Result<(), CaptureError> {
        let mut threads = Vec::new();

        for iface in &self.interfaces {
            if let Err(err) = self.controller.enable_monitor(iface) {
                log::error!("{iface}: monitor mode failed: {err}");
                return Err(CaptureError::Driver(err.to_string()));
            }

            let mirror = match &self.capture_config.mirror_pcap_dir {
                Some(dir) => {
                    let dir = std::path::Path::new(dir);
                    std::fs::create_dir_all(dir)?;
                    Some(PcapMirror::create(&dir.join(format!("{iface}.pcap")))?)
                }
                None => None,
            };

            let source = PcapSource::open(iface, &self.capture_config.bpf_filter)?;
            let worker = CaptureWorker::new(
                iface,
                Box::new(source),
                self.bus_tx.clone(),
                self.metrics[iface].clone(),
                mirror,
                self.cancel.child_token(),
            );
            let name = iface.clone();
            threads.push((
                name.clone(),
                std::thread::Builder::new()
                    .name(format!("capture-{name}"))
                    .spawn(move || worker.run())?,
            ));
        }

        for handle in self.hoppers.values() {
            handle.start();
        }
        log::info!("capture started on {} interface(s)", self.interfaces.len());

        for (iface, thread) in threads {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            let outcome = match joined {
                Ok(Ok(result)) => result,
                _ => Err(CaptureError::Driver("capture thread panicked".into())),
            };
            if let Err(err) = outcome {
                let _ = events.send(EngineEvent::WorkerExit {
                    interface: iface.clone(),
                    error: err.to_string(),
                });
                log::warn!("{iface}: worker exited with error: {err}");
            } else {
                let _ = events.send(EngineEvent::WorkerExit {
                    interface: iface.clone(),
                    error: String::new(),
                });
            }
        }

        for iface in &self.interfaces {
            if let Err(err) = self.controller.restore_managed(iface) {
                log::debug!("{iface}: managed-mode restore failed: {err}");
            }
        }
        Ok(())
    }
}
