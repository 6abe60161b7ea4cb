//! The engine facade: wires capture, classification, the registry,
//! detectors, and the attack engines together, and exposes the
//! control, query, and subscribe ports.
//!
//! Data flows leaf to root: capture workers feed the packet bus, a
//! handler pool classifies frames in parallel, and a single consumer
//! merges observations into the registry and runs the detector
//! pipeline. Control flows root to leaf: port calls reach the attack
//! engines, which coordinate with the lock arbiter and injectors.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::{
    CaptureError, CaptureManager, CapturedPacket, HopperState, LockArbiter, MetricsSnapshot,
};
use crate::config::Config;
use crate::detect::{DetectorPipeline, RuleSet};
use crate::handler::{handle_packet, HandlerContext, HandlerOutput};
use crate::handshake::HandshakeTracker;
use crate::inject::{
    AttackError, AuthFloodEngine, DeauthEngine, WpsEngine,
};
use crate::model::{
    Alert, AlertRule, AttackStatusReport, AuthFloodConfig, DeauthConfig, Device, EngineEvent,
    WpsConfig,
};
use crate::ports::{
    InterfaceController, LocationProvider, OuiResolver, ProcessRunner, SignatureStore, Storage,
};
use crate::registry::{DeviceFilter, DeviceRegistry};

/// Event bus depth. Slow subscribers lag and lose events rather than
/// backpressuring the pipeline.
const EVENT_BUS_CAPACITY: usize = 1024;

/// All external collaborators, injectable for tests.
pub struct Collaborators {
    pub controller: Arc<dyn InterfaceController>,
    pub oui: Arc<dyn OuiResolver>,
    pub location: Arc<dyn LocationProvider>,
    pub runner: Arc<dyn ProcessRunner>,
    pub signatures: Option<Arc<dyn SignatureStore>>,
    pub storage: Option<Arc<dyn Storage>>,
}

impl Collaborators {
    /// The production set: iw/ip shell-outs, the compiled-in OUI
    /// table, no location, real child processes, no persistence.
    pub fn default_set() -> Collaborators {
        Collaborators {
            controller: Arc::new(crate::ports::IwInterfaceController),
            oui: Arc::new(crate::ports::StaticOuiResolver),
            location: Arc::new(crate::ports::FixedLocationProvider(None)),
            runner: Arc::new(crate::ports::TokioProcessRunner),
            signatures: None,
            storage: None,
        }
    }
}

/// Per-interface information for the query port.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InterfaceDetails {
    pub interface: String,
    pub hopper_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_channel: Option<u8>,
    pub metrics: MetricsSnapshot,
}

pub struct Engine {
    config: Config,
    registry: Arc<DeviceRegistry>,
    tracker: Arc<HandshakeTracker>,
    rules: Arc<RuleSet>,
    detectors: Arc<DetectorPipeline>,
    manager: Arc<CaptureManager>,
    arbiter: Arc<LockArbiter>,
    deauth: DeauthEngine,
    authflood: AuthFloodEngine,
    wps: Arc<WpsEngine>,
    events: broadcast::Sender<EngineEvent>,
    alert_history: Arc<Mutex<VecDeque<Alert>>>,
    oui: Arc<dyn OuiResolver>,
    location: Arc<dyn LocationProvider>,
    signatures: Option<Arc<dyn SignatureStore>>,
    storage: Option<Arc<dyn Storage>>,
    cancel: CancellationToken,
    bus_rx: Mutex<Option<mpsc::Receiver<CapturedPacket>>>,
}

impl Engine {
    pub fn new(config: Config, collaborators: Collaborators) -> Engine {
        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let mut manager = CaptureManager::new(
            config.interfaces.clone(),
            config.capture.clone(),
            &config.hopper,
            collaborators.controller.clone(),
            cancel.clone(),
        );
        let bus_rx = manager.take_packet_bus();
        let arbiter = Arc::new(LockArbiter::new(manager.hoppers()));

        let mut injectors = std::collections::HashMap::new();
        for iface in manager.interfaces() {
            if let Some(injector) = manager.injector(iface) {
                injectors.insert(iface.clone(), injector);
            }
        }

        let deauth = DeauthEngine::new(
            injectors.clone(),
            config.attack.max_concurrent,
            events.clone(),
            cancel.clone(),
        );
        let authflood = AuthFloodEngine::new(
            injectors,
            config.attack.max_concurrent,
            events.clone(),
            cancel.clone(),
        );
        let wps = Arc::new(WpsEngine::new(
            collaborators.runner.clone(),
            arbiter.clone(),
            config.attack.max_concurrent,
            events.clone(),
            cancel.clone(),
        ));

        let rules = Arc::new(RuleSet::new());
        Engine {
            registry: Arc::new(DeviceRegistry::new()),
            tracker: Arc::new(HandshakeTracker::new(
                config.handshake.handshake_dir.clone(),
                config.handshake.max_frames,
            )),
            detectors: Arc::new(DetectorPipeline::with_defaults(rules.clone())),
            rules,
            manager: Arc::new(manager),
            arbiter,
            deauth,
            authflood,
            wps,
            events,
            alert_history: Arc::new(Mutex::new(VecDeque::new())),
            oui: collaborators.oui,
            location: collaborators.location,
            signatures: collaborators.signatures,
            storage: collaborators.storage,
            cancel,
            bus_rx: Mutex::new(bus_rx),
            config,
        }
    }

    /// Start everything and block until capture ends (fatal errors on
    /// every interface, or shutdown).
    pub async fn run(&self) -> Result<(), CaptureError> {
        let bus_rx = self
            .bus_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CaptureError::Driver("engine already running".into()))?;
        self.spawn_pipeline(bus_rx);

        let result = self.manager.start(self.events.clone()).await;
        self.shutdown().await;
        result
    }

    /// Cancel the root token and give tasks a grace period to drain.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the processing side: handler pool, registry consumer,
    /// alert consumer, and the periodic sweeps. Separated from capture
    /// so tests can drive the bus directly.
    pub fn spawn_pipeline(&self, bus_rx: mpsc::Receiver<CapturedPacket>) {
        let capacity = self.config.capture.pipeline_capacity.max(1);
        let (obs_tx, obs_rx) = mpsc::channel(capacity);
        let (alert_tx, alert_rx) = mpsc::channel(capacity);

        let bus = Arc::new(tokio::sync::Mutex::new(bus_rx));
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        for worker in 0..workers {
            self.spawn_handler_worker(worker, bus.clone(), obs_tx.clone(), alert_tx.clone());
        }

        self.spawn_registry_consumer(obs_rx, alert_tx);
        self.spawn_alert_consumer(alert_rx);
        self.spawn_sweeps();
        log::info!("pipeline started with {workers} handler worker(s)");
    }

    fn spawn_handler_worker(
        &self,
        worker: usize,
        bus: Arc<tokio::sync::Mutex<mpsc::Receiver<CapturedPacket>>>,
        obs_tx: mpsc::Sender<crate::model::DeviceObservation>,
        alert_tx: mpsc::Sender<Alert>,
    ) {
        let tracker = self.tracker.clone();
        let oui = self.oui.clone();
        let location = self.location.clone();
        let manager = self.manager.clone();
        let eapol_pause = Duration::from_secs(self.config.hopper.eapol_pause_secs);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let pause = move |duration: Duration| manager.pause_all(duration);
            loop {
                let packet = tokio::select! {
                    _ = cancel.cancelled() => break,
                    packet = async { bus.lock().await.recv().await } => packet,
                };
                let Some(packet) = packet else { break };

                let ctx = HandlerContext {
                    tracker: &tracker,
                    oui: &*oui,
                    location: &*location,
                    pause: &pause,
                    eapol_pause,
                };
                // A malformed frame must never take the worker down.
                let output =
                    std::panic::catch_unwind(AssertUnwindSafe(|| handle_packet(&packet, &ctx)));
                let HandlerOutput {
                    observation,
                    alerts,
                } = match output {
                    Ok(output) => output,
                    Err(_) => {
                        log::error!("handler worker {worker}: panic on frame, discarded");
                        continue;
                    }
                };

                if let Some(observation) = observation {
                    if obs_tx.try_send(observation).is_err() {
                        log::trace!("observation channel full, dropping");
                    }
                }
                for alert in alerts {
                    if alert_tx.try_send(alert).is_err() {
                        log::trace!("alert channel full, dropping");
                    }
                }
            }
            log::debug!("handler worker {worker} exited");
        });
    }

    fn spawn_registry_consumer(
        &self,
        mut obs_rx: mpsc::Receiver<crate::model::DeviceObservation>,
        alert_tx: mpsc::Sender<Alert>,
    ) {
        let registry = self.registry.clone();
        let detectors = self.detectors.clone();
        let signatures = self.signatures.clone();
        let storage = self.storage.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let observation = tokio::select! {
                    _ = cancel.cancelled() => break,
                    observation = obs_rx.recv() => observation,
                };
                let Some(observation) = observation else { break };

                let (mut device, discovered) = registry.observe(observation);

                // Fingerprint enrichment when the store recognizes the
                // device.
                if let Some(store) = &signatures {
                    if device.model.is_empty() {
                        if let Some(matched) = store.find_match(&device) {
                            let enrich = crate::model::DeviceObservation {
                                mac: device.mac,
                                timestamp: device.last_seen,
                                model: Some(matched.signature),
                                ..crate::model::DeviceObservation::default()
                            };
                            device = registry.observe(enrich).0;
                        }
                    }
                }

                let alerts = detectors.analyze(&device, &registry);
                // Severe anomalies become durable vulnerability tags.
                for alert in &alerts {
                    if alert.severity <= crate::model::Severity::High {
                        registry.record_vulnerability(
                            &alert.device_mac,
                            &alert.subtype,
                            alert.severity,
                        );
                        if let Some(storage) = &storage {
                            if let Err(err) =
                                storage.save_vulnerability(&alert.device_mac, &alert.subtype)
                            {
                                log::debug!("vulnerability persistence failed: {err}");
                            }
                        }
                    }
                }
                // Detector contributions may have landed in the profile.
                let device = registry.get(&device.mac).unwrap_or(device);

                if let Some(storage) = &storage {
                    if let Err(err) = storage.save_device(&device) {
                        log::debug!("device persistence failed: {err}");
                    }
                }

                let _ = events.send(EngineEvent::DeviceUpdate {
                    device: Box::new(device),
                    discovered,
                });
                for alert in alerts {
                    if alert_tx.try_send(alert).is_err() {
                        log::trace!("alert channel full, dropping");
                    }
                }
            }
            log::debug!("registry consumer exited");
        });
    }

    fn spawn_alert_consumer(&self, mut alert_rx: mpsc::Receiver<Alert>) {
        let history = self.alert_history.clone();
        let bound = self.config.registry.alert_history;
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let alert = tokio::select! {
                    _ = cancel.cancelled() => break,
                    alert = alert_rx.recv() => alert,
                };
                let Some(alert) = alert else { break };
                log::info!(
                    "[{}] {} {}: {}",
                    alert.severity.as_str(),
                    alert.subtype,
                    alert.device_mac,
                    alert.message
                );
                {
                    let mut history = history.lock().unwrap();
                    history.push_back(alert.clone());
                    while history.len() > bound {
                        history.pop_front();
                    }
                }
                let _ = events.send(EngineEvent::Alert { alert });
            }
        });
    }

    fn spawn_sweeps(&self) {
        let registry = self.registry.clone();
        let registry_config = self.config.registry.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                registry_config.sweep_interval_secs.max(1),
            ));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now();
                        registry.prune(Duration::from_secs(registry_config.device_ttl_secs), now);
                        registry.cleanup_stale_connections(
                            Duration::from_secs(registry_config.connection_timeout_secs),
                            now,
                        );
                    }
                }
            }
        });

        let tracker = self.tracker.clone();
        let handshake_config = self.config.handshake.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                handshake_config.cleanup_interval_secs.max(1),
            ));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = tracker.cleanup(
                            Duration::from_secs(handshake_config.session_ttl_secs),
                            chrono::Utc::now(),
                        );
                        if removed > 0 {
                            log::debug!("dropped {removed} idle handshake session(s)");
                        }
                    }
                }
            }
        });

        let janitor_age = Duration::from_secs(self.config.attack.wps_janitor_secs);
        let wps = self.wps.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => wps.janitor_sweep(janitor_age, chrono::Utc::now()),
                }
            }
        });
    }

    // ── Control port ───────────────────────────────────────────────

    pub fn start_deauth(&self, config: DeauthConfig) -> Result<Uuid, AttackError> {
        self.deauth.start(config)
    }

    pub fn start_auth_flood(&self, config: AuthFloodConfig) -> Result<Uuid, AttackError> {
        self.authflood.start(config)
    }

    pub fn start_wps(&self, config: WpsConfig) -> Result<Uuid, AttackError> {
        self.wps.start(config, None)
    }

    /// Stop whichever engine owns the id. With `force`, stopping an
    /// already-terminal session is not an error and the session is
    /// reaped immediately.
    pub fn stop_attack(&self, id: &Uuid, force: bool) -> Result<(), AttackError> {
        let result = self
            .deauth
            .stop(id)
            .or_else(|err| match err {
                AttackError::NotFound(_) => self.authflood.stop(id),
                other => Err(other),
            })
            .or_else(|err| match err {
                AttackError::NotFound(_) => self.wps.stop(id),
                other => Err(other),
            });
        match result {
            Err(AttackError::AlreadyTerminal) if force => {
                self.deauth.cleanup_finished();
                self.authflood.cleanup_finished();
                Ok(())
            }
            other => other,
        }
    }

    pub fn add_rule(&self, rule: AlertRule) -> Uuid {
        self.rules.add(rule)
    }

    pub fn remove_rule(&self, id: &Uuid) -> bool {
        self.rules.remove(id)
    }

    // ── Query port ─────────────────────────────────────────────────

    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.registry.list_filtered(filter)
    }

    pub fn get_alerts(&self) -> Vec<Alert> {
        self.alert_history.lock().unwrap().iter().cloned().collect()
    }

    pub fn attack_status(&self, id: &Uuid) -> Option<AttackStatusReport> {
        self.deauth
            .status(id)
            .or_else(|| self.authflood.status(id))
            .or_else(|| self.wps.status(id))
    }

    pub fn interface_details(&self) -> Vec<InterfaceDetails> {
        self.manager
            .interfaces()
            .iter()
            .map(|iface| {
                let hopper_state = self
                    .manager
                    .hoppers()
                    .get(iface)
                    .map(|handle| match handle.state() {
                        HopperState::Idle => "idle",
                        HopperState::Hopping => "hopping",
                        HopperState::Paused => "paused",
                        HopperState::Locked => "locked",
                        HopperState::Stopped => "stopped",
                    })
                    .unwrap_or("unknown")
                    .to_string();
                InterfaceDetails {
                    interface: iface.clone(),
                    hopper_state,
                    locked_channel: self.arbiter.locked_channel(iface),
                    metrics: self
                        .manager
                        .metrics()
                        .get(iface)
                        .map(|metrics| metrics.snapshot())
                        .unwrap_or(MetricsSnapshot {
                            packets_received: 0,
                            packets_dropped: 0,
                            packets_if_dropped: 0,
                            app_packets_dropped: 0,
                        }),
                }
            })
            .collect()
    }

    // ── Subscribe port ─────────────────────────────────────────────

    /// A lossy event subscription: lagging consumers skip ahead.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// A producer handle onto the packet bus, for synthetic replay.
    pub fn packet_sender(&self) -> mpsc::Sender<CapturedPacket> {
        self.manager.packet_sender()
    }
}
