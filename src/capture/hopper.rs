//! Per-interface channel hopping.
//!
//! The state machine is a pure core (`HopperCore`) driven by a tokio
//! task; commands arrive on a channel and the current state is
//! published through a watch so the lock arbiter and the query port can
//! observe it without asking the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::ports::InterfaceController;

/// Default dwell time per channel. Long enough to catch beacons
/// (broadcast every ~100 ms) with margin.
pub const DEFAULT_DWELL_MS: u64 = 300;

/// Hopper lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperState {
    Idle,
    Hopping,
    Paused,
    Locked,
    Stopped,
}

/// Commands accepted by the hopper task.
#[derive(Debug, Clone, PartialEq)]
pub enum HopperCommand {
    Start,
    Pause(Duration),
    Lock(u8),
    Unlock,
    Stop,
    SetChannels(Vec<u8>),
}

/// Pure state machine: transitions, channel rotation, error counting.
#[derive(Debug)]
pub struct HopperCore {
    state: HopperState,
    locked_channel: Option<u8>,
    channels: Vec<u8>,
    index: usize,
    error_count: u32,
}

impl HopperCore {
    pub fn new(channels: Vec<u8>) -> HopperCore {
        HopperCore {
            state: HopperState::Idle,
            locked_channel: None,
            channels,
            index: 0,
            error_count: 0,
        }
    }

    pub fn state(&self) -> HopperState {
        self.state
    }

    pub fn locked_channel(&self) -> Option<u8> {
        self.locked_channel
    }

    /// Apply a command; returns the channel to set immediately when a
    /// lock was taken.
    pub fn apply(&mut self, command: &HopperCommand) -> Option<u8> {
        if self.state == HopperState::Stopped {
            return None; // terminal, one-shot
        }
        match command {
            HopperCommand::Start => {
                if self.state == HopperState::Idle {
                    self.state = HopperState::Hopping;
                }
                None
            }
            HopperCommand::Pause(_) => {
                if self.state == HopperState::Hopping {
                    self.state = HopperState::Paused;
                }
                None
            }
            HopperCommand::Lock(channel) => {
                self.state = HopperState::Locked;
                self.locked_channel = Some(*channel);
                Some(*channel)
            }
            HopperCommand::Unlock => {
                if self.state == HopperState::Locked {
                    self.state = HopperState::Hopping;
                    self.locked_channel = None;
                }
                None
            }
            HopperCommand::Stop => {
                self.state = HopperState::Stopped;
                self.locked_channel = None;
                None
            }
            HopperCommand::SetChannels(channels) => {
                self.channels = channels.clone();
                self.index = 0;
                None
            }
        }
    }

    /// Resume from a pause timer expiry.
    pub fn resume_from_pause(&mut self) {
        if self.state == HopperState::Paused {
            self.state = HopperState::Hopping;
        }
    }

    /// The next channel in the round-robin, or `None` when not hopping
    /// or the list is empty.
    pub fn next_hop(&mut self) -> Option<u8> {
        if self.state != HopperState::Hopping || self.channels.is_empty() {
            return None;
        }
        let channel = self.channels[self.index % self.channels.len()];
        self.index = (self.index + 1) % self.channels.len();
        Some(channel)
    }

    /// Count a SetChannel failure. Returns true when this failure
    /// should be logged (the first, then every 10th consecutive).
    pub fn record_error(&mut self) -> bool {
        self.error_count += 1;
        self.error_count == 1 || self.error_count % 10 == 0
    }

    /// Count a SetChannel success. Returns true when it ends an error
    /// streak (log the recovery).
    pub fn record_recovery(&mut self) -> bool {
        let recovered = self.error_count > 0;
        self.error_count = 0;
        recovered
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

/// Cloneable handle to a running hopper task.
#[derive(Clone)]
pub struct HopperHandle {
    tx: mpsc::UnboundedSender<HopperCommand>,
    state_rx: watch::Receiver<HopperState>,
}

impl HopperHandle {
    fn send(&self, command: HopperCommand) {
        let _ = self.tx.send(command);
    }

    pub fn start(&self) {
        self.send(HopperCommand::Start);
    }

    pub fn pause(&self, duration: Duration) {
        self.send(HopperCommand::Pause(duration));
    }

    pub fn lock(&self, channel: u8) {
        self.send(HopperCommand::Lock(channel));
    }

    pub fn unlock(&self) {
        self.send(HopperCommand::Unlock);
    }

    pub fn stop(&self) {
        self.send(HopperCommand::Stop);
    }

    pub fn set_channels(&self, channels: Vec<u8>) {
        self.send(HopperCommand::SetChannels(channels));
    }

    pub fn state(&self) -> HopperState {
        *self.state_rx.borrow()
    }

    /// A detached handle plus its command stream, for tests that stand
    /// in for the task.
    #[cfg(test)]
    pub(crate) fn detached() -> (
        HopperHandle,
        mpsc::UnboundedReceiver<HopperCommand>,
        watch::Sender<HopperState>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(HopperState::Hopping);
        (HopperHandle { tx, state_rx }, rx, state_tx)
    }
}

/// Spawn the hopper task for one interface. Hopping begins on
/// [`HopperHandle::start`].
pub fn spawn(
    iface: String,
    channels: Vec<u8>,
    dwell: Duration,
    controller: Arc<dyn InterfaceController>,
    cancel: CancellationToken,
) -> HopperHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(HopperState::Idle);

    tokio::spawn(async move {
        let mut core = HopperCore::new(channels);
        let mut pause_deadline: Option<tokio::time::Instant> = None;

        loop {
            let hopping = core.state() == HopperState::Hopping;
            let deadline = pause_deadline;
            tokio::select! {
                _ = cancel.cancelled() => {
                    core.apply(&HopperCommand::Stop);
                    let _ = state_tx.send(core.state());
                    break;
                }
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    match &command {
                        HopperCommand::Pause(duration) => {
                            let new_deadline = tokio::time::Instant::now() + *duration;
                            pause_deadline = Some(match pause_deadline {
                                Some(existing) => existing.max(new_deadline),
                                None => new_deadline,
                            });
                        }
                        HopperCommand::Lock(_) | HopperCommand::Unlock | HopperCommand::Stop => {
                            pause_deadline = None;
                        }
                        _ => {}
                    }
                    if let Some(channel) = core.apply(&command) {
                        if let Err(err) = controller.set_channel(&iface, channel) {
                            log::warn!("{iface}: lock set_channel {channel} failed: {err}");
                        }
                    }
                    let _ = state_tx.send(core.state());
                    if core.state() == HopperState::Stopped {
                        break;
                    }
                }
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if deadline.is_some() => {
                    pause_deadline = None;
                    core.resume_from_pause();
                    let _ = state_tx.send(core.state());
                }
                _ = tokio::time::sleep(dwell), if hopping => {
                    if let Some(channel) = core.next_hop() {
                        match controller.set_channel(&iface, channel) {
                            Ok(()) => {
                                if core.record_recovery() {
                                    log::info!("{iface}: channel setting recovered");
                                }
                            }
                            Err(err) => {
                                if core.record_error() {
                                    log::warn!(
                                        "{iface}: set_channel {channel} failed ({} consecutive): {err}",
                                        core.error_count()
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        log::debug!("{iface}: channel hopper stopped");
    });

    HopperHandle { tx, state_rx }
}

/// Partition a combined channel set across N interfaces: two interfaces
/// split by band (2.4 GHz is channels 1-14, 5 GHz is 36 up), three or
/// more are dealt round-robin.
pub fn partition_channels(channels: &[u8], interfaces: usize) -> Vec<Vec<u8>> {
    match interfaces {
        0 => Vec::new(),
        1 => vec![channels.to_vec()],
        2 => {
            let (band24, band5): (Vec<u8>, Vec<u8>) =
                channels.iter().partition(|&&ch| ch <= 14);
            vec![band24, band5]
        }
        n => {
            let mut bins = vec![Vec::new(); n];
            for (i, &channel) in channels.iter().enumerate() {
                bins[i % n].push(channel);
            }
            bins
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MockInterfaceController;

    // ── HopperCore transitions ──────────────────────────────────────

    #[test]
    fn idle_starts_hopping() {
        let mut core = HopperCore::new(vec![1, 6, 11]);
        assert_eq!(core.state(), HopperState::Idle);
        core.apply(&HopperCommand::Start);
        assert_eq!(core.state(), HopperState::Hopping);
    }

    #[test]
    fn pause_and_resume() {
        let mut core = HopperCore::new(vec![1]);
        core.apply(&HopperCommand::Start);
        core.apply(&HopperCommand::Pause(Duration::from_secs(5)));
        assert_eq!(core.state(), HopperState::Paused);
        assert!(core.next_hop().is_none(), "no hop while paused");
        core.resume_from_pause();
        assert_eq!(core.state(), HopperState::Hopping);
    }

    #[test]
    fn lock_sets_channel_and_unlock_resumes() {
        let mut core = HopperCore::new(vec![1, 6]);
        core.apply(&HopperCommand::Start);
        assert_eq!(core.apply(&HopperCommand::Lock(11)), Some(11));
        assert_eq!(core.state(), HopperState::Locked);
        assert_eq!(core.locked_channel(), Some(11));
        assert!(core.next_hop().is_none(), "no hop while locked");
        core.apply(&HopperCommand::Unlock);
        assert_eq!(core.state(), HopperState::Hopping);
        assert_eq!(core.locked_channel(), None);
    }

    #[test]
    fn stop_is_terminal() {
        let mut core = HopperCore::new(vec![1]);
        core.apply(&HopperCommand::Start);
        core.apply(&HopperCommand::Stop);
        assert_eq!(core.state(), HopperState::Stopped);
        core.apply(&HopperCommand::Start);
        assert_eq!(core.state(), HopperState::Stopped);
        assert_eq!(core.apply(&HopperCommand::Lock(6)), None);
        assert_eq!(core.state(), HopperState::Stopped);
    }

    #[test]
    fn resume_does_not_affect_locked() {
        let mut core = HopperCore::new(vec![1]);
        core.apply(&HopperCommand::Start);
        core.apply(&HopperCommand::Lock(6));
        core.resume_from_pause();
        assert_eq!(core.state(), HopperState::Locked);
    }

    // ── round-robin rotation ────────────────────────────────────────

    #[test]
    fn next_hop_cycles_round_robin() {
        let mut core = HopperCore::new(vec![1, 6, 11]);
        core.apply(&HopperCommand::Start);
        let hops: Vec<u8> = (0..7).filter_map(|_| core.next_hop()).collect();
        assert_eq!(hops, vec![1, 6, 11, 1, 6, 11, 1]);
    }

    #[test]
    fn replacing_channels_restarts_at_index_zero() {
        let mut core = HopperCore::new(vec![1, 6, 11]);
        core.apply(&HopperCommand::Start);
        core.next_hop();
        core.next_hop();
        core.apply(&HopperCommand::SetChannels(vec![36, 40]));
        assert_eq!(core.next_hop(), Some(36));
        assert_eq!(core.next_hop(), Some(40));
        assert_eq!(core.next_hop(), Some(36));
    }

    #[test]
    fn empty_channel_list_never_hops() {
        let mut core = HopperCore::new(Vec::new());
        core.apply(&HopperCommand::Start);
        assert!(core.next_hop().is_none());
    }

    // ── error accounting ────────────────────────────────────────────

    #[test]
    fn error_logging_policy() {
        let mut core = HopperCore::new(vec![1]);
        assert!(core.record_error(), "first error logs");
        for i in 2..10 {
            assert!(!core.record_error(), "error {i} silent");
        }
        assert!(core.record_error(), "tenth error logs");
        for _ in 11..20 {
            core.record_error();
        }
        assert!(core.record_error(), "twentieth error logs");
    }

    #[test]
    fn recovery_resets_error_count() {
        let mut core = HopperCore::new(vec![1]);
        core.record_error();
        core.record_error();
        assert!(core.record_recovery());
        assert_eq!(core.error_count(), 0);
        assert!(!core.record_recovery(), "no streak, no recovery log");
        assert!(core.record_error(), "streak restarts at one");
    }

    // ── partition_channels ──────────────────────────────────────────

    #[test]
    fn partition_single_interface_takes_all() {
        let all = vec![1, 6, 11, 36, 40];
        assert_eq!(partition_channels(&all, 1), vec![all.clone()]);
    }

    #[test]
    fn partition_two_interfaces_by_band() {
        let all = vec![1, 6, 11, 36, 40, 149];
        let bins = partition_channels(&all, 2);
        assert_eq!(bins[0], vec![1, 6, 11]);
        assert_eq!(bins[1], vec![36, 40, 149]);
    }

    #[test]
    fn partition_two_interfaces_one_band_empty() {
        let bins = partition_channels(&[1, 6, 11], 2);
        assert_eq!(bins[0], vec![1, 6, 11]);
        assert!(bins[1].is_empty());
    }

    #[test]
    fn partition_three_interfaces_deals_round_robin() {
        let bins = partition_channels(&[1, 2, 3, 4, 5, 6, 7], 3);
        assert_eq!(bins[0], vec![1, 4, 7]);
        assert_eq!(bins[1], vec![2, 5]);
        assert_eq!(bins[2], vec![3, 6]);
    }

    #[test]
    fn partition_zero_interfaces() {
        assert!(partition_channels(&[1, 6], 0).is_empty());
    }

    // ── task integration ────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn task_hops_through_channels() {
        let controller = Arc::new(MockInterfaceController::default());
        let cancel = CancellationToken::new();
        let handle = spawn(
            "wlan0".into(),
            vec![1, 6, 11],
            Duration::from_millis(300),
            controller.clone(),
            cancel.clone(),
        );
        handle.start();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let set = controller.channels_set.lock().unwrap().clone();
        let channels: Vec<u8> = set.iter().map(|(_, ch)| *ch).collect();
        assert!(channels.len() >= 3, "expected several hops, got {channels:?}");
        assert_eq!(&channels[..3], &[1, 6, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn task_pause_suppresses_hops_then_resumes() {
        let controller = Arc::new(MockInterfaceController::default());
        let cancel = CancellationToken::new();
        let handle = spawn(
            "wlan0".into(),
            vec![1],
            Duration::from_millis(100),
            controller.clone(),
            cancel.clone(),
        );
        handle.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.pause(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = controller.channels_set.lock().unwrap().len();
        // Inside the pause window nothing hops.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(controller.channels_set.lock().unwrap().len(), before);
        assert_eq!(handle.state(), HopperState::Paused);
        // After expiry hopping resumes.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(controller.channels_set.lock().unwrap().len() > before);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn task_lock_sets_channel_immediately() {
        let controller = Arc::new(MockInterfaceController::default());
        let cancel = CancellationToken::new();
        let handle = spawn(
            "wlan0".into(),
            vec![1, 6],
            Duration::from_secs(10), // dwell far away
            controller.clone(),
            cancel.clone(),
        );
        handle.start();
        handle.lock(11);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), HopperState::Locked);
        let set = controller.channels_set.lock().unwrap().clone();
        assert_eq!(set.last(), Some(&("wlan0".to_string(), 11)));
        handle.unlock();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), HopperState::Hopping);
        cancel.cancel();
    }
}
