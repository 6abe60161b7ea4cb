//! Ref-counted per-interface channel locks.
//!
//! Attacks and the WPS driver need an interface parked on one channel.
//! The arbiter pauses that interface's hopper on the first lock, allows
//! re-entrant locks on the same channel, and refuses conflicting
//! channels with `Busy`. The hopper resumes exactly once, when the
//! count returns to zero.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use super::hopper::HopperHandle;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("interface {iface} busy: locked on channel {locked}")]
    Busy { iface: String, locked: u8 },
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    #[error("cancelled before action ran")]
    Cancelled,
}

struct LockEntry {
    channel: u8,
    count: u32,
}

struct InterfaceLock {
    hopper: HopperHandle,
    /// Serializes scoped actions on this interface.
    exec: std::sync::Arc<tokio::sync::Mutex<()>>,
}

/// Channel lock arbiter over all capture interfaces.
pub struct LockArbiter {
    interfaces: HashMap<String, InterfaceLock>,
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl LockArbiter {
    pub fn new(hoppers: HashMap<String, HopperHandle>) -> LockArbiter {
        let interfaces = hoppers
            .into_iter()
            .map(|(iface, hopper)| {
                (
                    iface,
                    InterfaceLock {
                        hopper,
                        exec: std::sync::Arc::new(tokio::sync::Mutex::new(())),
                    },
                )
            })
            .collect();
        LockArbiter {
            interfaces,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire (or re-enter) the lock for `iface` on `channel`.
    pub fn lock(&self, iface: &str, channel: u8) -> Result<(), LockError> {
        let interface = self
            .interfaces
            .get(iface)
            .ok_or_else(|| LockError::UnknownInterface(iface.to_string()))?;

        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(iface) {
            None => {
                entries.insert(
                    iface.to_string(),
                    LockEntry { channel, count: 1 },
                );
                interface.hopper.lock(channel);
                log::debug!("{iface}: channel locked on {channel}");
                Ok(())
            }
            Some(entry) if entry.channel == channel => {
                entry.count += 1;
                Ok(())
            }
            Some(entry) => Err(LockError::Busy {
                iface: iface.to_string(),
                locked: entry.channel,
            }),
        }
    }

    /// Release one hold; the hopper resumes at count zero.
    pub fn unlock(&self, iface: &str) {
        let Some(interface) = self.interfaces.get(iface) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(iface) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                entries.remove(iface);
                interface.hopper.unlock();
                log::debug!("{iface}: channel lock released");
            }
        }
    }

    /// The channel an interface is currently locked on, if any.
    pub fn locked_channel(&self, iface: &str) -> Option<u8> {
        self.entries
            .lock()
            .unwrap()
            .get(iface)
            .map(|entry| entry.channel)
    }

    /// Scoped acquire / run / release. Actions on the same interface
    /// serialize; cancellation between acquire and action releases the
    /// lock without running the action.
    pub async fn execute_with_lock<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        iface: &str,
        channel: u8,
        action: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.lock(iface, channel)?;
        let release = ReleaseOnDrop {
            arbiter: self,
            iface,
        };

        let exec = self.interfaces[iface].exec.clone();
        let _guard = exec.lock().await;
        if cancel.is_cancelled() {
            drop(release);
            return Err(LockError::Cancelled);
        }
        let result = action().await;
        drop(release);
        Ok(result)
    }
}

struct ReleaseOnDrop<'a> {
    arbiter: &'a LockArbiter,
    iface: &'a str,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.arbiter.unlock(self.iface);
    }
}
