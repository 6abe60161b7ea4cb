//! Injection engines: frame emission, attack lifecycle, and the WPS
//! driver.

pub mod authflood;
pub mod deauth;
pub mod injector;
pub mod wps;

pub use authflood::AuthFloodEngine;
pub use deauth::DeauthEngine;
pub use injector::{InjectError, Injector, MonitorEvent};
pub use wps::WpsEngine;

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{AttackKind, AttackState, AttackStatusReport, EngineEvent};

#[derive(Debug, thiserror::Error)]
pub enum AttackError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("attack not found: {0}")]
    NotFound(Uuid),
    #[error("attack already in a terminal state")]
    AlreadyTerminal,
    #[error("too many concurrent attacks (limit {0})")]
    TooMany(usize),
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    #[error(transparent)]
    Inject(#[from] InjectError),
}

struct Entry {
    report: AttackStatusReport,
    cancel: CancellationToken,
}

/// Shared session bookkeeping for all three attack engines: the id map,
/// capacity bound, absorbing terminal states, and event publication.
pub(crate) struct AttackTable {
    entries: RwLock<HashMap<Uuid, Entry>>,
    events: broadcast::Sender<EngineEvent>,
    max_concurrent: usize,
}

impl AttackTable {
    pub(crate) fn new(max_concurrent: usize, events: broadcast::Sender<EngineEvent>) -> AttackTable {
        AttackTable {
            entries: RwLock::new(HashMap::new()),
            events,
            max_concurrent,
        }
    }

    fn publish(&self, report: &AttackStatusReport) {
        let _ = self.events.send(EngineEvent::AttackStatus {
            report: report.clone(),
        });
    }

    /// Register a new pending session. Finished sessions are reaped
    /// first so they never starve new attacks.
    pub(crate) fn insert_pending(
        &self,
        kind: AttackKind,
        cancel: CancellationToken,
    ) -> Result<Uuid, AttackError> {
        self.cleanup_finished();
        let mut entries = self.entries.write().unwrap();
        if entries.len() >= self.max_concurrent {
            return Err(AttackError::TooMany(self.max_concurrent));
        }
        let id = Uuid::new_v4();
        let report = AttackStatusReport::new(id, kind);
        self.publish(&report);
        entries.insert(id, Entry { report, cancel });
        Ok(id)
    }

    /// Mutate a session's report and publish the new status.
    pub(crate) fn update<F: FnOnce(&mut AttackStatusReport)>(&self, id: &Uuid, mutate: F) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            mutate(&mut entry.report);
            let report = entry.report.clone();
            drop(entries);
            self.publish(&report);
        }
    }

    pub(crate) fn set_running(&self, id: &Uuid) {
        self.update(id, |report| {
            if report.state == AttackState::Pending {
                report.state = AttackState::Running;
                report.start_time = Utc::now();
            }
        });
    }

    /// Record the task's outcome. A state already made terminal by
    /// stop/pause wins; only a still-running session transitions.
    pub(crate) fn finish(&self, id: &Uuid, packets_sent: u64, error: Option<String>) {
        self.update(id, |report| {
            report.packets_sent = packets_sent;
            report.end_time = Some(Utc::now());
            if !report.state.is_terminal() {
                match error {
                    Some(message) => {
                        report.state = AttackState::Failed;
                        report.error_message = message;
                    }
                    None => report.state = AttackState::Stopped,
                }
            }
        });
    }

    /// Cancel and mark `Stopped` (or `Paused`). Refuses terminal
    /// sessions.
    pub(crate) fn halt(&self, id: &Uuid, state: AttackState) -> Result<(), AttackError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(id).ok_or(AttackError::NotFound(*id))?;
        if entry.report.state.is_terminal() {
            return Err(AttackError::AlreadyTerminal);
        }
        entry.cancel.cancel();
        entry.report.state = state;
        entry.report.end_time = Some(Utc::now());
        let report = entry.report.clone();
        drop(entries);
        self.publish(&report);
        Ok(())
    }

    /// Drop sessions in `Stopped` or `Failed`.
    pub(crate) fn cleanup_finished(&self) {
        self.entries.write().unwrap().retain(|_, entry| {
            !matches!(
                entry.report.state,
                AttackState::Stopped | AttackState::Failed
            )
        });
    }

    /// Drop terminal sessions older than `age` — the WPS janitor rule.
    pub(crate) fn cleanup_older_than(&self, age: std::time::Duration, now: chrono::DateTime<Utc>) {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        self.entries.write().unwrap().retain(|_, entry| {
            !(entry.report.state.is_terminal()
                && entry
                    .report
                    .end_time
                    .map_or(false, |end| now - end > age))
        });
    }

    pub(crate) fn status(&self, id: &Uuid) -> Option<AttackStatusReport> {
        self.entries
            .read()
            .unwrap()
            .get(id)
            .map(|entry| entry.report.clone())
    }

    pub(crate) fn list(&self) -> Vec<AttackStatusReport> {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.report.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

/// Channel bounds shared by every attack config: 1..=165 covers both
/// bands.
pub(crate) fn validate_channel(channel: u8) -> Result<(), AttackError> {
    if (1..=165).contains(&channel) {
        Ok(())
    } else {
        Err(AttackError::InvalidConfig(format!(
            "channel {channel} out of range 1-165"
        )))
    }
}
