//! Deauthentication attack lifecycle.
//!
//! The engine validates a configuration, registers a cancellable
//! session, and hands the emission work to the injector on its own
//! task. `packet_count == 0` selects the continuous path; anything
//! else is a finite burst.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{AttackKind, AttackState, AttackStatusReport, DeauthConfig, DeauthMode, EngineEvent};

use super::{validate_channel, AttackError, AttackTable, Injector};

pub struct DeauthEngine {
    injectors: HashMap<String, Arc<Injector>>,
    table: Arc<AttackTable>,
    cancel_root: CancellationToken,
}

fn validate(config: &DeauthConfig) -> Result<(), AttackError> {
    if config.target_mac == crate::model::Mac::ZERO {
        return Err(AttackError::InvalidConfig("target_mac is required".into()));
    }
    if matches!(config.mode, DeauthMode::Unicast | DeauthMode::Targeted)
        && config.client_mac.is_none()
    {
        return Err(AttackError::InvalidConfig(format!(
            "{:?} mode requires client_mac",
            config.mode
        )));
    }
    validate_channel(config.channel)
}

impl DeauthEngine {
    pub fn new(
        injectors: HashMap<String, Arc<Injector>>,
        max_concurrent: usize,
        events: broadcast::Sender<EngineEvent>,
        cancel_root: CancellationToken,
    ) -> DeauthEngine {
        DeauthEngine {
            injectors,
            table: Arc::new(AttackTable::new(max_concurrent, events)),
            cancel_root,
        }
    }

    /// Validate and launch. The returned id is live immediately; the
    /// session transitions to running on its own task.
    pub fn start(&self, config: DeauthConfig) -> Result<Uuid, AttackError> {
        validate(&config)?;
        let injector = self
            .injectors
            .get(&config.interface)
            .cloned()
            .ok_or_else(|| AttackError::UnknownInterface(config.interface.clone()))?;

        let cancel = self.cancel_root.child_token();
        let id = self.table.insert_pending(AttackKind::Deauth, cancel.clone())?;
        let table = self.table.clone();

        tokio::spawn(async move {
            table.set_running(&id);
            log::info!(
                "deauth {id}: {:?} against {} on channel {}",
                config.mode,
                config.target_mac,
                config.channel
            );

            // Run the emission on its own task so a panic is contained
            // and fails only this attack.
            let worker = {
                let cancel = cancel.clone();
                let table = table.clone();
                let continuous = config.packet_count == 0;
                tokio::spawn(async move {
                    if continuous {
                        let (status_tx, mut status_rx) = mpsc::channel(16);
                        let drain = {
                            let table = table.clone();
                            tokio::spawn(async move {
                                while let Some(sent) = status_rx.recv().await {
                                    table.update(&id, |report| report.packets_sent = sent);
                                }
                            })
                        };
                        let result = injector
                            .start_continuous_deauth(&cancel, &config, status_tx)
                            .await;
                        drain.abort();
                        result
                    } else {
                        injector.send_deauth_burst(&cancel, &config).await
                    }
                })
            };

            match worker.await {
                Ok(Ok(sent)) => table.finish(&id, sent, None),
                Ok(Err(err)) => table.finish(&id, 0, Some(err.to_string())),
                Err(join_err) => {
                    let message = if join_err.is_panic() {
                        format!("attack task panicked: {join_err}")
                    } else {
                        "attack task aborted".to_string()
                    };
                    table.finish(&id, 0, Some(message));
                }
            }
        });
        Ok(id)
    }

    /// Cancel and mark stopped. Refuses sessions already terminal.
    pub fn stop(&self, id: &Uuid) -> Result<(), AttackError> {
        self.table.halt(id, AttackState::Stopped)
    }

    /// Cancel and mark paused. Resume is unimplemented — start a new
    /// attack instead.
    pub fn pause(&self, id: &Uuid) -> Result<(), AttackError> {
        self.table.halt(id, AttackState::Paused)
    }

    pub fn cleanup_finished(&self) {
        self.table.cleanup_finished();
    }

    pub fn status(&self, id: &Uuid) -> Option<AttackStatusReport> {
        self.table.status(id)
    }

    pub fn list(&self) -> Vec<AttackStatusReport> {
        self.table.list()
    }

    pub fn active_count(&self) -> usize {
        self.table.len()
    }
}
