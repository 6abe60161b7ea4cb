//! Authentication-flood attack lifecycle.
//!
//! Same session discipline as the deauth engine; the emission loop
//! sprays Open System authentication requests at the target BSSID
//! until the count is reached or the session is cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{AttackKind, AttackState, AttackStatusReport, AuthFloodConfig, EngineEvent, Mac};

use super::{validate_channel, AttackError, AttackTable, Injector};

pub struct AuthFloodEngine {
    injectors: HashMap<String, Arc<Injector>>,
    table: Arc<AttackTable>,
    cancel_root: CancellationToken,
}

fn validate(config: &AuthFloodConfig) -> Result<(), AttackError> {
    if config.target_mac == Mac::ZERO {
        return Err(AttackError::InvalidConfig("target_mac is required".into()));
    }
    validate_channel(config.channel)
}

impl AuthFloodEngine {
    pub fn new(
        injectors: HashMap<String, Arc<Injector>>,
        max_concurrent: usize,
        events: broadcast::Sender<EngineEvent>,
        cancel_root: CancellationToken,
    ) -> AuthFloodEngine {
        AuthFloodEngine {
            injectors,
            table: Arc::new(AttackTable::new(max_concurrent, events)),
            cancel_root,
        }
    }

    pub fn start(&self, config: AuthFloodConfig) -> Result<Uuid, AttackError> {
        validate(&config)?;
        let injector = self
            .injectors
            .get(&config.interface)
            .cloned()
            .ok_or_else(|| AttackError::UnknownInterface(config.interface.clone()))?;

        let cancel = self.cancel_root.child_token();
        let id = self
            .table
            .insert_pending(AttackKind::AuthFlood, cancel.clone())?;
        let table = self.table.clone();

        tokio::spawn(async move {
            table.set_running(&id);
            log::info!(
                "auth flood {id}: {} at {} ms intervals",
                config.target_mac,
                config.packet_interval_ms
            );

            let (status_tx, mut status_rx) = mpsc::channel(16);
            let drain = {
                let table = table.clone();
                tokio::spawn(async move {
                    while let Some(sent) = status_rx.recv().await {
                        table.update(&id, |report| report.packets_sent = sent);
                    }
                })
            };
            let result = injector.start_auth_flood(&cancel, &config, status_tx).await;
            drain.abort();
            match result {
                Ok(sent) => table.finish(&id, sent, None),
                Err(err) => table.finish(&id, 0, Some(err.to_string())),
            }
        });
        Ok(id)
    }

    pub fn stop(&self, id: &Uuid) -> Result<(), AttackError> {
        self.table.halt(id, AttackState::Stopped)
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
}
