//! Collaborator ports — the narrow interfaces the engine consumes.
//!
//! Everything the engine needs from the outside world (interface mode
//! switching, OUI lookup, location, signature matching, child
//! processes, persistence) goes through a trait defined here, wired at
//! construction. Default implementations shell out to `ip`/`iw` and
//! spawn real child processes; tests inject mocks.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::model::{Device, Mac};

/// Errors crossing a port boundary.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
}

/// Interface lifecycle operations. Implementations may shell out; the
/// engine calls them by name and never inspects the transport.
pub trait InterfaceController: Send + Sync {
    /// `down; set type monitor; up`.
    fn enable_monitor(&self, iface: &str) -> Result<(), PortError>;
    fn restore_managed(&self, iface: &str) -> Result<(), PortError>;
    fn set_channel(&self, iface: &str, channel: u8) -> Result<(), PortError>;
    /// Force legacy bitrates for reliable injection. Best-effort.
    fn set_legacy_bitrate(&self, iface: &str) -> Result<(), PortError>;
    fn interface_index(&self, iface: &str) -> Result<i32, PortError>;
}

/// Resolves an OUI prefix to a vendor label, `"Unknown"` otherwise.
pub trait OuiResolver: Send + Sync {
    fn lookup(&self, mac: &Mac) -> String;
}

/// Supplies the coordinate recorded on each device observation.
pub trait LocationProvider: Send + Sync {
    fn get_location(&self) -> Option<(f64, f64)>;
}

/// A match from the signature store.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMatch {
    pub signature: String,
    pub confidence: f64,
    pub matched_by: Vec<String>,
}

/// Fingerprint database lookup for model/OS enrichment.
pub trait SignatureStore: Send + Sync {
    fn find_match(&self, device: &Device) -> Option<SignatureMatch>;
}

/// Optional persistence. The engine runs ephemeral without one.
pub trait Storage: Send + Sync {
    fn save_device(&self, device: &Device) -> Result<(), PortError>;
    fn get_device(&self, mac: &Mac) -> Result<Option<Device>, PortError>;
    fn save_vulnerability(&self, mac: &Mac, tag: &str) -> Result<(), PortError>;
    fn save_audit_log(&self, action: &str, detail: &str) -> Result<(), PortError>;
}

/// A running child the WPS driver can stream and signal.
#[async_trait]
pub trait ChildProcess: Send {
    /// Next output line (stdout and stderr merged, split on `\n` or
    /// `\r`), or `None` when both streams are closed.
    async fn read_line(&mut self) -> Option<String>;
    /// Wait for exit; returns the exit code (-1 when killed by signal).
    async fn wait(&mut self) -> Result<i32, PortError>;
    /// Deliver a signal to the child's whole process group.
    fn signal_group(&mut self, signal: i32);
}

/// Spawns external attack binaries in their own process group so stop
/// can signal the group.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn_in_group(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<Box<dyn ChildProcess>, PortError>;
}

// ── Default implementations ────────────────────────────────────────────

/// Shell-out controller using `ip` and `iw`.
pub struct IwInterfaceController;

impl IwInterfaceController {
    fn run(program: &str, args: &[&str]) -> Result<(), PortError> {
        let output = std::process::Command::new(program).args(args).output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PortError::CommandFailed(format!(
                "{program} {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl InterfaceController for IwInterfaceController {
    fn enable_monitor(&self, iface: &str) -> Result<(), PortError> {
        Self::run("ip", &["link", "set", iface, "down"])?;
        Self::run("iw", &["dev", iface, "set", "type", "monitor"])?;
        Self::run("ip", &["link", "set", iface, "up"])
    }

    fn restore_managed(&self, iface: &str) -> Result<(), PortError> {
        Self::run("ip", &["link", "set", iface, "down"])?;
        Self::run("iw", &["dev", iface, "set", "type", "managed"])?;
        Self::run("ip", &["link", "set", iface, "up"])
    }

    fn set_channel(&self, iface: &str, channel: u8) -> Result<(), PortError> {
        Self::run("iw", &["dev", iface, "set", "channel", &channel.to_string()])
    }

    fn set_legacy_bitrate(&self, iface: &str) -> Result<(), PortError> {
        Self::run(
            "iw",
            &["dev", iface, "set", "bitrates", "legacy-2.4", "1"],
        )
    }

    fn interface_index(&self, iface: &str) -> Result<i32, PortError> {
        nix::net::if_::if_nametoindex(iface)
            .map(|idx| idx as i32)
            .map_err(|_| PortError::InterfaceNotFound(iface.to_string()))
    }
}

/// Compiled-in OUI prefix table. Deliberately small — a real deployment
/// swaps in a full IEEE registry adapter behind the same trait.
pub struct StaticOuiResolver;

static OUI_PREFIXES: &[([u8; 3], &str)] = &[
    ([0x00, 0x17, 0xF2], "Apple"),
    ([0xF0, 0x18, 0x98], "Apple"),
    ([0x3C, 0x22, 0xFB], "Apple"),
    ([0x00, 0x50, 0xF2], "Microsoft"),
    ([0x28, 0x16, 0xA8], "Microsoft"),
    ([0x00, 0x03, 0x7F], "Atheros"),
    ([0x00, 0x13, 0x10], "Cisco-Linksys"),
    ([0xC0, 0x56, 0x27], "Belkin"),
    ([0x14, 0x59, 0xC0], "Netgear"),
    ([0xA0, 0x40, 0xA0], "Netgear"),
    ([0x00, 0x1A, 0x2B], "Ayecom"),
    ([0xF4, 0xF2, 0x6D], "TP-Link"),
    ([0x50, 0xC7, 0xBF], "TP-Link"),
    ([0x04, 0x18, 0xD6], "Ubiquiti"),
    ([0x24, 0xA4, 0x3C], "Ubiquiti"),
    ([0xB4, 0xFB, 0xE4], "Ubiquiti"),
    ([0x00, 0x14, 0x6C], "Netgear"),
    ([0x8C, 0x3B, 0xAD], "Netgear"),
    ([0xB0, 0xB9, 0x8A], "Netgear"),
    ([0xE8, 0x9F, 0x80], "Belkin"),
    ([0x08, 0x86, 0x3B], "Belkin"),
    ([0xD8, 0x0D, 0x17], "TP-Link"),
    ([0x60, 0x32, 0xB1], "TP-Link"),
];

impl OuiResolver for StaticOuiResolver {
    fn lookup(&self, mac: &Mac) -> String {
        let oui = mac.oui();
        OUI_PREFIXES
            .iter()
            .find(|(prefix, _)| *prefix == oui)
            .map(|(_, vendor)| vendor.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Fixed coordinate supplied at construction (or none in mobile-less
/// deployments).
pub struct FixedLocationProvider(pub Option<(f64, f64)>);

impl LocationProvider for FixedLocationProvider {
    fn get_location(&self) -> Option<(f64, f64)> {
        self.0
    }
}

/// Accumulates bytes until `\n` or `\r`, yielding complete lines.
/// Oversized lines are discarded rather than grown without bound.
pub(crate) struct LineSplitter {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineSplitter {
    pub(crate) fn new(max_len: usize) -> LineSplitter {
        LineSplitter {
            buf: Vec::new(),
            max_len,
        }
    }

    pub(crate) fn feed(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' || byte == b'\r' {
            if self.buf.is_empty() {
                return None;
            }
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            return Some(line);
        }
        if self.buf.len() < self.max_len {
            self.buf.push(byte);
        } else {
            // Overflow — discard and reset.
            self.buf.clear();
        }
        None
    }

    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

fn spawn_line_pump<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 1024];
        let mut splitter = LineSplitter::new(4096);
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        if let Some(line) = splitter.feed(byte) {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
        if let Some(line) = splitter.flush() {
            let _ = tx.send(line);
        }
    });
}

/// Default runner backed by `tokio::process`.
pub struct TokioProcessRunner;

struct TokioChild {
    child: tokio::process::Child,
    pid: i32,
    lines: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ChildProcess for TokioChild {
    async fn read_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> Result<i32, PortError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    fn signal_group(&mut self, signal: i32) {
        if self.pid > 0 {
            // Negative pid addresses the whole process group.
            unsafe {
                libc::kill(-self.pid, signal);
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn_in_group(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<Box<dyn ChildProcess>, PortError> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        let mut child = command.spawn()?;
        let pid = child.id().map(|p| p as i32).unwrap_or(0);

        let (tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump(stderr, tx);
        }

        Ok(Box::new(TokioChild { child, pid, lines }))
    }
}

// ── Test mocks ─────────────────────────────────────────────────────────
