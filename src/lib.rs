//! airwarden — 802.11 reconnaissance and offensive-testing engine.
//!
//! Passively captures radio frames across multiple monitor-mode
//! interfaces, reconstructs a live model of access points and
//! stations, detects security anomalies, and actively injects crafted
//! management frames. The engine exposes events and accepts commands
//! through narrow ports; dashboards, control planes, and persistence
//! are thin external adapters over those ports.
//!
//! Layering, leaves first:
//! - `codec` — pure byte-level 802.11 parsing and synthesis.
//! - `model` — devices, alerts, attack sessions, events.
//! - `capture` — workers, channel hoppers, lock arbiter, manager.
//! - `handler`, `handshake`, `registry`, `detect` — the passive
//!   pipeline from raw frames to device state and alerts.
//! - `inject` — the injector and attack engines.
//! - `ports` — collaborator traits with default implementations.
//! - `engine` — the facade wiring it all together.

pub mod capture;
pub mod codec;
pub mod config;
pub mod detect;
pub mod engine;
pub mod handler;
pub mod handshake;
pub mod inject;
pub mod model;
pub mod ports;
pub mod registry;

pub use config::Config;
pub use engine::{Collaborators, Engine};
