//! airwarden — 802.11 reconnaissance and offensive-testing engine.
//!
//! Thin consumer of the library: read a JSON config, wire the default
//! collaborators, run the engine until ctrl-c. Dashboards and control
//! planes attach through the library ports, not here.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use airwarden::{Collaborators, Config, Engine};

fn load_config() -> Result<Config> {
    let path = std::env::args().nth(1).unwrap_or_default();
    if path.is_empty() {
        let mut config = Config::default();
        let iface = std::env::var("AIRWARDEN_IFACE").unwrap_or_else(|_| "wlan0".to_string());
        config.interfaces = iface.split(',').map(str::to_string).collect();
        return Ok(config);
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("shutdown requested");
        cancel.cancel();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let config = load_config()?;
    if config.interfaces.is_empty() {
        anyhow::bail!("no capture interfaces configured");
    }
    log::info!(
        "starting engine on {} (handshakes -> {})",
        config.interfaces.join(", "),
        config.handshake.handshake_dir
    );

    let engine = Engine::new(config, Collaborators::default_set());
    tokio::spawn(wait_for_shutdown(engine.cancellation_token()));

    engine.run().await.context("capture pipeline failed")?;
    log::info!("engine stopped");
    Ok(())
}
