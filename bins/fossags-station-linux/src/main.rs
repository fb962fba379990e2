//! Ground station provisioning simulator.
//!
//! Runs the same boot sequence as the firmware against a directory on disk,
//! a list of simulated WiFi networks and an HTTP captive portal. A restart
//! requested by the config manager becomes another pass of the boot loop.
//!
//! Environment:
//! - `FOSSAGS_DATA_DIR`: store root (default `./fossags-data`)
//! - `FOSSAGS_SETTINGS`: JSON file with provisioning settings
//! - `FOSSAGS_NETWORKS`: simulated networks, `ssid:pass,ssid:pass`
//! - `FOSSAGS_PORTAL_ADDR`: portal bind address (default `0.0.0.0:8080`)
//!
//! Pass `--reconfigure` to ignore the stored WiFi credentials on the first boot.

mod network;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use fossags_core::{BootOutcome, ConfigManager, FsStore, ProvisioningSettings};
use fossags_web::HttpPortal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use network::SimulatedNetwork;

const DEFAULT_DATA_DIR: &str = "./fossags-data";
const DEFAULT_PORTAL_ADDR: &str = "0.0.0.0:8080";

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fossags_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("FossaGS station simulator starting...");

    // Configuration
    let data_dir: PathBuf = std::env::var("FOSSAGS_DATA_DIR")
        .unwrap_or_else(|_| DEFAULT_DATA_DIR.into())
        .into();
    let portal_addr: SocketAddr = std::env::var("FOSSAGS_PORTAL_ADDR")
        .unwrap_or_else(|_| DEFAULT_PORTAL_ADDR.into())
        .parse()
        .context("invalid FOSSAGS_PORTAL_ADDR")?;
    let settings = load_settings()?;
    let networks =
        SimulatedNetwork::from_list(&std::env::var("FOSSAGS_NETWORKS").unwrap_or_default());
    let mut invalidate_config = std::env::args().skip(1).any(|arg| arg == "--reconfigure");

    tracing::info!("   Data dir:  {}", data_dir.display());
    tracing::info!("   Portal:    http://{}/", portal_addr);
    tracing::info!(
        "   Networks:  {}",
        networks.ssids().collect::<Vec<_>>().join(", ")
    );

    for boot in 1.. {
        tracing::info!("=== Boot #{} ===", boot);

        let mut manager = ConfigManager::new(
            FsStore::new(&data_dir),
            networks.clone(),
            HttpPortal::new(portal_addr),
            settings.clone(),
        )
        .on_format(|| tracing::warn!("Store mount failed, formatting"))
        .on_config_saved(|saved| tracing::info!("Configuration saved: {}", saved))
        .on_ap_started(move |spec| {
            tracing::info!(
                "Portal '{}' is up, open http://{}/ to configure",
                spec.ap_ssid,
                portal_addr
            );
        });

        match manager.begin(invalidate_config) {
            BootOutcome::Continue => {
                tracing::info!("🚀 Station '{}' online", manager.record().station);
                tracing::info!("{}", manager.record());
                break;
            }
            BootOutcome::Restart(reason) => {
                tracing::warn!("Simulated restart: {}", reason);
                invalidate_config = false;
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn load_settings() -> anyhow::Result<ProvisioningSettings> {
    let Ok(path) = std::env::var("FOSSAGS_SETTINGS") else {
        return Ok(ProvisioningSettings::default());
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings from {path}"))?;
    let settings = ProvisioningSettings::from_json(&text)
        .with_context(|| format!("invalid settings in {path}"))?;
    tracing::info!("Loaded settings from {}", path);
    Ok(settings)
}
