//! Ground station firmware for ESP32
//!
//! This binary requires the ESP32 Rust toolchain.
//! It will not compile with the standard Rust toolchain.
//!
//! Boot sequence: mount SPIFFS, load the configuration, join WiFi or run the
//! captive portal, then either keep running or restart the chip as the
//! config manager asks. Holding the BOOT button while powering up forces the
//! portal with the stored WiFi credentials ignored.

use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::{PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop, hal::prelude::Peripherals, log::EspLogger,
    nvs::EspDefaultNvsPartition,
};
use fossags_core::{BootOutcome, ConfigManager, ProvisioningSettings};
use fossags_esp32::{wifi, EspCaptivePortal, EspNetwork, SpiffsStore};
use log::{error, info, warn};

/// Delay before restarting, so the last log lines and HTTP responses get out.
const RESTART_DELAY: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("FossaGS ground station starting...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut boot_button = PinDriver::input(peripherals.pins.gpio0)?;
    boot_button.set_pull(Pull::Up)?;
    let invalidate_config = boot_button.is_low();
    if invalidate_config {
        warn!("BOOT button held, forcing configuration portal");
    }

    let wifi = wifi::take_wifi(peripherals.modem, sysloop, nvs)?;

    let mut manager = ConfigManager::new(
        SpiffsStore::new(),
        EspNetwork::new(wifi.clone()),
        EspCaptivePortal::new(wifi),
        ProvisioningSettings::default(),
    )
    .on_format(|| warn!("SPIFFS mount failed, formatting flash"))
    .on_config_saved(|saved| {
        if saved {
            info!("Configuration saved");
        } else {
            error!("Configuration could not be saved");
        }
    })
    .on_ap_started(|spec| {
        info!(
            "Connect to WiFi '{}' and open http://{}/ to configure the station",
            spec.ap_ssid, spec.portal_ip
        );
    });

    match manager.begin(invalidate_config) {
        BootOutcome::Continue => {
            info!("Station '{}' online", manager.record().station);
        }
        BootOutcome::Restart(reason) => {
            warn!("Restarting: {}", reason);
            thread::sleep(RESTART_DELAY);
            unsafe { esp_idf_svc::sys::esp_restart() };
        }
    }

    // Keep the WiFi driver alive.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
