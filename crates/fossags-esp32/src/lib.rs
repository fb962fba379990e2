//! ESP32-specific components for the ground station.
//!
//! This crate implements the `fossags-core` platform traits on ESP-IDF:
//! - [`SpiffsStore`]: the configuration document on the SPIFFS partition
//! - [`EspNetwork`]: WiFi station join
//! - [`EspCaptivePortal`]: soft access point, form server and captive DNS
//!
//! # Architecture
//!
//! The WiFi driver is shared between the station join and the captive portal,
//! since joining a network submitted through the portal happens while the
//! access point is still up (mixed mode). Both hold a [`SharedWifi`].
//!
//! # Example
//!
//! ```ignore
//! use fossags_esp32::{wifi, EspCaptivePortal, EspNetwork, SpiffsStore};
//!
//! let wifi = wifi::take_wifi(peripherals.modem, sysloop, nvs)?;
//! let mut manager = ConfigManager::new(
//!     SpiffsStore::new(),
//!     EspNetwork::new(wifi.clone()),
//!     EspCaptivePortal::new(wifi),
//!     ProvisioningSettings::default(),
//! );
//! ```

pub mod portal;
pub mod storage;
pub mod wifi;

pub use portal::EspCaptivePortal;
pub use storage::SpiffsStore;
pub use wifi::{EspNetwork, SharedWifi};
