//! WiFi station join for ESP32.
//!
//! [`EspNetwork`] joins the configured network with a bounded wait. When the
//! captive portal's access point is up, the join switches the driver to mixed
//! mode so the portal keeps serving while the station connects.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use fossags_core::NetworkJoin;
use log::{info, warn};

/// WiFi driver shared by the station join and the captive portal.
pub type SharedWifi = Arc<Mutex<BlockingWifi<EspWifi<'static>>>>;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Take the modem and wrap it in a shared blocking driver.
pub fn take_wifi(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<SharedWifi> {
    let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
    let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
    Ok(Arc::new(Mutex::new(wifi)))
}

pub(crate) fn lock(wifi: &SharedWifi) -> MutexGuard<'_, BlockingWifi<EspWifi<'static>>> {
    wifi.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Station configuration for `ssid`. An empty password joins an open network.
pub(crate) fn client_configuration(ssid: &str, password: &str) -> Result<ClientConfiguration> {
    let auth_method = if password.is_empty() {
        info!("WiFi password is empty, using open network");
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    Ok(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    })
}

/// [`NetworkJoin`] over the ESP-IDF WiFi driver.
pub struct EspNetwork {
    wifi: SharedWifi,
    /// Credentials of the last successful join.
    joined: Option<(String, String)>,
}

impl EspNetwork {
    pub fn new(wifi: SharedWifi) -> Self {
        Self { wifi, joined: None }
    }

    fn try_join(&mut self, ssid: &str, password: &str, timeout: Duration) -> Result<()> {
        let client = client_configuration(ssid, password)?;
        let mut wifi = lock(&self.wifi);

        let config = match wifi.get_configuration()? {
            Configuration::AccessPoint(ap) | Configuration::Mixed(_, ap) => {
                Configuration::Mixed(client, ap)
            }
            _ => Configuration::Client(client),
        };

        if wifi.is_connected()? {
            let _ = wifi.wifi_mut().disconnect();
        }
        wifi.set_configuration(&config)?;
        if !wifi.is_started()? {
            wifi.start()?;
        }

        info!("Connecting to '{}'...", ssid);
        wifi.wifi_mut().connect()?;

        let deadline = Instant::now() + timeout;
        loop {
            if wifi.is_connected()? && wifi.wifi().sta_netif().is_up()? {
                let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
                info!("WiFi connected!");
                info!("  IP address: {}", ip_info.ip);
                info!("  Gateway:    {}", ip_info.subnet.gateway);
                return Ok(());
            }
            if Instant::now() >= deadline {
                let _ = wifi.wifi_mut().disconnect();
                return Err(anyhow!("no connection within {:?}", timeout));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
    }
}

impl NetworkJoin for EspNetwork {
    fn join(&mut self, ssid: &str, password: &str, timeout: Duration) -> bool {
        match self.try_join(ssid, password, timeout) {
            Ok(()) => {
                self.joined = Some((ssid.to_string(), password.to_string()));
                true
            }
            Err(e) => {
                warn!("Joining '{}' failed: {:#}", ssid, e);
                self.joined = None;
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.wifi).is_connected().unwrap_or(false)
    }

    fn current_ssid(&self) -> Option<String> {
        self.joined
            .as_ref()
            .filter(|_| self.is_connected())
            .map(|(ssid, _)| ssid.clone())
    }

    fn current_password(&self) -> Option<String> {
        self.joined
            .as_ref()
            .filter(|_| self.is_connected())
            .map(|(_, password)| password.clone())
    }
}
