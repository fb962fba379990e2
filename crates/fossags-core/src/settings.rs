//! Provisioning settings.
//!
//! Everything the config manager needs that is not part of the station
//! record itself. Every field has a default, so a settings file only has to
//! name what it overrides.

use crate::provisioning::PortalSpec;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default location of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/config.json";

/// Default name of the provisioning access point.
pub const DEFAULT_AP_SSID: &str = "FossaGroundStation";

/// Settings for loading, joining and provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Path of the configuration document inside the durable store.
    pub config_path: String,

    /// SSID of the provisioning access point.
    pub ap_ssid: String,

    /// WPA2 passphrase of the access point. `None` runs it open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap_password: Option<String>,

    /// Address of the device on the access point network.
    pub portal_ip: Ipv4Addr,

    /// How long to wait for a join with stored credentials.
    pub join_timeout_secs: u64,

    /// How long the portal waits for working credentials before giving up.
    pub portal_timeout_secs: u64,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            ap_ssid: DEFAULT_AP_SSID.to_string(),
            ap_password: None,
            portal_ip: Ipv4Addr::new(192, 168, 71, 1),
            join_timeout_secs: 10,
            portal_timeout_secs: 300,
        }
    }
}

impl ProvisioningSettings {
    /// Parse settings from JSON, filling anything missing with defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn portal_timeout(&self) -> Duration {
        Duration::from_secs(self.portal_timeout_secs)
    }

    /// Portal description without form values. The session fills those in
    /// from the record it provisions.
    pub fn portal_spec(&self) -> PortalSpec {
        PortalSpec {
            ap_ssid: self.ap_ssid.clone(),
            ap_password: self.ap_password.clone(),
            portal_ip: self.portal_ip,
            timeout: self.portal_timeout(),
            prefill: Vec::new(),
        }
    }
}
