//! Station configuration record.
//!
//! The record is a fixed-layout structure: every text field lives in a
//! [`FixedStr`] buffer sized like the flash layout of the firmware, so a
//! record never grows and a write can never overflow a field.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// Buffer size (including NUL) of the station name.
pub const STATION_NAME_LENGTH: usize = 21;
/// Buffer size (including NUL) of the MQTT server host name.
pub const MQTT_SERVER_LENGTH: usize = 31;
/// Buffer size (including NUL) of the MQTT user name.
pub const MQTT_USER_LENGTH: usize = 31;
/// Buffer size (including NUL) of the MQTT password.
pub const MQTT_PASS_LENGTH: usize = 31;
/// Buffer size (including NUL) of the POSIX time zone string.
pub const TZ_LENGTH: usize = 40;
/// Buffer size (including NUL) of the WiFi SSID.
pub const SSID_LENGTH: usize = 33;
/// Buffer size (including NUL) of the WiFi passphrase.
pub const PASS_LENGTH: usize = 65;

/// MQTT port used when none is configured (TLS broker).
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// Value written to the WiFi fields to force re-provisioning.
///
/// Distinct from an empty field: empty means "never set", the sentinel
/// means "deliberately cleared".
pub const WIFI_SENTINEL: &str = "0";

/// A NUL-terminated string stored inline in `N` bytes.
///
/// At most `N - 1` bytes of text are kept. Longer input is truncated on a
/// character boundary, and input containing a NUL is cut at the NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    buf: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Maximum number of text bytes the buffer holds.
    pub const CAPACITY: usize = N - 1;

    /// Create an empty string.
    pub const fn new() -> Self {
        Self { buf: [0; N] }
    }

    /// Create a string from `s`, truncating if needed.
    pub fn truncating(s: &str) -> Self {
        let mut fixed = Self::new();
        fixed.set(s);
        fixed
    }

    /// Replace the contents with `s`.
    ///
    /// Returns `true` if the input had to be truncated.
    pub fn set(&mut self, s: &str) -> bool {
        let mut end = s.len().min(Self::CAPACITY);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &s.as_bytes()[..end];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        self.buf = [0; N];
        self.buf[..end].copy_from_slice(&bytes[..end]);
        end < s.len()
    }

    /// Clear to the empty string.
    pub fn clear(&mut self) {
        self.buf = [0; N];
    }

    /// View the contents up to the terminator.
    pub fn as_str(&self) -> &str {
        let len = self.len();
        // Only valid UTF-8 prefixes are ever copied in.
        std::str::from_utf8(&self.buf[..len]).unwrap_or_default()
    }

    /// Length of the text in bytes.
    pub fn len(&self) -> usize {
        self.buf.iter().position(|&b| b == 0).unwrap_or(Self::CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.buf[0] == 0
    }

    /// The raw backing buffer, terminator included.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len()]
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(s: &str) -> Self {
        Self::truncating(s)
    }
}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedStr<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Cow::<'de, str>::deserialize(deserializer)?;
        Ok(Self::truncating(&s))
    }
}

/// Operating configuration of a ground station.
///
/// One instance is owned by the config manager for the lifetime of a boot.
/// Field names double as the keys of the persisted JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationConfig {
    /// Station name shown on the network map.
    pub station: FixedStr<STATION_NAME_LENGTH>,

    /// Latitude in degrees. Published, so keep it to three decimals.
    pub latitude: f64,

    /// Longitude in degrees. Published, so keep it to three decimals.
    pub longitude: f64,

    pub mqtt_server_name: FixedStr<MQTT_SERVER_LENGTH>,

    pub mqtt_port: u16,

    pub mqtt_user: FixedStr<MQTT_USER_LENGTH>,

    pub mqtt_pass: FixedStr<MQTT_PASS_LENGTH>,

    /// POSIX TZ string, e.g. `CET-1CEST,M3.5.0,M10.5.0/3`.
    pub tz: FixedStr<TZ_LENGTH>,

    pub wifi_ssid: FixedStr<SSID_LENGTH>,

    pub wifi_pass: FixedStr<PASS_LENGTH>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station: FixedStr::new(),
            latitude: 0.0,
            longitude: 0.0,
            mqtt_server_name: FixedStr::new(),
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_user: FixedStr::new(),
            mqtt_pass: FixedStr::new(),
            tz: FixedStr::new(),
            wifi_ssid: FixedStr::truncating(WIFI_SENTINEL),
            wifi_pass: FixedStr::truncating(WIFI_SENTINEL),
        }
    }
}

impl StationConfig {
    /// Overwrite the WiFi credentials with the sentinel so the next join is
    /// skipped and the portal is required.
    pub fn clear_wifi(&mut self) {
        self.wifi_ssid.set(WIFI_SENTINEL);
        self.wifi_pass.set(WIFI_SENTINEL);
    }

    /// Whether the record carries credentials worth trying.
    pub fn has_wifi_credentials(&self) -> bool {
        !self.wifi_ssid.is_empty() && self.wifi_ssid != WIFI_SENTINEL
    }

    /// The WiFi passphrase to hand to the radio, with the sentinel mapped to
    /// an open network.
    pub fn wifi_passphrase(&self) -> &str {
        if self.wifi_pass == WIFI_SENTINEL {
            ""
        } else {
            self.wifi_pass.as_str()
        }
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "********"
    }
}

impl fmt::Display for StationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Station Name: {}", self.station)?;
        writeln!(f, "Latitude: {:.3}", self.latitude)?;
        writeln!(f, "Longitude: {:.3}", self.longitude)?;
        writeln!(f, "MQTT Server Name: {}", self.mqtt_server_name)?;
        writeln!(f, "MQTT Server Port: {}", self.mqtt_port)?;
        writeln!(f, "MQTT User: {}", self.mqtt_user)?;
        writeln!(f, "MQTT Password: {}", mask(self.mqtt_pass.as_str()))?;
        writeln!(f, "Time Zone: {}", self.tz)?;
        writeln!(f, "SSID: {}", self.wifi_ssid)?;
        write!(f, "Pass: {}", mask(self.wifi_pass.as_str()))
    }
}
