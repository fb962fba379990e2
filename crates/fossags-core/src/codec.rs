//! Configuration document codec.
//!
//! Converts between [`StationConfig`] and the JSON document kept in the
//! durable store. Loading is tolerant: a missing key, or a key holding the
//! wrong JSON type, leaves the field at its default. Only the set of required
//! keys decides whether the document counts as complete.

use crate::error::{ConfigFault, StoreError};
use crate::record::StationConfig;
use crate::store::{DurableStore, OpenMode};
use serde_json::{Map, Value};
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Largest document accepted by [`load`]. Anything bigger is malformed.
pub const MAX_DOCUMENT_SIZE: usize = 1024;

/// Keys that must be present for a document to be complete.
pub const REQUIRED_KEYS: [&str; 6] = [
    "station",
    "latitude",
    "longitude",
    "mqtt_server_name",
    "mqtt_port",
    "mqtt_user",
];

/// What [`load`] found in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    /// No document. Also the state after an interrupted save.
    Absent,
    /// Present but unreadable, oversize, not JSON, or not a JSON object.
    Malformed,
    /// Parsed into the record.
    Parsed {
        complete: bool,
        missing: Vec<&'static str>,
    },
}

/// Result of [`load`]: the record (defaults where nothing was loaded) and the
/// state of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub record: StationConfig,
    pub status: DocumentStatus,
}

impl LoadReport {
    /// True only for a parsed document with every required key.
    pub fn is_valid(&self) -> bool {
        matches!(self.status, DocumentStatus::Parsed { complete: true, .. })
    }

    /// The fault this load represents, if any.
    pub fn fault(&self) -> Option<ConfigFault> {
        match &self.status {
            DocumentStatus::Absent => None,
            DocumentStatus::Malformed => Some(ConfigFault::FormatFault),
            DocumentStatus::Parsed { complete: true, .. } => None,
            DocumentStatus::Parsed { missing, .. } => {
                Some(ConfigFault::IncompleteConfig(missing.clone()))
            }
        }
    }
}

/// Load the document at `path`.
///
/// With `load_wifi_data` unset the WiFi fields keep their defaults even if
/// the document has them. Never fails: every problem is reported through
/// [`DocumentStatus`].
pub fn load<S: DurableStore>(store: &S, path: &str, load_wifi_data: bool) -> LoadReport {
    let mut record = StationConfig::default();

    if !store.exists(path) {
        debug!(path, "No configuration document");
        return LoadReport {
            record,
            status: DocumentStatus::Absent,
        };
    }

    let bytes = match read_document(store, path) {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => {
            return LoadReport {
                record,
                status: DocumentStatus::Absent,
            }
        }
        Err(e) => {
            warn!(path, error = %e, "Failed to read configuration document");
            return LoadReport {
                record,
                status: DocumentStatus::Malformed,
            };
        }
    };

    if bytes.len() > MAX_DOCUMENT_SIZE {
        warn!(path, max = MAX_DOCUMENT_SIZE, "Configuration document too large");
        return LoadReport {
            record,
            status: DocumentStatus::Malformed,
        };
    }

    let map = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(path, "Configuration document is not a JSON object");
            return LoadReport {
                record,
                status: DocumentStatus::Malformed,
            };
        }
        Err(e) => {
            warn!(path, error = %e, "Failed to parse configuration document");
            return LoadReport {
                record,
                status: DocumentStatus::Malformed,
            };
        }
    };

    apply_document(&mut record, &map, load_wifi_data);

    let missing: Vec<&'static str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !map.contains_key(*key))
        .collect();

    LoadReport {
        record,
        status: DocumentStatus::Parsed {
            complete: missing.is_empty(),
            missing,
        },
    }
}

/// Read up to one byte past the size limit so oversize documents are caught
/// without reading them whole.
fn read_document<S: DurableStore>(store: &S, path: &str) -> Result<Vec<u8>, StoreError> {
    let handle = store.open(path, OpenMode::Read)?;
    let mut bytes = Vec::new();
    handle
        .take(MAX_DOCUMENT_SIZE as u64 + 1)
        .read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn apply_document(record: &mut StationConfig, map: &Map<String, Value>, load_wifi_data: bool) {
    let text = |key: &str| map.get(key).and_then(Value::as_str);
    let number = |key: &str| map.get(key).and_then(Value::as_f64);

    if let Some(station) = text("station") {
        record.station.set(station);
    }
    if let Some(latitude) = number("latitude") {
        record.latitude = latitude;
    }
    if let Some(longitude) = number("longitude") {
        record.longitude = longitude;
    }
    if let Some(server) = text("mqtt_server_name") {
        record.mqtt_server_name.set(server);
    }
    if let Some(port) = map
        .get("mqtt_port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
    {
        record.mqtt_port = port;
    }
    if let Some(user) = text("mqtt_user") {
        record.mqtt_user.set(user);
    }
    if let Some(pass) = text("mqtt_pass") {
        record.mqtt_pass.set(pass);
    }
    if let Some(tz) = text("tz") {
        record.tz.set(tz);
    }

    if load_wifi_data {
        if let Some(ssid) = text("wifi_ssid") {
            record.wifi_ssid.set(ssid);
        }
        if let Some(pass) = text("wifi_pass") {
            record.wifi_pass.set(pass);
        }
    }
}

/// Serialize a record to the document bytes.
pub fn encode(record: &StationConfig) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

/// Persist `record` at `path`, returning the number of bytes written.
///
/// Any previous document is removed before the new one is opened, so a
/// failure part way leaves no document at all rather than a stale one.
pub fn save<S: DurableStore>(
    store: &S,
    path: &str,
    record: &StationConfig,
) -> Result<usize, StoreError> {
    let bytes = encode(record).map_err(|e| StoreError::Io(e.into()))?;

    store.remove(path)?;
    let mut handle = store.open(path, OpenMode::Write)?;
    handle.write_all(&bytes)?;
    handle.flush()?;

    debug!(path, size = bytes.len(), "Configuration document written");
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::WIFI_SENTINEL;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    const PATH: &str = "/config.json";

    fn complete_document() -> Value {
        serde_json::json!({
            "station": "Base1",
            "latitude": 40.4,
            "longitude": -3.7,
            "mqtt_server_name": "mqtt.example.org",
            "mqtt_port": 8883,
            "mqtt_user": "base1",
            "mqtt_pass": "hunter2",
            "tz": "CET-1CEST,M3.5.0,M10.5.0/3",
            "wifi_ssid": "Home",
            "wifi_pass": "secret"
        })
    }

    fn store_with(doc: &Value) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(PATH, serde_json::to_vec(doc).unwrap());
        store
    }

    #[test]
    fn test_load_absent() {
        let store = MemoryStore::new();
        let report = load(&store, PATH, true);
        assert_eq!(report.status, DocumentStatus::Absent);
        assert_eq!(report.record, StationConfig::default());
        assert!(!report.is_valid());
        assert_eq!(report.fault(), None);
    }

    #[test]
    fn test_load_complete_document() {
        let store = store_with(&complete_document());
        let report = load(&store, PATH, true);

        assert!(report.is_valid());
        assert_eq!(report.record.station, "Base1");
        assert_eq!(report.record.latitude, 40.4);
        assert_eq!(report.record.longitude, -3.7);
        assert_eq!(report.record.mqtt_server_name, "mqtt.example.org");
        assert_eq!(report.record.mqtt_user, "base1");
        assert_eq!(report.record.tz, "CET-1CEST,M3.5.0,M10.5.0/3");
        assert_eq!(report.record.wifi_ssid, "Home");
        assert_eq!(report.record.wifi_pass, "secret");
    }

    #[test]
    fn test_missing_optional_keys_take_defaults() {
        const OPTIONAL: [&str; 4] = ["mqtt_pass", "tz", "wifi_ssid", "wifi_pass"];
        let full = load(&store_with(&complete_document()), PATH, true).record;
        let defaults = StationConfig::default();

        for mask in 0u8..(1 << OPTIONAL.len()) {
            let dropped: Vec<&str> = OPTIONAL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, key)| *key)
                .collect();

            let mut doc = complete_document();
            let map = doc.as_object_mut().unwrap();
            for key in &dropped {
                map.remove(*key);
            }

            let report = load(&store_with(&doc), PATH, true);
            assert!(report.is_valid(), "dropped {dropped:?}");

            let mut expected = full.clone();
            for key in &dropped {
                match *key {
                    "mqtt_pass" => expected.mqtt_pass = defaults.mqtt_pass,
                    "tz" => expected.tz = defaults.tz,
                    "wifi_ssid" => expected.wifi_ssid = defaults.wifi_ssid,
                    "wifi_pass" => expected.wifi_pass = defaults.wifi_pass,
                    _ => unreachable!(),
                }
            }
            assert_eq!(report.record, expected, "dropped {dropped:?}");
        }
    }

    #[test]
    fn test_missing_required_keys_reported() {
        let mut doc = complete_document();
        let map = doc.as_object_mut().unwrap();
        map.remove("station");
        map.remove("mqtt_user");
        let store = store_with(&doc);

        let report = load(&store, PATH, true);
        assert_eq!(
            report.status,
            DocumentStatus::Parsed {
                complete: false,
                missing: vec!["station", "mqtt_user"],
            }
        );
        assert!(!report.is_valid());
        assert_eq!(
            report.fault(),
            Some(ConfigFault::IncompleteConfig(vec!["station", "mqtt_user"]))
        );
        // Present keys still load.
        assert_eq!(report.record.mqtt_server_name, "mqtt.example.org");
    }

    #[test]
    fn test_wrong_type_falls_back_to_default() {
        let mut doc = complete_document();
        doc["mqtt_port"] = Value::from("8883");
        doc["latitude"] = Value::from("north");
        doc["station"] = Value::from(42);
        let store = store_with(&doc);

        let report = load(&store, PATH, true);
        assert!(report.is_valid());
        assert_eq!(report.record.mqtt_port, 8883);
        assert_eq!(report.record.latitude, 0.0);
        assert!(report.record.station.is_empty());
    }

    #[test]
    fn test_out_of_range_port_falls_back_to_default() {
        let mut doc = complete_document();
        doc["mqtt_port"] = Value::from(70000);
        let store = store_with(&doc);

        assert_eq!(load(&store, PATH, true).record.mqtt_port, 8883);
    }

    #[test]
    fn test_wifi_not_loaded_when_disabled() {
        let store = store_with(&complete_document());
        let report = load(&store, PATH, false);
        assert!(report.is_valid());
        assert_eq!(report.record.wifi_ssid, WIFI_SENTINEL);
        assert_eq!(report.record.wifi_pass, WIFI_SENTINEL);
        assert_eq!(report.record.station, "Base1");
    }

    #[test]
    fn test_malformed_documents() {
        let store = MemoryStore::new();

        store.insert(PATH, "{\"station\": ");
        assert_eq!(load(&store, PATH, true).status, DocumentStatus::Malformed);

        store.insert(PATH, "[1, 2, 3]");
        assert_eq!(load(&store, PATH, true).status, DocumentStatus::Malformed);

        let oversize = format!("{{\"station\":\"{}\"}}", "x".repeat(MAX_DOCUMENT_SIZE));
        store.insert(PATH, oversize);
        let report = load(&store, PATH, true);
        assert_eq!(report.status, DocumentStatus::Malformed);
        assert_eq!(report.fault(), Some(ConfigFault::FormatFault));
        assert_eq!(report.record, StationConfig::default());
    }

    #[test]
    fn test_long_values_truncated_on_load() {
        let mut doc = complete_document();
        doc["station"] = Value::from("a-very-long-station-name-indeed");
        let store = store_with(&doc);

        let report = load(&store, PATH, true);
        assert_eq!(report.record.station, "a-very-long-station-");
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let store = MemoryStore::new();
        let record = load(&store_with(&complete_document()), PATH, true).record;

        let written = save(&store, PATH, &record).unwrap();
        assert_eq!(written, store.contents(PATH).unwrap().len());

        let report = load(&store, PATH, true);
        assert!(report.is_valid());
        assert_eq!(report.record, record);
    }

    #[test]
    fn test_full_precision_coordinates_round_trip() {
        let store = MemoryStore::new();
        let base = load(&store_with(&complete_document()), PATH, true).record;

        // xorshift64 over [-180, 180]
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            let latitude = unit * 360.0 - 180.0;

            let record = StationConfig {
                latitude,
                longitude: -latitude / 3.0,
                ..base.clone()
            };
            save(&store, PATH, &record).unwrap();

            let back = load(&store, PATH, true).record;
            assert_eq!(back.latitude.to_bits(), record.latitude.to_bits());
            assert_eq!(back.longitude.to_bits(), record.longitude.to_bits());
        }

        // Values that need every significant digit.
        for latitude in [129.525883481094, 0.1 + 0.2, f64::EPSILON, -179.99999999999997] {
            let record = StationConfig {
                latitude,
                longitude: -latitude / 3.0,
                ..base.clone()
            };
            save(&store, PATH, &record).unwrap();
            assert_eq!(load(&store, PATH, true).record, record);
        }
    }

    #[test]
    fn test_save_writes_every_key() {
        let bytes = encode(&StationConfig::default()).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        for key in REQUIRED_KEYS
            .iter()
            .chain(["mqtt_pass", "tz", "wifi_ssid", "wifi_pass"].iter())
        {
            assert!(doc.get(*key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_failed_save_leaves_document_absent() {
        let store = store_with(&complete_document());
        store.fail_writes(true);

        let result = save(&store, PATH, &StationConfig::default());
        assert!(result.is_err());
        assert!(!store.exists(PATH));
        assert_eq!(load(&store, PATH, true).status, DocumentStatus::Absent);
    }
}
