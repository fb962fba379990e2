//! Simulated WiFi for the host build.
//!
//! The access points "in range" come from a `ssid:pass,ssid:pass` list. A
//! join succeeds when the SSID is listed and the passphrase matches; an
//! entry without a colon is an open network.

use std::collections::HashMap;
use std::time::Duration;

use fossags_core::NetworkJoin;

#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    access_points: HashMap<String, String>,
    joined: Option<(String, String)>,
}

impl SimulatedNetwork {
    /// Parse a `ssid:pass,ssid:pass` list. Empty entries are skipped.
    pub fn from_list(list: &str) -> Self {
        let access_points = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((ssid, pass)) => (ssid.to_string(), pass.to_string()),
                None => (entry.to_string(), String::new()),
            })
            .collect();

        Self {
            access_points,
            joined: None,
        }
    }

    pub fn ssids(&self) -> impl Iterator<Item = &str> {
        self.access_points.keys().map(String::as_str)
    }
}

impl NetworkJoin for SimulatedNetwork {
    fn join(&mut self, ssid: &str, password: &str, _timeout: Duration) -> bool {
        let accepted = self.access_points.get(ssid).is_some_and(|p| p == password);
        if accepted {
            tracing::info!("Joined simulated network '{}'", ssid);
            self.joined = Some((ssid.to_string(), password.to_string()));
        } else {
            tracing::warn!("Simulated network '{}' rejected the credentials", ssid);
            self.joined = None;
        }
        accepted
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some()
    }

    fn current_ssid(&self) -> Option<String> {
        self.joined.as_ref().map(|(ssid, _)| ssid.clone())
    }

    fn current_password(&self) -> Option<String> {
        self.joined.as_ref().map(|(_, pass)| pass.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_list() {
        let network = SimulatedNetwork::from_list(" Home:secret, Cafe ,,Lab:a:b");
        let mut ssids: Vec<_> = network.ssids().collect();
        ssids.sort_unstable();
        assert_eq!(ssids, vec!["Cafe", "Home", "Lab"]);
    }

    #[test]
    fn test_join_checks_passphrase() {
        let mut network = SimulatedNetwork::from_list("Home:secret,Lab:a:b");

        assert!(!network.join("Home", "wrong", Duration::ZERO));
        assert!(!network.is_connected());

        assert!(network.join("Lab", "a:b", Duration::ZERO));
        assert!(network.join("Home", "secret", Duration::ZERO));
        assert_eq!(network.current_ssid().as_deref(), Some("Home"));
        assert_eq!(network.current_password().as_deref(), Some("secret"));
    }

    #[test]
    fn test_open_network() {
        let mut network = SimulatedNetwork::from_list("Cafe");
        assert!(network.join("Cafe", "", Duration::ZERO));
        assert!(!network.join("Unknown", "", Duration::ZERO));
    }
}
