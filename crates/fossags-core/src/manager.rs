//! Config manager.
//!
//! Runs the boot sequence: mount the store, load the record, join with the
//! stored credentials or provision through the captive portal, persist what
//! changed and tell the caller whether to keep running or restart.
//!
//! The manager never restarts the device itself. The binary acts on the
//! returned [`BootOutcome`].

use crate::codec::{self, DocumentStatus};
use crate::error::{ConfigFault, StoreError};
use crate::provisioning::{NetworkJoin, PortalSpec, PortalTransport, ProvisioningSession};
use crate::record::StationConfig;
use crate::settings::ProvisioningSettings;
use crate::store::DurableStore;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Why the device must restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The portal closed without working credentials.
    ProvisioningTimeout,
    /// New values were saved and take effect on the next boot.
    ConfigSaved,
    /// New values could not be saved.
    SaveFailed,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::ProvisioningTimeout => write!(f, "provisioning timed out"),
            RestartReason::ConfigSaved => write!(f, "configuration saved"),
            RestartReason::SaveFailed => write!(f, "configuration could not be saved"),
        }
    }
}

/// Result of [`ConfigManager::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Connected with a configuration that needs no saving.
    Continue,
    /// The caller should restart the device.
    Restart(RestartReason),
}

impl BootOutcome {
    /// Whether the station can carry on with this boot.
    pub fn is_running(&self) -> bool {
        matches!(self, BootOutcome::Continue)
    }
}

type FormatCallback = Box<dyn FnMut()>;
type SavedCallback = Box<dyn FnMut(bool)>;
type ApStartedCallback = Box<dyn FnMut(&PortalSpec)>;

/// Optional hooks fired during the boot sequence.
#[derive(Default)]
pub struct Notifiers {
    on_format: Option<FormatCallback>,
    on_config_saved: Option<SavedCallback>,
    on_ap_started: Option<ApStartedCallback>,
}

impl fmt::Debug for Notifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifiers")
            .field("on_format", &self.on_format.is_some())
            .field("on_config_saved", &self.on_config_saved.is_some())
            .field("on_ap_started", &self.on_ap_started.is_some())
            .finish()
    }
}

/// Owns the station record and its collaborators for one boot.
pub struct ConfigManager<S: DurableStore, N: NetworkJoin, P: PortalTransport> {
    store: S,
    network: N,
    portal: P,
    settings: ProvisioningSettings,
    record: StationConfig,
    notifiers: Notifiers,
}

impl<S: DurableStore, N: NetworkJoin, P: PortalTransport> ConfigManager<S, N, P> {
    pub fn new(store: S, network: N, portal: P, settings: ProvisioningSettings) -> Self {
        Self {
            store,
            network,
            portal,
            settings,
            record: StationConfig::default(),
            notifiers: Notifiers::default(),
        }
    }

    /// Called before the store is formatted after a failed mount.
    pub fn on_format(mut self, callback: impl FnMut() + 'static) -> Self {
        self.notifiers.on_format = Some(Box::new(callback));
        self
    }

    /// Called after a save attempt with whether it succeeded.
    pub fn on_config_saved(mut self, callback: impl FnMut(bool) + 'static) -> Self {
        self.notifiers.on_config_saved = Some(Box::new(callback));
        self
    }

    /// Called once the configuration portal is up.
    pub fn on_ap_started(mut self, callback: impl FnMut(&PortalSpec) + 'static) -> Self {
        self.notifiers.on_ap_started = Some(Box::new(callback));
        self
    }

    pub fn record(&self) -> &StationConfig {
        &self.record
    }

    pub fn into_record(self) -> StationConfig {
        self.record
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    /// Run the boot sequence.
    ///
    /// With `invalidate_config` set, stored WiFi credentials are ignored and
    /// the portal always opens.
    pub fn begin(&mut self, invalidate_config: bool) -> BootOutcome {
        self.mount_store();

        let path = self.settings.config_path.as_str();
        let report = codec::load(&self.store, path, !invalidate_config);
        match &report.status {
            DocumentStatus::Absent => info!(path, "No configuration found"),
            DocumentStatus::Parsed { complete: true, .. } => info!(path, "Configuration loaded"),
            _ => {
                if let Some(fault) = report.fault() {
                    warn!(path, %fault, "Configuration not usable");
                }
            }
        }

        let valid = report.is_valid();
        self.record = report.record;
        if !valid {
            self.record.clear_wifi();
        }
        debug!("==== Configuration ====\n{}", self.record);

        let attempt_join = valid && !invalidate_config;
        let mut session = ProvisioningSession::new(
            &mut self.network,
            &mut self.portal,
            self.settings.portal_spec(),
            self.settings.join_timeout(),
        );
        let ap_started = &mut self.notifiers.on_ap_started;
        let outcome = session.run(&self.record, attempt_join, &mut |spec: &PortalSpec| {
            if let Some(callback) = ap_started.as_mut() {
                callback(spec);
            }
        });

        if !outcome.connected {
            error!(fault = %ConfigFault::ProvisioningTimeout, "No network connection");
            return BootOutcome::Restart(RestartReason::ProvisioningTimeout);
        }

        self.record = outcome.record;

        if !outcome.should_save {
            info!("Connected, configuration unchanged");
            return BootOutcome::Continue;
        }

        let saved = match codec::save(&self.store, path, &self.record) {
            Ok(size) => {
                info!(path, size, "Configuration saved");
                true
            }
            Err(e) => {
                error!(path, error = %e, "Failed to save configuration");
                false
            }
        };
        if let Some(callback) = self.notifiers.on_config_saved.as_mut() {
            callback(saved);
        }

        if saved {
            BootOutcome::Restart(RestartReason::ConfigSaved)
        } else {
            BootOutcome::Restart(RestartReason::SaveFailed)
        }
    }

    /// Mount, formatting and remounting once if the first mount fails.
    /// Failures are logged; loads then see no document.
    fn mount_store(&mut self) {
        let Err(e) = self.store.mount() else {
            return;
        };
        warn!(error = %e, "Failed to mount store, formatting");

        if let Some(callback) = self.notifiers.on_format.as_mut() {
            callback();
        }
        if let Err(e) = self.store.format() {
            error!(error = %e, "Failed to format store");
            return;
        }
        if let Err(e) = self.store.mount() {
            error!(error = %e, "Failed to mount store after format");
        }
    }

    /// Delete the persisted document and forget the WiFi credentials.
    pub fn erase_config(&mut self) -> Result<(), StoreError> {
        self.record.clear_wifi();
        self.store.remove(&self.settings.config_path)?;
        info!(path = %self.settings.config_path, "Configuration erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::testing::{submission, FakeNetwork, ScriptedPortal};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn settings() -> ProvisioningSettings {
        ProvisioningSettings {
            join_timeout_secs: 0,
            portal_timeout_secs: 0,
            ..Default::default()
        }
    }

    fn manager(
        store: &MemoryStore,
        network: FakeNetwork,
        portal: ScriptedPortal,
    ) -> ConfigManager<MemoryStore, FakeNetwork, ScriptedPortal> {
        ConfigManager::new(store.clone(), network, portal, settings())
    }

    fn saved_document(store: &MemoryStore) -> MemoryStore {
        let record = StationConfig {
            station: "Base1".into(),
            latitude: 40.4,
            longitude: -3.7,
            mqtt_server_name: "mqtt.example.org".into(),
            mqtt_user: "base1".into(),
            mqtt_pass: "hunter2".into(),
            wifi_ssid: "Home".into(),
            wifi_pass: "secret".into(),
            ..Default::default()
        };
        codec::save(store, "/config.json", &record).unwrap();
        store.clone()
    }

    #[test]
    fn test_boot_with_working_config_continues() {
        let store = saved_document(&MemoryStore::new());
        let mut manager = manager(
            &store,
            FakeNetwork::default().with_network("Home", "secret"),
            ScriptedPortal::default(),
        );

        let outcome = manager.begin(false);

        assert_eq!(outcome, BootOutcome::Continue);
        assert!(outcome.is_running());
        assert_eq!(manager.record().station, "Base1");
    }

    #[test]
    fn test_timeout_restarts() {
        let store = MemoryStore::new();
        let mut manager = manager(&store, FakeNetwork::default(), ScriptedPortal::default());

        let outcome = manager.begin(false);

        assert_eq!(
            outcome,
            BootOutcome::Restart(RestartReason::ProvisioningTimeout)
        );
        assert!(!outcome.is_running());
        assert!(!store.exists("/config.json"));
    }

    #[test]
    fn test_invalidate_ignores_stored_wifi() {
        let store = saved_document(&MemoryStore::new());
        let mut manager = manager(
            &store,
            FakeNetwork::default().with_network("Home", "secret"),
            ScriptedPortal::default(),
        );

        let outcome = manager.begin(true);

        assert_eq!(
            outcome,
            BootOutcome::Restart(RestartReason::ProvisioningTimeout)
        );
        assert!(manager.network().join_attempts.is_empty());
        assert_eq!(manager.record().wifi_ssid, "0");
    }

    #[test]
    fn test_save_failure_restarts_and_notifies() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let saved = Rc::new(RefCell::new(Vec::new()));
        let seen = saved.clone();

        let mut manager = manager(
            &store,
            FakeNetwork::default().with_network("Home", "secret"),
            ScriptedPortal::default().submit(submission("Home", "secret")),
        )
        .on_config_saved(move |ok| seen.borrow_mut().push(ok));
        manager.settings.portal_timeout_secs = 5;

        let outcome = manager.begin(false);

        assert_eq!(outcome, BootOutcome::Restart(RestartReason::SaveFailed));
        assert_eq!(*saved.borrow(), vec![false]);
        // New values still apply to this boot.
        assert_eq!(manager.record().station, "Base1");
    }

    #[test]
    fn test_mount_failure_formats_and_remounts() {
        let store = MemoryStore::new().fail_mount(1);
        let formatted = Rc::new(RefCell::new(0));
        let count = formatted.clone();
        let mut manager = manager(&store, FakeNetwork::default(), ScriptedPortal::default())
            .on_format(move || *count.borrow_mut() += 1);

        manager.begin(false);

        assert_eq!(*formatted.borrow(), 1);
        assert_eq!(store.format_calls(), 1);
        assert_eq!(store.mount_calls(), 2);
        assert!(store.is_mounted());
    }

    #[test]
    fn test_format_failure_continues_boot() {
        let store = MemoryStore::new().fail_mount(2).fail_format();
        let mut manager = manager(
            &store,
            FakeNetwork::default().with_network("Home", "secret"),
            ScriptedPortal::default().submit(submission("Home", "secret")),
        );
        manager.settings.portal_timeout_secs = 5;

        let outcome = manager.begin(false);

        assert_eq!(store.mount_calls(), 1);
        assert_eq!(outcome, BootOutcome::Restart(RestartReason::ConfigSaved));
    }

    #[test]
    fn test_ap_started_notifier() {
        let store = MemoryStore::new();
        let started = Rc::new(RefCell::new(Vec::new()));
        let seen = started.clone();
        let mut manager = manager(&store, FakeNetwork::default(), ScriptedPortal::default())
            .on_ap_started(move |spec| seen.borrow_mut().push(spec.ap_ssid.clone()));

        manager.begin(false);

        assert_eq!(*started.borrow(), vec!["FossaGroundStation".to_string()]);
    }

    #[test]
    fn test_erase_config() {
        let store = saved_document(&MemoryStore::new());
        let mut manager = manager(
            &store,
            FakeNetwork::default().with_network("Home", "secret"),
            ScriptedPortal::default(),
        );
        assert!(manager.begin(false).is_running());

        manager.erase_config().unwrap();

        assert!(!store.exists("/config.json"));
        assert!(!manager.record().has_wifi_credentials());
        assert_eq!(manager.into_record().station, "Base1");
    }
}
