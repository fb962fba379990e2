//! # fossags-core
//!
//! Configuration persistence and provisioning for the ground station.
//!
//! This crate provides:
//! - The station configuration record ([`StationConfig`])
//! - A durable store abstraction with in-memory and filesystem backends
//! - The JSON document codec, tolerant of missing keys
//! - The provisioning form schema and validation
//! - The provisioning session state machine and the config manager
//! - Captive portal DNS answers
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and ESP32 (esp-idf) targets.

pub mod codec;
pub mod dns;
pub mod error;
pub mod form;
pub mod fs_store;
pub mod manager;
pub mod provisioning;
pub mod record;
pub mod settings;
pub mod store;

pub use codec::{DocumentStatus, LoadReport};
pub use error::{ConfigFault, PortalError, StoreError};
pub use form::{FieldError, FieldId, FormSubmission};
pub use fs_store::FsStore;
pub use manager::{BootOutcome, ConfigManager, RestartReason};
pub use provisioning::{
    NetworkJoin, PortalGuard, PortalSpec, PortalTransport, ProvisioningSession, SessionOutcome,
    SessionState,
};
pub use record::{FixedStr, StationConfig, WIFI_SENTINEL};
pub use settings::ProvisioningSettings;
pub use store::{DurableStore, MemoryStore, OpenMode};
