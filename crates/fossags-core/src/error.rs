//! Error types shared across the configuration components.
//!
//! Three layers exist:
//! - [`StoreError`] is what a [`DurableStore`](crate::store::DurableStore)
//!   implementation returns for a failed filesystem operation.
//! - [`PortalError`] is what a
//!   [`PortalTransport`](crate::provisioning::PortalTransport) returns when
//!   the captive portal cannot be brought up or stops serving.
//! - [`ConfigFault`] is the fault taxonomy the config manager reports. All
//!   faults except [`ConfigFault::ProvisioningTimeout`] are absorbed with a
//!   fallback value.

use thiserror::Error;

/// Errors returned by durable store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying flash filesystem could not be initialized.
    #[error("Failed to mount store: {0}")]
    MountFailed(String),

    /// Formatting the filesystem failed.
    #[error("Failed to format store: {0}")]
    FormatFailed(String),

    /// The requested document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A document could not be opened in the requested mode.
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Read or write on an open document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by captive portal transports.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The access point or the HTTP server could not be started.
    #[error("Failed to start portal: {0}")]
    Start(String),

    /// The portal stopped delivering submissions.
    #[error("Portal closed")]
    Closed,

    #[error("Portal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fault classes recognised by the configuration manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigFault {
    /// Mount, open or write failure on the durable store.
    #[error("Storage fault: {0}")]
    StorageFault(String),

    /// A document is present but cannot be parsed.
    #[error("Configuration document is malformed")]
    FormatFault,

    /// The document parsed but required keys are missing.
    #[error("Configuration is incomplete, missing: {}", .0.join(", "))]
    IncompleteConfig(Vec<&'static str>),

    /// Network credentials were rejected or the network is unreachable.
    #[error("Could not join network {0:?}")]
    JoinFailure(String),

    /// No working credentials were obtained within the portal window.
    #[error("Provisioning timed out without connectivity")]
    ProvisioningTimeout,
}

impl ConfigFault {
    /// Whether this fault forces a restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfigFault::ProvisioningTimeout)
    }
}

impl From<StoreError> for ConfigFault {
    fn from(err: StoreError) -> Self {
        ConfigFault::StorageFault(err.to_string())
    }
}
