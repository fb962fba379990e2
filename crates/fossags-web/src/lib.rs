//! # fossags-web
//!
//! Captive portal web server for ground station provisioning.
//!
//! This crate provides:
//! - The portal routes: form page, form submission, captive probe pages
//! - [`HttpPortal`], a [`PortalTransport`](fossags_core::PortalTransport)
//!   that runs the routes on its own tokio runtime thread
//!
//! ## Architecture
//!
//! The provisioning session in `fossags-core` is synchronous. The HTTP side
//! is async and lives on a helper thread; submissions cross over through a
//! channel and rejected fields come back through the shared [`PortalState`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fossags_web::HttpPortal;
//!
//! let portal = HttpPortal::new("0.0.0.0:8080".parse()?);
//! let mut manager = ConfigManager::new(store, network, portal, settings);
//! manager.begin(false);
//! ```

pub mod portal;
pub mod routes;

// Re-exports
pub use portal::HttpPortal;
pub use routes::create_router;

use fossags_core::{FieldError, FormSubmission, PortalSpec};
use std::sync::mpsc::{SendError, Sender};
use std::sync::Arc;
use tokio::sync::RwLock;

/// State shared by the portal route handlers.
#[derive(Debug)]
pub struct PortalState {
    /// Portal being served, with the form prefill.
    pub spec: PortalSpec,
    /// Errors from the last rejected submission.
    pub errors: Vec<FieldError>,
    submissions: Sender<FormSubmission>,
}

impl PortalState {
    pub fn new(spec: PortalSpec, submissions: Sender<FormSubmission>) -> Self {
        Self {
            spec,
            errors: Vec::new(),
            submissions,
        }
    }

    /// Hand a submission to the provisioning session.
    pub fn submit(&self, submission: FormSubmission) -> Result<(), SendError<FormSubmission>> {
        self.submissions.send(submission)
    }

    /// The page for the current state.
    pub fn page(&self) -> String {
        self.spec.render(&self.errors)
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<RwLock<PortalState>>;
