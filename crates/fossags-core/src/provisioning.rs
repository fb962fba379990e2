//! Provisioning session.
//!
//! A session first tries to join the network stored in the record. If that is
//! not possible it brings up a captive portal and waits for the user to
//! submit a form whose WiFi credentials actually work:
//!
//! ```text
//! Idle -> Connecting -> Connected
//!              |
//!              v
//!        PortalActive <-> PortalEditing -> PortalSubmitted -> Connected
//!              |                                  |
//!              v                                  v
//!          TimedOut                         PortalActive (join failed)
//! ```
//!
//! The session works on a copy of the record. The copy only becomes the
//! outcome when the session ends connected.

use crate::error::{ConfigFault, PortalError};
use crate::form::{self, FieldError, FieldId, FormSubmission};
use crate::record::StationConfig;
use std::net::Ipv4Addr;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Joins a WiFi network as a station.
pub trait NetworkJoin {
    /// Try to join `ssid`, waiting at most `timeout`. Returns `true` once
    /// connected.
    fn join(&mut self, ssid: &str, password: &str, timeout: Duration) -> bool;

    fn is_connected(&self) -> bool;

    /// SSID of the network currently joined.
    fn current_ssid(&self) -> Option<String>;

    /// Passphrase used for the network currently joined.
    fn current_password(&self) -> Option<String>;
}

/// Serves the provisioning form on a soft access point.
pub trait PortalTransport {
    /// Bring up the access point and start serving the form.
    fn start(&mut self, spec: &PortalSpec) -> Result<(), PortalError>;

    /// Wait up to `timeout` for the next form submission.
    fn next_submission(&mut self, timeout: Duration)
        -> Result<Option<FormSubmission>, PortalError>;

    /// Show `errors` to the user on the next page load.
    fn reject(&mut self, errors: &[FieldError]);

    /// Tear down the server and the access point. Must tolerate being called
    /// when nothing is running.
    fn stop(&mut self);
}

/// Paths operating systems fetch to detect a captive portal. Transports
/// serve the form on all of them.
pub const CAPTIVE_PROBE_PATHS: [&str; 8] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/library/test/success.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/redirect",
    "/fwlink",
];

/// Everything a transport needs to bring up the portal.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSpec {
    pub ap_ssid: String,
    /// `None` for an open access point.
    pub ap_password: Option<String>,
    /// Address of the device on the portal network; DNS answers point here.
    pub portal_ip: Ipv4Addr,
    /// How long the portal stays up without a working submission.
    pub timeout: Duration,
    /// Initial form values.
    pub prefill: Vec<(FieldId, String)>,
}

impl PortalSpec {
    /// Render the form page with `errors` from the last rejected submission.
    pub fn render(&self, errors: &[FieldError]) -> String {
        form::render_form(&self.ap_ssid, &self.prefill, errors)
    }
}

/// Keeps a started portal alive. Dropping the guard stops the portal, on
/// every path out of the session including unwinding.
pub struct PortalGuard<'a, P: PortalTransport + ?Sized> {
    portal: &'a mut P,
}

impl<'a, P: PortalTransport + ?Sized> PortalGuard<'a, P> {
    /// Start `portal` and guard it.
    pub fn start(portal: &'a mut P, spec: &PortalSpec) -> Result<Self, PortalError> {
        portal.start(spec)?;
        Ok(Self { portal })
    }
}

impl<P: PortalTransport + ?Sized> Deref for PortalGuard<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.portal
    }
}

impl<P: PortalTransport + ?Sized> DerefMut for PortalGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.portal
    }
}

impl<P: PortalTransport + ?Sized> Drop for PortalGuard<'_, P> {
    fn drop(&mut self) {
        debug!("Stopping configuration portal");
        self.portal.stop();
    }
}

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    PortalActive,
    PortalEditing,
    PortalSubmitted,
    TimedOut,
}

fn enter(state: &mut SessionState, next: SessionState) {
    debug!(from = ?*state, to = ?next, "Provisioning state change");
    *state = next;
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub connected: bool,
    /// Set when the final record differs from the one the session started
    /// with.
    pub should_save: bool,
    pub record: StationConfig,
    pub state: SessionState,
    pub rejected_submissions: u32,
    pub failed_joins: u32,
}

/// One provisioning run over borrowed network and portal collaborators.
pub struct ProvisioningSession<'a, N: NetworkJoin, P: PortalTransport> {
    network: &'a mut N,
    portal: &'a mut P,
    spec: PortalSpec,
    join_timeout: Duration,
    state: SessionState,
    rejected_submissions: u32,
    failed_joins: u32,
}

impl<'a, N: NetworkJoin, P: PortalTransport> ProvisioningSession<'a, N, P> {
    pub fn new(
        network: &'a mut N,
        portal: &'a mut P,
        spec: PortalSpec,
        join_timeout: Duration,
    ) -> Self {
        Self {
            network,
            portal,
            spec,
            join_timeout,
            state: SessionState::Idle,
            rejected_submissions: 0,
            failed_joins: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        enter(&mut self.state, next);
    }

    /// Run the session for `record`.
    ///
    /// With `attempt_join` set and usable credentials in the record, a direct
    /// join is tried first. `on_ap_started` fires once the portal is up.
    pub fn run(
        &mut self,
        record: &StationConfig,
        attempt_join: bool,
        on_ap_started: &mut dyn FnMut(&PortalSpec),
    ) -> SessionOutcome {
        self.transition(SessionState::Connecting);

        if attempt_join && record.has_wifi_credentials() && self.join_stored(record) {
            self.transition(SessionState::Connected);
            return self.outcome(record, record.clone());
        }

        let draft = self.run_portal(record, on_ap_started);
        self.outcome(record, draft)
    }

    fn join_stored(&mut self, record: &StationConfig) -> bool {
        let ssid = record.wifi_ssid.as_str();

        if self.network.is_connected() && self.network.current_ssid().as_deref() == Some(ssid) {
            debug!(ssid, "Already connected");
            return true;
        }

        info!(ssid, "Connecting to stored network");
        if self
            .network
            .join(ssid, record.wifi_passphrase(), self.join_timeout)
        {
            info!(ssid, "Connected");
            true
        } else {
            self.failed_joins += 1;
            warn!(fault = %ConfigFault::JoinFailure(ssid.to_string()), "Stored credentials did not work");
            false
        }
    }

    /// Serve the portal until a submission joins or the window closes.
    /// Returns the accepted record, or `record` unchanged.
    fn run_portal(
        &mut self,
        record: &StationConfig,
        on_ap_started: &mut dyn FnMut(&PortalSpec),
    ) -> StationConfig {
        let spec = PortalSpec {
            prefill: form::prefill(record),
            ..self.spec.clone()
        };

        let mut portal = match PortalGuard::start(&mut *self.portal, &spec) {
            Ok(guard) => guard,
            Err(e) => {
                error!(error = %e, "Could not start configuration portal");
                enter(&mut self.state, SessionState::TimedOut);
                return record.clone();
            }
        };

        info!(ap = %spec.ap_ssid, ip = %spec.portal_ip, timeout_secs = spec.timeout.as_secs(), "Configuration portal started");
        on_ap_started(&spec);

        let state = &mut self.state;
        enter(state, SessionState::PortalActive);

        let deadline = Instant::now() + spec.timeout;
        let mut accepted = None;

        while accepted.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(fault = %ConfigFault::ProvisioningTimeout, "Configuration portal timed out");
                enter(state, SessionState::TimedOut);
                break;
            }

            let submission = match portal.next_submission(remaining) {
                Ok(Some(submission)) => submission,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Configuration portal failed");
                    enter(state, SessionState::TimedOut);
                    break;
                }
            };

            enter(state, SessionState::PortalEditing);
            let candidate = match form::validate(&submission, record) {
                Ok(candidate) => candidate,
                Err(errors) => {
                    self.rejected_submissions += 1;
                    for e in &errors {
                        debug!(field = %e.field, message = %e.message, "Rejected field");
                    }
                    portal.reject(&errors);
                    enter(state, SessionState::PortalActive);
                    continue;
                }
            };

            enter(state, SessionState::PortalSubmitted);
            let ssid = candidate.wifi_ssid.as_str();
            info!(ssid, "Trying submitted network");
            if self
                .network
                .join(ssid, candidate.wifi_passphrase(), self.join_timeout)
            {
                enter(state, SessionState::Connected);
                accepted = Some(candidate);
            } else {
                self.failed_joins += 1;
                warn!(fault = %ConfigFault::JoinFailure(ssid.to_string()), "Submitted credentials did not work");
                portal.reject(&[FieldError::new(
                    FieldId::WifiSsid,
                    format!("could not connect to {ssid}"),
                )]);
                enter(state, SessionState::PortalActive);
            }
        }

        drop(portal);

        match accepted {
            Some(mut draft) => {
                if let Some(ssid) = self.network.current_ssid() {
                    draft.wifi_ssid.set(&ssid);
                }
                if let Some(pass) = self.network.current_password() {
                    draft.wifi_pass.set(&pass);
                }
                draft
            }
            None => record.clone(),
        }
    }

    fn outcome(&self, start: &StationConfig, record: StationConfig) -> SessionOutcome {
        let connected = self.state == SessionState::Connected;
        SessionOutcome {
            connected,
            should_save: connected && record != *start,
            record,
            state: self.state,
            rejected_submissions: self.rejected_submissions,
            failed_joins: self.failed_joins,
        }
    }
}
