//! Captive portal transport backed by the axum routes.
//!
//! The provisioning session blocks on [`PortalTransport::next_submission`],
//! so the server runs on a dedicated thread with its own current-thread
//! tokio runtime. [`HttpPortal::stop`] shuts the server down gracefully and
//! joins the thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use fossags_core::{FieldError, FormSubmission, PortalError, PortalSpec, PortalTransport};
use tokio::sync::{oneshot, RwLock};

use crate::{create_router, AppState, PortalState};

/// Serves the provisioning form over HTTP.
///
/// On Linux there is no soft access point to bring up; the portal is just
/// the web server on `bind_addr`.
#[derive(Debug)]
pub struct HttpPortal {
    bind_addr: SocketAddr,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    state: AppState,
    submissions: Receiver<FormSubmission>,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl HttpPortal {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            running: None,
        }
    }

    /// Address the server is listening on, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl PortalTransport for HttpPortal {
    fn start(&mut self, spec: &PortalSpec) -> Result<(), PortalError> {
        self.stop();

        let listener = TcpListener::bind(self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PortalError::Start(format!("runtime: {e}")))?;

        let (tx, submissions) = mpsc::channel();
        let state: AppState = Arc::new(RwLock::new(PortalState::new(spec.clone(), tx)));
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = create_router(state.clone());

        let thread = std::thread::Builder::new()
            .name("captive-portal".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!("Portal listener setup failed: {}", e);
                            return;
                        }
                    };
                    let server = axum::serve(listener, app).with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    });
                    if let Err(e) = server.await {
                        tracing::error!("Portal server error: {}", e);
                    }
                });
            })?;

        tracing::info!(
            "Captive portal '{}' listening on http://{}",
            spec.ap_ssid,
            local_addr
        );

        self.running = Some(Running {
            state,
            submissions,
            shutdown,
            thread,
            local_addr,
        });
        Ok(())
    }

    fn next_submission(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<FormSubmission>, PortalError> {
        let running = self.running.as_ref().ok_or(PortalError::Closed)?;
        match running.submissions.recv_timeout(timeout) {
            Ok(submission) => Ok(Some(submission)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PortalError::Closed),
        }
    }

    fn reject(&mut self, errors: &[FieldError]) {
        if let Some(running) = &self.running {
            running.state.blocking_write().errors = errors.to_vec();
        }
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        if running.thread.join().is_err() {
            tracing::error!("Portal server thread panicked");
        }
        tracing::info!("Captive portal on {} stopped", running.local_addr);
    }
}

impl Drop for HttpPortal {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fossags_core::{FieldId, ProvisioningSettings};
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn started_portal() -> HttpPortal {
        let mut portal = HttpPortal::new("127.0.0.1:0".parse().unwrap());
        let mut spec = ProvisioningSettings::default().portal_spec();
        spec.prefill = vec![(FieldId::StationName, "Base1".to_string())];
        portal.start(&spec).unwrap();
        portal
    }

    fn send(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        send(
            addr,
            &format!("GET {path} HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n"),
        )
    }

    fn post(addr: SocketAddr, body: &str) -> String {
        send(
            addr,
            &format!(
                "POST /save HTTP/1.1\r\nHost: portal\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ),
        )
    }

    #[test]
    fn test_serves_form_until_stopped() {
        let mut portal = started_portal();
        let addr = portal.local_addr().unwrap();

        let page = get(addr, "/");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains("value=\"Base1\""));

        portal.stop();
        assert!(!portal.is_running());
        assert!(portal.local_addr().is_none());
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_submission_reaches_session() {
        let mut portal = started_portal();
        let addr = portal.local_addr().unwrap();

        let response = post(addr, "station_name=Base2&wifi_ssid=Home&wifi_pass=secret");
        assert!(response.starts_with("HTTP/1.1 200"));

        let submission = portal
            .next_submission(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(submission.get(FieldId::StationName), Some("Base2"));
        assert_eq!(submission.get(FieldId::WifiPass), Some("secret"));
    }

    #[test]
    fn test_no_submission_times_out() {
        let mut portal = started_portal();
        let result = portal.next_submission(Duration::from_millis(20)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_rejected_errors_rendered() {
        let mut portal = started_portal();
        let addr = portal.local_addr().unwrap();

        portal.reject(&[FieldError::new(FieldId::WifiSsid, "Could not join network")]);

        assert!(get(addr, "/").contains("Could not join network"));
    }

    #[test]
    fn test_stopped_portal_is_closed() {
        let mut portal = HttpPortal::new("127.0.0.1:0".parse().unwrap());
        portal.stop();
        portal.reject(&[]);

        let result = portal.next_submission(Duration::from_millis(1));
        assert!(matches!(result, Err(PortalError::Closed)));
    }

    #[test]
    fn test_restart_rebinds() {
        let mut portal = started_portal();
        let first = portal.local_addr().unwrap();

        let spec = ProvisioningSettings::default().portal_spec();
        portal.start(&spec).unwrap();
        let second = portal.local_addr().unwrap();

        assert!(get(second, "/").starts_with("HTTP/1.1 200"));
        if first != second {
            assert!(TcpStream::connect(first).is_err());
        }
    }

    #[test]
    fn test_bind_failure_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut portal = HttpPortal::new(taken.local_addr().unwrap());

        let result = portal.start(&ProvisioningSettings::default().portal_spec());

        assert!(matches!(result, Err(PortalError::Io(_))));
        assert!(!portal.is_running());
    }
}
