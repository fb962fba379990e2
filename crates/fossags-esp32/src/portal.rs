//! Captive portal on the ESP32 soft access point.
//!
//! [`EspCaptivePortal::start`] brings up the access point, registers the
//! form handlers on an [`EspHttpServer`] and opens the captive DNS socket.
//! HTTP handlers run on the server's task and hand submissions over a
//! channel; the DNS socket is polled from the session thread while it waits
//! for the next submission.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, Configuration},
};
use esp_idf_svc::http::server::{
    Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request,
};
use fossags_core::dns::{self, DNS_PORT};
use fossags_core::provisioning::CAPTIVE_PROBE_PATHS;
use fossags_core::{FieldError, FormSubmission, PortalError, PortalSpec, PortalTransport};
use log::{debug, info, warn};

use crate::wifi::{lock, SharedWifi};

const MAX_HTTP_BODY: usize = 2048;
const AP_CHANNEL: u8 = 1;
/// Longest wait on the submission channel between DNS polls.
const DNS_POLL_INTERVAL: Duration = Duration::from_millis(50);

const SUBMITTED_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
    <meta http-equiv=\"refresh\" content=\"15; url=/\"></head><body>\
    <p>Configuration received. Connecting to the WiFi network...</p>\
    </body></html>";

/// What the form handlers render.
struct Page {
    spec: PortalSpec,
    errors: Vec<FieldError>,
}

type SharedPage = Arc<Mutex<Page>>;

fn lock_page(page: &SharedPage) -> MutexGuard<'_, Page> {
    page.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Running {
    _server: EspHttpServer<'static>,
    dns: UdpSocket,
    page: SharedPage,
    submissions: Receiver<FormSubmission>,
    portal_ip: Ipv4Addr,
}

/// [`PortalTransport`] over the ESP-IDF soft AP and HTTP server.
pub struct EspCaptivePortal {
    wifi: SharedWifi,
    running: Option<Running>,
}

impl EspCaptivePortal {
    pub fn new(wifi: SharedWifi) -> Self {
        Self {
            wifi,
            running: None,
        }
    }

    fn start_access_point(&self, spec: &PortalSpec) -> anyhow::Result<()> {
        let (password, auth_method) = match spec.ap_password.as_deref() {
            Some(password) => (password, AuthMethod::WPA2Personal),
            None => ("", AuthMethod::None),
        };
        let ap = AccessPointConfiguration {
            ssid: spec
                .ap_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("access point SSID too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("access point password too long"))?,
            auth_method,
            channel: AP_CHANNEL,
            ..Default::default()
        };

        let mut wifi = lock(&self.wifi);
        let config = match wifi.get_configuration()? {
            Configuration::Client(client) | Configuration::Mixed(client, _)
                if !client.ssid.is_empty() =>
            {
                Configuration::Mixed(client, ap)
            }
            _ => Configuration::AccessPoint(ap),
        };
        wifi.set_configuration(&config)?;
        if !wifi.is_started()? {
            wifi.start()?;
        }
        wifi.wait_netif_up()?;

        let ip = wifi.wifi().ap_netif().get_ip_info()?.ip;
        if ip != spec.portal_ip {
            warn!(
                "Access point address {} differs from portal address {}",
                ip, spec.portal_ip
            );
        }
        info!("Access point '{}' started", spec.ap_ssid);
        Ok(())
    }

    fn try_start(&mut self, spec: &PortalSpec) -> anyhow::Result<Running> {
        self.start_access_point(spec)?;

        let page: SharedPage = Arc::new(Mutex::new(Page {
            spec: spec.clone(),
            errors: Vec::new(),
        }));
        let (tx, submissions) = mpsc::channel();
        let server = create_portal_server(page.clone(), tx, spec.portal_ip)?;

        let dns = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DNS_PORT)))
            .context("failed to bind captive DNS socket")?;
        dns.set_nonblocking(true)?;

        info!("Captive portal at http://{}/", spec.portal_ip);
        Ok(Running {
            _server: server,
            dns,
            page,
            submissions,
            portal_ip: spec.portal_ip,
        })
    }
}

impl PortalTransport for EspCaptivePortal {
    fn start(&mut self, spec: &PortalSpec) -> Result<(), PortalError> {
        self.stop();
        let running = self
            .try_start(spec)
            .map_err(|e| PortalError::Start(format!("{e:#}")))?;
        self.running = Some(running);
        Ok(())
    }

    fn next_submission(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<FormSubmission>, PortalError> {
        let running = self.running.as_ref().ok_or(PortalError::Closed)?;
        let deadline = Instant::now() + timeout;

        loop {
            answer_dns_queries(&running.dns, running.portal_ip);

            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(DNS_POLL_INTERVAL);
            match running.submissions.recv_timeout(wait) {
                Ok(submission) => return Ok(Some(submission)),
                Err(RecvTimeoutError::Disconnected) => return Err(PortalError::Closed),
                Err(RecvTimeoutError::Timeout) if Instant::now() >= deadline => return Ok(None),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn reject(&mut self, errors: &[FieldError]) {
        if let Some(running) = &self.running {
            lock_page(&running.page).errors = errors.to_vec();
        }
    }

    fn stop(&mut self) {
        // Dropping the server unregisters the handlers and closes the socket.
        if self.running.take().is_none() {
            return;
        }

        let mut wifi = lock(&self.wifi);
        let result = match wifi.get_configuration() {
            Ok(Configuration::Mixed(client, _)) => {
                wifi.set_configuration(&Configuration::Client(client))
            }
            Ok(Configuration::AccessPoint(_)) => wifi.stop(),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("Captive portal stopped"),
            Err(e) => warn!("Failed to shut down access point: {}", e),
        }
    }
}

impl Drop for EspCaptivePortal {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Answer every pending DNS query with the portal address.
fn answer_dns_queries(socket: &UdpSocket, portal_ip: Ipv4Addr) {
    let mut buf = [0u8; 512];
    while let Ok((len, peer)) = socket.recv_from(&mut buf) {
        let query = &buf[..len];
        if let Some(name) = dns::query_name(query) {
            debug!("DNS query for {} from {}", name, peer);
        }
        if let Some(response) = dns::captive_response(query, portal_ip) {
            let _ = socket.send_to(&response, peer);
        }
    }
}

fn create_portal_server(
    page: SharedPage,
    submissions: mpsc::Sender<FormSubmission>,
    portal_ip: Ipv4Addr,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for path in std::iter::once("/").chain(CAPTIVE_PROBE_PATHS) {
        let page = page.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            let html = {
                let page = lock_page(&page);
                page.spec.render(&page.errors)
            };
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(html.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let page = page.clone();
        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let submission = FormSubmission::from_urlencoded(
                std::str::from_utf8(&body).context("form body is not UTF-8")?,
            );
            info!("Form submitted with {} fields", submission.len());
            lock_page(&page).errors.clear();

            if submissions.send(submission).is_err() {
                req.into_response(503, Some("Service Unavailable"), &[])?
                    .write_all(b"Portal is closing")?;
                return Ok(());
            }

            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(SUBMITTED_PAGE.as_bytes())?;
            Ok(())
        })?;
    }

    // Registered last so the exact paths above win.
    let location = format!("http://{portal_ip}/");
    server.fn_handler::<anyhow::Error, _>("/*", Method::Get, move |req| {
        req.into_response(302, Some("Found"), &[("Location", location.as_str())])?;
        Ok(())
    })?;

    Ok(server)
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}
