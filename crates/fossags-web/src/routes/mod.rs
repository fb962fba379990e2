//! HTTP route handlers for the captive portal.
//!
//! # Endpoints
//!
//! ### `GET /`
//! The provisioning form, prefilled from the stored record, with the errors
//! of the last rejected submission.
//!
//! ### `POST /save`
//! Form submission (`application/x-www-form-urlencoded`). The fields are
//! handed to the provisioning session, which validates them and tries the
//! WiFi join.
//!
//! ### Captive probes
//! The connectivity check paths in [`CAPTIVE_PROBE_PATHS`] serve the form so
//! clients pop up their portal login window. Anything else redirects to `/`.

use std::collections::HashMap;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use fossags_core::provisioning::CAPTIVE_PROBE_PATHS;
use fossags_core::FormSubmission;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Largest accepted form body. The longest valid submission is well under
/// this.
pub const MAX_FORM_BODY: usize = 2048;

const SUBMITTED_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
    <meta http-equiv=\"refresh\" content=\"15; url=/\"></head><body>\
    <p>Configuration received. Connecting to the WiFi network...</p>\
    <p>If the station does not restart, the form will reload with the problem.</p>\
    </body></html>";

/// Create the portal router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(form_page))
        .route("/save", get(form_page).post(save_handler));

    for path in CAPTIVE_PROBE_PATHS {
        router = router.route(path, get(form_page));
    }

    router
        .fallback(redirect_to_form)
        .layer(DefaultBodyLimit::max(MAX_FORM_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for `GET /` and the captive probe paths.
async fn form_page(State(state): State<AppState>) -> Html<String> {
    let state = state.read().await;
    Html(state.page())
}

/// Handler for `POST /save`.
async fn save_handler(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let submission = FormSubmission::from(fields);
    tracing::info!("Form submitted with {} fields", submission.len());

    let mut state = state.write().await;
    // Errors belong to the previous attempt.
    state.errors.clear();

    match state.submit(submission) {
        Ok(()) => Html(SUBMITTED_PAGE).into_response(),
        Err(_) => {
            tracing::warn!("Provisioning session is gone, dropping submission");
            (StatusCode::SERVICE_UNAVAILABLE, "Portal is closing").into_response()
        }
    }
}

async fn redirect_to_form() -> Redirect {
    Redirect::temporary("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortalState;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use fossags_core::{FieldError, FieldId, ProvisioningSettings};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn test_state() -> (AppState, mpsc::Receiver<FormSubmission>) {
        let (tx, rx) = mpsc::channel();
        let mut spec = ProvisioningSettings::default().portal_spec();
        spec.prefill = vec![(FieldId::StationName, "Base1".to_string())];
        (Arc::new(RwLock::new(PortalState::new(spec, tx))), rx)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_form_page_is_prefilled() {
        let (state, _rx) = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("action=\"/save\""));
        assert!(html.contains("value=\"Base1\""));
    }

    #[tokio::test]
    async fn test_probe_paths_serve_form() {
        let (state, _rx) = test_state();
        let app = create_router(state);

        for path in CAPTIVE_PROBE_PATHS {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_unknown_path_redirects_to_form() {
        let (state, _rx) = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/favicon.ico").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn test_save_forwards_submission() {
        let (state, rx) = test_state();
        state
            .write()
            .await
            .errors
            .push(FieldError::new(FieldId::Latitude, "stale"));
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::post("/save")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("station_name=Base+2&lat=40.4&wifi_ssid=My%20Home"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let submission = rx.try_recv().unwrap();
        assert_eq!(submission.get(FieldId::StationName), Some("Base 2"));
        assert_eq!(submission.get(FieldId::Latitude), Some("40.4"));
        assert_eq!(submission.get(FieldId::WifiSsid), Some("My Home"));
        assert!(state.read().await.errors.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_errors_shown_on_reload() {
        let (state, _rx) = test_state();
        state
            .write()
            .await
            .errors
            .push(FieldError::new(FieldId::Latitude, "Latitude out of range"));
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(body_text(response).await.contains("Latitude out of range"));
    }

    #[tokio::test]
    async fn test_save_after_session_ended() {
        let (state, rx) = test_state();
        drop(rx);
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::post("/save")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("station_name=Base1"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (state, rx) = test_state();
        let app = create_router(state);
        let body = format!("station_name={}", "x".repeat(MAX_FORM_BODY * 2));

        let response = app
            .oneshot(
                Request::post("/save")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(rx.try_recv().is_err());
    }
}
