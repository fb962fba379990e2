//! Provisioning form schema and validation.
//!
//! The captive portal shows one form with the fields listed in [`FIELDS`].
//! A submission is validated as a whole against the record it edits: either
//! every field passes and a new record comes back, or the caller gets the
//! full list of [`FieldError`]s to show next to the fields.

use crate::record::{
    StationConfig, MQTT_PASS_LENGTH, MQTT_SERVER_LENGTH, MQTT_USER_LENGTH, PASS_LENGTH,
    SSID_LENGTH, STATION_NAME_LENGTH, TZ_LENGTH, WIFI_SENTINEL,
};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// POSIX TZ strings accepted by the `tz` field, e.g. `CET-1CEST,M3.5.0,M10.5.0/3`.
pub const TZ_PATTERN: &str = r"^[A-Z]{1,4}[-|+]?\d{1,2}[A-Z]{0,5}(,[JM]\d{1,3}(\.\d\.\d)?(/\d{1,2})?(,[JM]\d{1,3}(\.\d\.\d)?(/\d{1,2})?)?)?$";

/// Coordinates are accepted in this closed range, in degrees.
pub const COORDINATE_RANGE: (f64, f64) = (-180.0, 180.0);

fn tz_regex() -> &'static Regex {
    static TZ: OnceLock<Regex> = OnceLock::new();
    TZ.get_or_init(|| Regex::new(TZ_PATTERN).expect("TZ pattern compiles"))
}

/// Check a POSIX TZ string against [`TZ_PATTERN`].
pub fn is_valid_tz(tz: &str) -> bool {
    tz_regex().is_match(tz)
}

/// Form field identifiers. The string form is the HTML `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    StationName,
    Latitude,
    Longitude,
    ServerName,
    ServerPort,
    User,
    Pass,
    Tz,
    WifiSsid,
    WifiPass,
}

impl FieldId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::StationName => "station_name",
            FieldId::Latitude => "lat",
            FieldId::Longitude => "lon",
            FieldId::ServerName => "server_name",
            FieldId::ServerPort => "server_port",
            FieldId::User => "user",
            FieldId::Pass => "pass",
            FieldId::Tz => "tz",
            FieldId::WifiSsid => "wifi_ssid",
            FieldId::WifiPass => "wifi_pass",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FIELDS.iter().map(|f| f.id).find(|id| id.as_str() == name)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a field accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldConstraint {
    /// Required text of at most `max_len` bytes.
    Text { max_len: usize },
    /// Required decimal number in `[min, max]`.
    Number { min: f64, max: f64 },
    /// Required integer in `[min, max]`.
    Integer { min: u32, max: u32 },
    /// Secret of at most `max_len` bytes. Empty keeps the stored value.
    Password { max_len: usize },
    /// Optional POSIX TZ string of at most `max_len` bytes.
    TimeZone { max_len: usize },
}

/// One form field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub id: FieldId,
    pub label: &'static str,
    pub constraint: FieldConstraint,
}

/// Every field of the provisioning form, in display order.
pub const FIELDS: [FieldSpec; 10] = [
    FieldSpec {
        id: FieldId::StationName,
        label: "Station Name",
        constraint: FieldConstraint::Text {
            max_len: STATION_NAME_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::Latitude,
        label: "Latitude (3 decimals, will be public)",
        constraint: FieldConstraint::Number {
            min: COORDINATE_RANGE.0,
            max: COORDINATE_RANGE.1,
        },
    },
    FieldSpec {
        id: FieldId::Longitude,
        label: "Longitude (3 decimals, will be public)",
        constraint: FieldConstraint::Number {
            min: COORDINATE_RANGE.0,
            max: COORDINATE_RANGE.1,
        },
    },
    FieldSpec {
        id: FieldId::ServerName,
        label: "MQTT Server",
        constraint: FieldConstraint::Text {
            max_len: MQTT_SERVER_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::ServerPort,
        label: "MQTT Server Port",
        constraint: FieldConstraint::Integer { min: 1, max: 65535 },
    },
    FieldSpec {
        id: FieldId::User,
        label: "MQTT Username",
        constraint: FieldConstraint::Text {
            max_len: MQTT_USER_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::Pass,
        label: "MQTT Password",
        constraint: FieldConstraint::Password {
            max_len: MQTT_PASS_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::Tz,
        label: "Time Zone (POSIX TZ)",
        constraint: FieldConstraint::TimeZone {
            max_len: TZ_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::WifiSsid,
        label: "WiFi Network",
        constraint: FieldConstraint::Text {
            max_len: SSID_LENGTH - 1,
        },
    },
    FieldSpec {
        id: FieldId::WifiPass,
        label: "WiFi Password",
        constraint: FieldConstraint::Password {
            max_len: PASS_LENGTH - 1,
        },
    },
];

/// A validation failure for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: FieldId,
    pub message: String,
}

impl FieldError {
    pub fn new(field: FieldId, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Raw values posted by the portal form.
///
/// Unknown names are kept but ignored by [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSubmission {
    values: HashMap<String, String>,
}

impl FormSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: FieldId, value: impl Into<String>) -> Self {
        self.insert(field.as_str(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, field: FieldId) -> Option<&str> {
        self.values.get(field.as_str()).map(String::as_str)
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &str) -> Self {
        body.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (url_decode(name), url_decode(value))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for FormSubmission {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<HashMap<String, String>> for FormSubmission {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// Decode one urlencoded component. Invalid escapes are kept literally.
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match bytes.get(i + 1..i + 3) {
                Some(&[hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    out.push(hex_value(hi) << 4 | hex_value(lo));
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn check_len(field: FieldId, value: &str, max_len: usize) -> Result<(), FieldError> {
    if value.len() > max_len {
        Err(FieldError::new(
            field,
            format!("must be at most {max_len} characters"),
        ))
    } else {
        Ok(())
    }
}

fn required(submission: &FormSubmission, field: FieldId) -> Result<&str, FieldError> {
    match submission.get(field) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(FieldError::new(field, "is required")),
    }
}

fn text(submission: &FormSubmission, field: FieldId, max_len: usize) -> Result<&str, FieldError> {
    let value = required(submission, field)?;
    check_len(field, value, max_len)?;
    Ok(value)
}

fn number(submission: &FormSubmission, field: FieldId, min: f64, max: f64) -> Result<f64, FieldError> {
    let value = required(submission, field)?;
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| FieldError::new(field, "must be a number"))?;
    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(parsed)
}

fn integer(submission: &FormSubmission, field: FieldId, min: u32, max: u32) -> Result<u32, FieldError> {
    let value = required(submission, field)?;
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| FieldError::new(field, "must be a whole number"))?;
    if parsed < min || parsed > max {
        return Err(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(parsed)
}

/// `None` means "leave the stored secret alone".
fn password(submission: &FormSubmission, field: FieldId, max_len: usize) -> Result<Option<&str>, FieldError> {
    match submission.get(field) {
        None | Some("") => Ok(None),
        Some(value) => {
            check_len(field, value, max_len)?;
            Ok(Some(value))
        }
    }
}

fn time_zone(submission: &FormSubmission, field: FieldId, max_len: usize) -> Result<&str, FieldError> {
    let value = submission.get(field).unwrap_or_default();
    if value.is_empty() {
        return Ok(value);
    }
    check_len(field, value, max_len)?;
    if !is_valid_tz(value) {
        return Err(FieldError::new(field, "is not a valid POSIX time zone"));
    }
    Ok(value)
}

/// Validate a submission and apply it on top of `current`.
///
/// Returns the edited copy; `current` itself is never touched. On failure
/// every invalid field is reported.
pub fn validate(
    submission: &FormSubmission,
    current: &StationConfig,
) -> Result<StationConfig, Vec<FieldError>> {
    let mut draft = current.clone();
    let mut errors = Vec::new();

    for spec in &FIELDS {
        let id = spec.id;
        let outcome = match spec.constraint {
            FieldConstraint::Text { max_len } => text(submission, id, max_len).map(|value| {
                match id {
                    FieldId::StationName => draft.station.set(value),
                    FieldId::ServerName => draft.mqtt_server_name.set(value),
                    FieldId::User => draft.mqtt_user.set(value),
                    FieldId::WifiSsid => draft.wifi_ssid.set(value),
                    _ => false,
                };
            }),
            FieldConstraint::Number { min, max } => {
                number(submission, id, min, max).map(|value| match id {
                    FieldId::Latitude => draft.latitude = value,
                    FieldId::Longitude => draft.longitude = value,
                    _ => {}
                })
            }
            FieldConstraint::Integer { min, max } => {
                integer(submission, id, min, max).map(|value| {
                    if let (FieldId::ServerPort, Ok(port)) = (id, u16::try_from(value)) {
                        draft.mqtt_port = port;
                    }
                })
            }
            FieldConstraint::Password { max_len } => {
                password(submission, id, max_len).map(|value| match (id, value) {
                    (FieldId::Pass, Some(pass)) => {
                        draft.mqtt_pass.set(pass);
                    }
                    (FieldId::WifiPass, Some(pass)) => {
                        draft.wifi_pass.set(pass);
                    }
                    // Nothing stored yet: an empty passphrase means an open network.
                    (FieldId::WifiPass, None) if current.wifi_pass == WIFI_SENTINEL => {
                        draft.wifi_pass.clear();
                    }
                    _ => {}
                })
            }
            FieldConstraint::TimeZone { max_len } => {
                time_zone(submission, id, max_len).map(|value| {
                    draft.tz.set(value);
                })
            }
        };

        if let Err(e) = outcome {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(draft)
    } else {
        Err(errors)
    }
}

/// Values shown in the form for `record`.
///
/// Secrets are never echoed, coordinates use three decimals and a cleared
/// SSID shows as empty.
pub fn prefill(record: &StationConfig) -> Vec<(FieldId, String)> {
    let ssid = if record.has_wifi_credentials() {
        record.wifi_ssid.to_string()
    } else {
        String::new()
    };

    vec![
        (FieldId::StationName, record.station.to_string()),
        (FieldId::Latitude, format!("{:.3}", record.latitude)),
        (FieldId::Longitude, format!("{:.3}", record.longitude)),
        (FieldId::ServerName, record.mqtt_server_name.to_string()),
        (FieldId::ServerPort, record.mqtt_port.to_string()),
        (FieldId::User, record.mqtt_user.to_string()),
        (FieldId::Pass, String::new()),
        (FieldId::Tz, record.tz.to_string()),
        (FieldId::WifiSsid, ssid),
        (FieldId::WifiPass, String::new()),
    ]
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the provisioning page.
///
/// `values` are the prefilled field values, `errors` come from the last
/// rejected submission. The form posts to `/save`.
pub fn render_form(title: &str, values: &[(FieldId, String)], errors: &[FieldError]) -> String {
    let mut html = String::with_capacity(4096);
    let title = html_escape(title);

    let _ = write!(
        html,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head><body><h1>{title}</h1>\
         <form method=\"POST\" action=\"/save\">"
    );

    for spec in &FIELDS {
        let name = spec.id.as_str();
        let value = values
            .iter()
            .find(|(id, _)| *id == spec.id)
            .map(|(_, v)| html_escape(v))
            .unwrap_or_default();
        let (kind, max_len) = match spec.constraint {
            FieldConstraint::Text { max_len } | FieldConstraint::TimeZone { max_len } => {
                ("text", Some(max_len))
            }
            FieldConstraint::Password { max_len } => ("password", Some(max_len)),
            FieldConstraint::Number { .. } | FieldConstraint::Integer { .. } => ("text", None),
        };

        let _ = write!(
            html,
            "<p><label for=\"{name}\">{}</label><br><input type=\"{kind}\" id=\"{name}\" name=\"{name}\" value=\"{value}\"",
            html_escape(spec.label)
        );
        if let Some(max_len) = max_len {
            let _ = write!(html, " maxlength=\"{max_len}\"");
        }
        html.push('>');

        for error in errors.iter().filter(|e| e.field == spec.id) {
            let _ = write!(
                html,
                "<br><small style=\"color:red\">{}</small>",
                html_escape(&error.message)
            );
        }
        html.push_str("</p>");
    }

    html.push_str("<p><button type=\"submit\">Save</button></p></form></body></html>");
    html
}
