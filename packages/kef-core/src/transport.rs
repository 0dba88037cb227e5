//! HTTP transport for the KEF speaker control API.
//!
//! KEF speakers expose a JSON API at `/api/getData` and `/api/setData`.
//! Responses are arrays of value envelopes, e.g.
//! `[{"type":"i32_","i32_":42}]` for integers and
//! `[{"type":"string_","string_":"LSXII_4.0.1"}]` for strings.
//!
//! The [`KefTransport`] trait abstracts the transport so the controller and
//! the subnet sweep can be exercised against mock implementations in tests.
//! [`HttpTransport`] is the concrete `reqwest`-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// API Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Current volume level (0-100).
pub const PATH_VOLUME: &str = "player:volume";

/// Now-playing data (track roles, status, transport state).
pub const PATH_PLAYER_DATA: &str = "player:player/data";

/// Playback control commands (next/previous/pause).
pub const PATH_PLAYER_CONTROL: &str = "player:player/control";

/// Firmware release text, e.g. "LSXII_4.0.1". The model name is the part
/// before the first underscore.
pub const PATH_RELEASE_TEXT: &str = "settings:/releasetext";

/// User-configured device name. Used as the existence-probe endpoint during
/// the subnet sweep.
pub const PATH_DEVICE_NAME: &str = "settings:/deviceName";

/// Role for plain value reads and writes.
pub const ROLE_VALUE: &str = "value";

/// Role for triggering control actions.
pub const ROLE_ACTIVATE: &str = "activate";

/// Per-probe timeout for sweep existence checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when talking to the speaker API.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No speaker host has been configured yet.
    #[error("no host configured")]
    NoHostConfigured,

    /// HTTP request to the speaker failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Speaker returned a non-success HTTP status.
    #[error("HTTP error {0}")]
    HttpStatus(u16),

    /// Response body did not match the expected JSON envelope.
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope Parsing
// ─────────────────────────────────────────────────────────────────────────────

fn first_element(envelope: &Value) -> TransportResult<&Value> {
    envelope
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| TransportError::Malformed("empty response".to_string()))
}

/// Extracts the integer value from a `[{"i32_": n, ...}]` envelope.
pub(crate) fn parse_int_envelope(envelope: &Value) -> TransportResult<i32> {
    first_element(envelope)?
        .get("i32_")
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| TransportError::Malformed("invalid integer format".to_string()))
}

/// Extracts the string value from a `[{"string_": s, ...}]` envelope.
pub(crate) fn parse_string_envelope(envelope: &Value) -> TransportResult<String> {
    first_element(envelope)?
        .get("string_")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransportError::Malformed("invalid string format".to_string()))
}

/// Minimal fingerprint of the vendor response envelope: a JSON array whose
/// first element carries a string-typed `string_` field. Used to qualify
/// sweep probe replies without depending on endpoint-specific content.
pub fn is_kef_envelope(envelope: &Value) -> bool {
    envelope
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| item.get("string_"))
        .map(Value::is_string)
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Transport abstraction for the speaker control API.
///
/// Implementors provide the raw `get_data` / `set_data` / `probe_existence`
/// operations; the typed helpers are layered on top as default methods so
/// mocks only have to implement the raw surface.
#[async_trait]
pub trait KefTransport: Send + Sync {
    /// Updates the target host for subsequent requests.
    fn set_host(&self, host: &str);

    /// Performs a GET against `/api/getData` and returns the raw envelope.
    async fn get_data(&self, path: &str, roles: &str) -> TransportResult<Value>;

    /// Performs a GET against `/api/setData` with an inline JSON value.
    async fn set_data(&self, path: &str, roles: &str, value: &str) -> TransportResult<()>;

    /// Probes whether `host` answers like a KEF speaker. Never fails; any
    /// error or non-qualifying reply is reported as `false`.
    async fn probe_existence(&self, host: &str) -> bool;

    /// Reads an integer value.
    async fn get_int(&self, path: &str) -> TransportResult<i32> {
        parse_int_envelope(&self.get_data(path, ROLE_VALUE).await?)
    }

    /// Reads a string value.
    async fn get_string(&self, path: &str) -> TransportResult<String> {
        parse_string_envelope(&self.get_data(path, ROLE_VALUE).await?)
    }

    /// Writes an integer value.
    async fn set_int(&self, path: &str, value: i32) -> TransportResult<()> {
        let payload = format!(r#"{{"type":"i32_","i32_":{}}}"#, value);
        self.set_data(path, ROLE_VALUE, &payload).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// `reqwest`-backed transport for a single speaker.
///
/// The target host is a runtime slot so the same transport instance can be
/// retargeted after discovery without rebuilding the HTTP client.
pub struct HttpTransport {
    host: RwLock<Option<String>>,
    port: u16,
    http: Client,
}

impl HttpTransport {
    /// Creates a transport with no host configured yet.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            host: RwLock::new(None),
            port,
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn current_host(&self) -> TransportResult<String> {
        self.host
            .read()
            .clone()
            .ok_or(TransportError::NoHostConfigured)
    }

    fn url(&self, host: &str, endpoint: &str) -> String {
        format!("http://{}:{}{}", host, self.port, endpoint)
    }
}

#[async_trait]
impl KefTransport for HttpTransport {
    fn set_host(&self, host: &str) {
        *self.host.write() = Some(host.to_string());
    }

    async fn get_data(&self, path: &str, roles: &str) -> TransportResult<Value> {
        let host = self.current_host()?;
        let res = self
            .http
            .get(self.url(&host, "/api/getData"))
            .query(&[("path", path), ("roles", roles)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        res.json()
            .await
            .map_err(|e| TransportError::Malformed(format!("response body is not JSON: {}", e)))
    }

    async fn set_data(&self, path: &str, roles: &str, value: &str) -> TransportResult<()> {
        let host = self.current_host()?;
        let res = self
            .http
            .get(self.url(&host, "/api/setData"))
            .query(&[("path", path), ("roles", roles), ("value", value)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        Ok(())
    }

    async fn probe_existence(&self, host: &str) -> bool {
        let res = self
            .http
            .get(self.url(host, "/api/getData"))
            .query(&[("path", PATH_DEVICE_NAME), ("roles", ROLE_VALUE)])
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match res {
            Ok(res) if res.status().is_success() => match res.json::<Value>().await {
                Ok(body) => is_kef_envelope(&body),
                Err(_) => false,
            },
            _ => false,
        }
    }
}
