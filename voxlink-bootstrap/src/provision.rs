//! Provisioning exchange with the VoxLink service.
//!
//! One POST carries the device's public identifiers and application
//! metadata; the reply is either a connection configuration or an
//! activation challenge, never both. The same client submits activation
//! proofs to `<endpoint>/activate`.
//!
//! Wire v2 marks requests with an `Activation-Version` header and names
//! the signature algorithm in the payload; v1 omits both. Which shape a
//! device speaks is decided by the response, not guessed from field
//! presence.

use crate::error::{BootstrapError, BootstrapResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{debug, warn};

/// Total timeout for one provisioning request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Signature algorithm label carried in v2 activation payloads.
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

/// Protocol generation for the provisioning exchange.
///
/// Resolved once per response (a reply without a version marker is v1)
/// and carried as a value from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// No version marker, no algorithm field.
    V1,
    /// Version marker header plus explicit algorithm field.
    V2,
}

impl ProtocolVersion {
    /// Resolves the version a response advertised.
    ///
    /// # Errors
    ///
    /// Unknown versions are a protocol error: failing fast beats
    /// guessing a wire shape the server will misread.
    pub fn from_wire(version: Option<u64>) -> BootstrapResult<Self> {
        match version {
            None | Some(1) => Ok(Self::V1),
            Some(2) => Ok(Self::V2),
            Some(other) => Err(BootstrapError::Protocol(format!(
                "unsupported activation version {other}"
            ))),
        }
    }

    /// Value for the `Activation-Version` header.
    #[must_use]
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
        }
    }
}

/// Application metadata included in provisioning requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Device class, e.g. `desktop`.
    pub device_class: String,
    /// Human-readable device name.
    pub display_name: String,
}

impl AppDescriptor {
    /// Descriptor for this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: "voxlink".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            device_class: "desktop".to_string(),
            display_name: "VoxLink Desktop".to_string(),
        }
    }

    /// User agent string: `<class>/<name>-<version>`.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{}/{}-{}", self.device_class, self.name, self.version)
    }

    /// Stable build identifier: SHA-256 over `name/version`, hex.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"/");
        hasher.update(self.version.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A websocket endpoint handed back by provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketEndpoint {
    /// Connection URL.
    pub url: String,
    /// Access token, if the service issued one.
    pub token: Option<String>,
}

/// Connection configuration for the transport layer.
///
/// Opaque to the bootstrap beyond being well-formed: at least one
/// endpoint must be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Websocket endpoint, if offered.
    pub websocket: Option<WebSocketEndpoint>,
    /// MQTT configuration, passed through to the transport layer as-is.
    pub mqtt: Option<serde_json::Value>,
}

impl ConnectionConfig {
    /// True when at least one endpoint is present.
    #[must_use]
    pub fn has_endpoint(&self) -> bool {
        self.websocket.is_some() || self.mqtt.is_some()
    }
}

/// An activation challenge issued by the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationChallenge {
    /// Short code a human enters at the activation portal.
    pub code: String,
    /// Server nonce the device must sign.
    pub challenge: String,
    /// Operator-facing message, if the server sent one.
    pub message: Option<String>,
    /// Server hint for the polling deadline, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Wire version the response advertised.
    pub version: ProtocolVersion,
}

impl ActivationChallenge {
    /// The code with spaces between characters, for display.
    #[must_use]
    pub fn spaced_code(&self) -> String {
        self.code
            .chars()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a provisioning fetch: exactly one of the two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningResponse {
    /// Device is known; connect with this configuration.
    Ready(ConnectionConfig),
    /// Device must prove possession of its signing key first.
    ActivationRequired(ActivationChallenge),
}

impl ProvisioningResponse {
    /// The challenge, when activation is required.
    #[must_use]
    pub fn challenge(&self) -> Option<&ActivationChallenge> {
        match self {
            Self::ActivationRequired(challenge) => Some(challenge),
            Self::Ready(_) => None,
        }
    }

    /// The connection config, when the device is ready.
    #[must_use]
    pub fn config(&self) -> Option<&ConnectionConfig> {
        match self {
            Self::Ready(config) => Some(config),
            Self::ActivationRequired(_) => None,
        }
    }
}

/// One signed activation proof, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Device serial number.
    pub serial_number: String,
    /// The challenge string being answered.
    pub challenge: String,
    /// HMAC-SHA256 signature over the challenge, hex.
    pub signature: String,
    /// Wire version to encode the submission in.
    pub version: ProtocolVersion,
}

impl ActivationRequest {
    fn to_envelope(&self) -> ActivationEnvelope<'_> {
        ActivationEnvelope {
            payload: ActivationPayload {
                algorithm: match self.version {
                    ProtocolVersion::V2 => Some(SIGNATURE_ALGORITHM),
                    ProtocolVersion::V1 => None,
                },
                serial_number: &self.serial_number,
                challenge: &self.challenge,
                hmac: &self.signature,
            },
        }
    }
}

/// Server reply to an activation submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationReply {
    /// Activation confirmed.
    Confirmed,
    /// Code not yet entered; poll again. May carry a fresh challenge.
    Pending {
        /// A replacement challenge, when the server rotated it.
        refreshed: Option<ActivationChallenge>,
    },
    /// The server refused the proof.
    Rejected {
        /// Server-supplied reason.
        message: String,
    },
}

/// Transport seam for activation submissions.
#[async_trait]
pub trait ActivationTransport: Send + Sync {
    /// Submits one activation proof.
    async fn submit_activation(
        &self,
        request: &ActivationRequest,
    ) -> BootstrapResult<ActivationReply>;
}

// ── Wire structures ─────────────────────────────────────────────

#[derive(Serialize)]
struct ActivationEnvelope<'a> {
    #[serde(rename = "Payload")]
    payload: ActivationPayload<'a>,
}

#[derive(Serialize)]
struct ActivationPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    algorithm: Option<&'static str>,
    serial_number: &'a str,
    challenge: &'a str,
    hmac: &'a str,
}

#[derive(Debug, Deserialize)]
struct RawProvisioningReply {
    websocket: Option<WebSocketEndpoint>,
    mqtt: Option<serde_json::Value>,
    activation: Option<RawActivation>,
}

#[derive(Debug, Deserialize)]
struct RawActivation {
    code: Option<String>,
    challenge: Option<String>,
    message: Option<String>,
    timeout_ms: Option<u64>,
    version: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PendingBody {
    code: Option<String>,
    challenge: Option<String>,
    message: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Validates the one-of-two response contract.
fn parse_reply(raw: RawProvisioningReply) -> BootstrapResult<ProvisioningResponse> {
    let has_endpoint = raw.websocket.is_some() || raw.mqtt.is_some();

    match (raw.activation, has_endpoint) {
        (Some(_), true) => Err(BootstrapError::Protocol(
            "response carries both a connection config and an activation challenge".to_string(),
        )),
        (None, false) => Err(BootstrapError::Protocol(
            "response carries neither a connection config nor an activation challenge".to_string(),
        )),
        (None, true) => Ok(ProvisioningResponse::Ready(ConnectionConfig {
            websocket: raw.websocket,
            mqtt: raw.mqtt,
        })),
        (Some(activation), false) => {
            let version = ProtocolVersion::from_wire(activation.version)?;
            let code = activation.code.filter(|c| !c.is_empty()).ok_or_else(|| {
                BootstrapError::Protocol("activation challenge missing verification code".to_string())
            })?;
            let challenge = activation.challenge.filter(|c| !c.is_empty()).ok_or_else(|| {
                BootstrapError::Protocol("activation challenge missing challenge string".to_string())
            })?;

            Ok(ProvisioningResponse::ActivationRequired(ActivationChallenge {
                code,
                challenge,
                message: activation.message,
                timeout_ms: activation.timeout_ms,
                version,
            }))
        }
    }
}

/// A pending body carrying a different challenge is a server-issued
/// refresh; same-challenge bodies are plain keep-polling replies.
fn refreshed_challenge(
    body: PendingBody,
    current: &ActivationRequest,
) -> Option<ActivationChallenge> {
    let challenge = body
        .challenge
        .filter(|c| !c.is_empty() && *c != current.challenge)?;

    Some(ActivationChallenge {
        code: body.code.unwrap_or_default(),
        challenge,
        message: body.message,
        timeout_ms: body.timeout_ms,
        version: current.version,
    })
}

// ── Client ──────────────────────────────────────────────────────

/// Configuration for the provisioning client.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Provisioning endpoint URL.
    pub endpoint: String,
    /// Protocol generation for request marking.
    pub protocol: ProtocolVersion,
    /// `Device-Id` header value (MAC or serial).
    pub device_id: String,
    /// `Client-Id` header value (per-installation UUID).
    pub client_id: String,
    /// Application metadata for the request body.
    pub app: AppDescriptor,
    /// `Accept-Language` header value.
    pub language: String,
}

/// HTTP client for the provisioning exchange.
pub struct ProvisioningClient {
    config: ProvisioningConfig,
    http: Client,
}

impl ProvisioningClient {
    /// Creates a client with the standard request timeout.
    #[must_use]
    pub fn new(config: ProvisioningConfig) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to create HTTP client");

        Self { config, http }
    }

    /// The activation submission URL.
    fn activate_url(&self) -> String {
        format!("{}/activate", self.config.endpoint.trim_end_matches('/'))
    }

    /// Fetches the provisioning decision for this device.
    ///
    /// Exactly one request, never retried here. Network failures and
    /// 5xx map to `Unreachable`; contract violations map to `Protocol`.
    pub async fn fetch_config(&self) -> BootstrapResult<ProvisioningResponse> {
        let body = serde_json::json!({
            "application": {
                "version": self.config.app.version,
                "content_hash": self.config.app.content_hash(),
            },
            "device": {
                "class": self.config.app.device_class,
                "name": self.config.app.display_name,
                "ip": local_ip(),
                "mac": self.config.device_id,
            },
        });

        debug!(endpoint = %self.config.endpoint, "fetching provisioning config");

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header("Device-Id", &self.config.device_id)
            .header("Client-Id", &self.config.client_id)
            .header("User-Agent", self.config.app.user_agent())
            .header("Accept-Language", &self.config.language)
            .json(&body);
        if self.config.protocol == ProtocolVersion::V2 {
            request = request.header("Activation-Version", self.config.protocol.header_value());
        }

        let response = request.send().await.map_err(|e| {
            BootstrapError::Unreachable(format!("provisioning request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(BootstrapError::Unreachable(format!(
                "provisioning service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(BootstrapError::Protocol(format!(
                "provisioning service returned {status}"
            )));
        }

        let raw: RawProvisioningReply = response.json().await.map_err(|e| {
            BootstrapError::Protocol(format!("cannot parse provisioning response: {e}"))
        })?;

        parse_reply(raw)
    }
}

#[async_trait]
impl ActivationTransport for ProvisioningClient {
    async fn submit_activation(
        &self,
        request: &ActivationRequest,
    ) -> BootstrapResult<ActivationReply> {
        let url = self.activate_url();
        debug!(url = %url, serial = %request.serial_number, "submitting activation proof");

        let mut http_request = self
            .http
            .post(&url)
            .header("Device-Id", &self.config.device_id)
            .header("Client-Id", &self.config.client_id)
            .json(&request.to_envelope());
        if request.version == ProtocolVersion::V2 {
            http_request =
                http_request.header("Activation-Version", request.version.header_value());
        }

        let response = http_request.send().await.map_err(|e| {
            BootstrapError::Unreachable(format!("activation request failed: {e}"))
        })?;

        let status = response.status();
        match status {
            StatusCode::OK => Ok(ActivationReply::Confirmed),
            StatusCode::ACCEPTED => {
                // Pending replies may carry no body at all
                let refreshed = match response.json::<PendingBody>().await {
                    Ok(body) => refreshed_challenge(body, request),
                    Err(_) => None,
                };
                Ok(ActivationReply::Pending { refreshed })
            }
            _ if status.is_client_error() => {
                let message = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|b| b.error.or(b.message))
                    .unwrap_or_else(|| format!("HTTP {status}"));
                warn!(%status, %message, "activation proof refused");
                Ok(ActivationReply::Rejected { message })
            }
            _ => Err(BootstrapError::Unreachable(format!(
                "activation endpoint returned {status}"
            ))),
        }
    }
}

/// Discovers the local IP by opening a UDP socket toward a public
/// resolver. No packet is sent; connecting alone selects the route.
fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
