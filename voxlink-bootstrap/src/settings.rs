//! Persisted bootstrap settings.
//!
//! `bootstrap.json` carries the identifiers and endpoints a device needs
//! before it has any server-provided configuration, plus the last
//! connection config provisioning handed back. Missing fields merge
//! against defaults so older files keep working.

use crate::error::{BootstrapError, BootstrapResult};
use crate::provision::{ConnectionConfig, ProtocolVersion, WebSocketEndpoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};
use voxlink_identity::DeviceIdentity;

/// File name of the settings record inside the store directory.
const SETTINGS_FILE: &str = "bootstrap.json";

/// Persisted bootstrap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Per-installation client ID (UUID v4), generated once.
    pub client_id: Option<String>,
    /// Stable device handle, adopted from the identity record once.
    pub device_id: Option<String>,
    /// Provisioning endpoint.
    pub endpoint: String,
    /// Protocol generation used to mark provisioning requests.
    pub protocol: ProtocolVersion,
    /// Where a human enters the verification code.
    pub portal_url: String,
    /// Last websocket endpoint handed back by provisioning.
    pub websocket: Option<WebSocketEndpoint>,
    /// Last MQTT configuration handed back by provisioning (opaque).
    pub mqtt: Option<serde_json::Value>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            device_id: None,
            endpoint: "https://provision.voxlink.io/v1/".to_string(),
            protocol: ProtocolVersion::V2,
            portal_url: "https://voxlink.io/activate".to_string(),
            websocket: None,
            mqtt: None,
        }
    }
}

/// Durable store for bootstrap settings.
///
/// Generated identifiers are written once and never overwritten; an
/// unparsable file falls back to defaults rather than blocking startup.
pub struct SettingsStore {
    path: PathBuf,
    state: RwLock<BootstrapSettings>,
}

impl SettingsStore {
    /// Opens the store rooted at `dir`, merging `<dir>/bootstrap.json`
    /// against defaults.
    pub fn open(dir: impl Into<PathBuf>) -> BootstrapResult<Self> {
        let path = dir.into().join(SETTINGS_FILE);

        let settings = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "settings unparsable, using defaults");
                    BootstrapSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BootstrapSettings::default(),
            Err(e) => {
                return Err(BootstrapError::Settings(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(settings),
        })
    }

    /// Opens the store in the per-user config directory.
    pub fn open_default() -> BootstrapResult<Self> {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxlink");
        Self::open(dir)
    }

    /// Path of the settings file.
    #[must_use]
    pub fn settings_path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> BootstrapSettings {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ensures the client ID exists, generating a UUID v4 on first run.
    /// An existing value is never overwritten.
    pub fn ensure_client_id(&self) -> BootstrapResult<String> {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = state.client_id.clone() {
                return Ok(id);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        info!(client_id = %id, "generated client id");
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .client_id = Some(id.clone());
        self.save()?;
        Ok(id)
    }

    /// Ensures the device ID exists, adopting the identity's handle on
    /// first run. An existing value is never overwritten.
    pub fn ensure_device_id(&self, identity: &DeviceIdentity) -> BootstrapResult<String> {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = state.device_id.clone() {
                return Ok(id);
            }
        }

        let id = identity.device_handle().to_string();
        info!(device_id = %id, "adopted device id from identity");
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .device_id = Some(id.clone());
        self.save()?;
        Ok(id)
    }

    /// Updates the provisioning endpoint.
    pub fn set_endpoint(&self, url: impl Into<String>) -> BootstrapResult<()> {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .endpoint = url.into();
        self.save()
    }

    /// Updates the protocol generation used for future requests.
    pub fn set_protocol(&self, protocol: ProtocolVersion) -> BootstrapResult<()> {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .protocol = protocol;
        self.save()
    }

    /// Persists the connection config handed back by provisioning so
    /// the transport layer can reconnect without a fresh exchange.
    pub fn record_connection(&self, config: &ConnectionConfig) -> BootstrapResult<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if let Some(ws) = &config.websocket {
                state.websocket = Some(ws.clone());
            }
            if let Some(mqtt) = &config.mqtt {
                state.mqtt = Some(mqtt.clone());
            }
        }
        self.save()
    }

    /// Writes atomically: temp file, then rename over the final path.
    fn save(&self) -> BootstrapResult<()> {
        let snapshot = self.snapshot();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BootstrapError::Settings(format!("cannot create {}: {e}", parent.display())))?;
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| BootstrapError::Settings(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| BootstrapError::Settings(format!("cannot replace {}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), "settings written");
        Ok(())
    }
}
