//! On-disk identity store.
//!
//! One JSON record per installation at `<dir>/identity.json`. Writes are
//! atomic (temp file + rename) so a crash never leaves a half-written
//! record behind. Damaged records are repaired in place when the
//! immutable fields survive, and regenerated with a data-loss warning
//! when they do not.

use crate::error::{IdentityError, IdentityResult};
use crate::fingerprint::HardwareProfile;
use crate::record::DeviceIdentity;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// File name of the identity record inside the store directory.
const RECORD_FILE: &str = "identity.json";

/// Partially parsed record, used for in-place repair.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    serial_number: Option<String>,
    signing_key: Option<String>,
    mac_address: Option<String>,
    activated: Option<bool>,
    fingerprint: Option<HardwareProfile>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Durable store for the device identity record.
///
/// The store is the record's sole writer. A full bootstrap writes the
/// file at most twice: once at creation (or repair) and once when the
/// device is marked activated.
pub struct IdentityStore {
    path: PathBuf,
    record: RwLock<Option<DeviceIdentity>>,
}

impl IdentityStore {
    /// Creates a store rooted at `dir`; the record lives at
    /// `<dir>/identity.json`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(RECORD_FILE),
            record: RwLock::new(None),
        }
    }

    /// Creates a store in the per-user config directory.
    #[must_use]
    pub fn open_default() -> Self {
        Self::new(default_config_dir())
    }

    /// Path of the identity record.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        &self.path
    }

    /// Loads the identity record, creating or repairing it as needed.
    ///
    /// Generation happens at most once per installation: repeated calls
    /// return the same serial number and signing key, byte for byte.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` when the record path cannot be safely repaired
    /// (it is occupied by a directory), `Persistence` when the record
    /// cannot be read or written.
    pub fn load_or_create(&self) -> IdentityResult<DeviceIdentity> {
        {
            let cached = self.record.read().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = cached.as_ref() {
                return Ok(record.clone());
            }
        }

        let record = self.load_from_disk()?;
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(record)
    }

    /// Marks the device as activated and persists the record.
    ///
    /// The write must land before activation is reported as successful;
    /// a failure here is fatal for the caller. Idempotent once set.
    pub fn mark_activated(&self) -> IdentityResult<()> {
        let mut updated = self.load_or_create()?;
        if updated.activated {
            debug!(serial = %updated.serial_number, "device already marked activated");
            return Ok(());
        }

        updated.activated = true;
        self.persist(&updated)?;
        info!(serial = %updated.serial_number, "device marked activated");

        *self.record.write().unwrap_or_else(|e| e.into_inner()) = Some(updated);
        Ok(())
    }

    /// Returns the cached record, if one has been loaded.
    #[must_use]
    pub fn current(&self) -> Option<DeviceIdentity> {
        self.record.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn load_from_disk(&self) -> IdentityResult<DeviceIdentity> {
        if self.path.is_dir() {
            return Err(IdentityError::Corrupt(format!(
                "{} is a directory",
                self.path.display()
            )));
        }

        if !self.path.exists() {
            info!(path = %self.path.display(), "no identity record found, generating");
            return self.regenerate();
        }

        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<StoredRecord>(&raw) {
            Ok(stored) => self.adopt_or_repair(stored),
            Err(e) => {
                warn!(
                    error = %e,
                    "identity record unparsable, regenerating; prior identity is lost"
                );
                self.regenerate()
            }
        }
    }

    fn regenerate(&self) -> IdentityResult<DeviceIdentity> {
        let record = DeviceIdentity::generate(HardwareProfile::collect());
        self.persist(&record)?;
        debug!(
            serial = %record.serial_number,
            key = %record.key_fingerprint(),
            "generated device identity"
        );
        Ok(record)
    }

    /// Rebuilds a full record from a partial one, preserving every field
    /// that survived. Missing immutable fields force regeneration.
    fn adopt_or_repair(&self, stored: StoredRecord) -> IdentityResult<DeviceIdentity> {
        let (Some(serial_number), Some(signing_key)) = (stored.serial_number, stored.signing_key)
        else {
            warn!("identity record lost its immutable fields, regenerating; prior identity is lost");
            return self.regenerate();
        };

        let mut repairs: Vec<&str> = Vec::new();

        let fingerprint = match stored.fingerprint {
            Some(fp) => fp,
            None => {
                repairs.push("fingerprint");
                HardwareProfile::collect()
            }
        };

        let mac_address = match stored.mac_address {
            Some(mac) => Some(mac),
            None => match fingerprint.mac_address.clone() {
                Some(mac) => {
                    repairs.push("mac_address");
                    Some(mac)
                }
                None => None,
            },
        };

        let activated = match stored.activated {
            Some(flag) => flag,
            None => {
                repairs.push("activated");
                false
            }
        };

        let created_at = match stored.created_at {
            Some(ts) => ts,
            None => {
                repairs.push("created_at");
                chrono::Utc::now()
            }
        };

        let record = DeviceIdentity {
            serial_number,
            signing_key,
            mac_address,
            activated,
            fingerprint,
            created_at,
        };

        if !record.has_valid_key() {
            warn!("stored signing key is unusable, regenerating; prior identity is lost");
            return self.regenerate();
        }

        if repairs.is_empty() {
            debug!(serial = %record.serial_number, "identity record loaded");
        } else {
            warn!(
                serial = %record.serial_number,
                repaired = ?repairs,
                "identity record repaired in place"
            );
            self.persist(&record)?;
        }

        Ok(record)
    }

    /// Writes the record atomically: temp file in the same directory,
    /// then rename over the final path.
    fn persist(&self, record: &DeviceIdentity) -> IdentityResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "identity record written");
        Ok(())
    }
}

/// Per-user VoxLink config directory.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxlink")
}
