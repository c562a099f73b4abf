//! The device identity record and challenge signing.

use crate::error::{IdentityError, IdentityResult};
use crate::fingerprint::HardwareProfile;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing key length in bytes (stored hex-encoded).
const SIGNING_KEY_LEN: usize = 32;

/// The persisted identity of a single device installation.
///
/// `serial_number` and `signing_key` are generated once and immutable;
/// regenerating either invalidates any activation the server holds for
/// this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Globally unique serial number.
    pub serial_number: String,
    /// Hex-encoded secret signing key. Never leaves the device; only
    /// signatures derived from it do.
    pub(crate) signing_key: String,
    /// Normalized hardware address, if the host has one.
    pub mac_address: Option<String>,
    /// Whether this device has completed activation.
    pub activated: bool,
    /// Hardware snapshot taken when the record was generated.
    pub fingerprint: HardwareProfile,
    /// When the record was generated.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl DeviceIdentity {
    /// Generates a fresh identity for the given hardware profile.
    #[must_use]
    pub fn generate(profile: HardwareProfile) -> Self {
        let mut key = [0u8; SIGNING_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        Self {
            serial_number: profile.derive_serial(),
            signing_key: hex::encode(key),
            mac_address: profile.mac_address.clone(),
            activated: false,
            fingerprint: profile,
            created_at: chrono::Utc::now(),
        }
    }

    /// Signs an activation challenge with the device key.
    ///
    /// HMAC-SHA256 over the challenge bytes, lowercase hex output. The
    /// same challenge always yields the same signature for one device.
    pub fn sign_challenge(&self, challenge: &str) -> IdentityResult<String> {
        if challenge.is_empty() {
            return Err(IdentityError::EmptyChallenge);
        }

        let key = hex::decode(&self.signing_key)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        mac.update(challenge.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Stable handle for request headers: the MAC when present, else the
    /// serial number.
    #[must_use]
    pub fn device_handle(&self) -> &str {
        self.mac_address.as_deref().unwrap_or(&self.serial_number)
    }

    /// First 8 hex chars of the signing key, for logs only.
    #[must_use]
    pub fn key_fingerprint(&self) -> &str {
        &self.signing_key[..self.signing_key.len().min(8)]
    }

    /// True when the stored key decodes to the expected length.
    pub(crate) fn has_valid_key(&self) -> bool {
        hex::decode(&self.signing_key)
            .map(|k| k.len() == SIGNING_KEY_LEN)
            .unwrap_or(false)
    }
}
