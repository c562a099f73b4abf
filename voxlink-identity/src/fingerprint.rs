//! Hardware probing for device identity.
//!
//! Collects the stable host identifiers (hostname, machine ID, primary MAC
//! address) that back a device identity, and derives the serial number
//! from them. Probing is best-effort: a host without a usable MAC still
//! gets a stable serial via the machine ID or hostname.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use tracing::warn;

/// The all-zero MAC reported by some virtual interfaces.
const NULL_MAC: &str = "00:00:00:00:00:00";

/// A snapshot of the hardware identifiers backing a device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Operating system name.
    pub system: String,
    /// Hostname.
    pub hostname: String,
    /// Normalized primary MAC address, if one was found.
    pub mac_address: Option<String>,
    /// Platform machine ID, if available.
    pub machine_id: Option<String>,
}

impl HardwareProfile {
    /// Collects identifiers from the current host.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            system: env::consts::OS.to_string(),
            hostname: get_hostname(),
            mac_address: get_mac_address(),
            machine_id: get_machine_id(),
        }
    }

    /// Derives the serial number for this profile.
    ///
    /// With a MAC address present the serial is
    /// `SN-<HASH8>-<mac without separators>`, where `HASH8` is the first
    /// four bytes of SHA-256 over the separator-free MAC in uppercase hex.
    /// Without one, the machine ID (first 12 chars) or a sanitized
    /// hostname prefix stands in, so the serial stays stable across runs
    /// on the same host.
    #[must_use]
    pub fn derive_serial(&self) -> String {
        let basis = match &self.mac_address {
            Some(mac) => mac.chars().filter(|c| *c != ':').collect::<String>(),
            None => self
                .machine_id
                .as_deref()
                .map(|id| id.chars().take(12).collect::<String>())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| sanitized_prefix(&self.hostname)),
        };
        format!("SN-{}-{}", short_hash(&basis), basis)
    }
}

/// Normalizes a MAC address to lowercase colon-separated pairs.
///
/// Accepts any separator convention (`AA-BB-..`, `aabb.cc..`, bare hex).
/// Input that does not reduce to exactly 12 hex digits is lowercased and
/// passed through so a malformed address never becomes a hard failure.
#[must_use]
pub fn normalize_mac(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_alphanumeric).collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        warn!(mac = %raw, "MAC address has unexpected format, using as-is");
        return raw.to_lowercase();
    }

    let lower = digits.to_lowercase();
    lower
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// First 4 bytes of SHA-256 over the input, uppercase hex.
fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..4]).to_uppercase()
}

/// Alphanumeric hostname prefix (max 12 chars), `unknown` as last resort.
fn sanitized_prefix(hostname: &str) -> String {
    let cleaned: String = hostname
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(12)
        .collect::<String>()
        .to_lowercase();

    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Finds the primary MAC address, normalized, skipping loopback and
/// all-zero interfaces.
fn get_mac_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with("lo"))
            .collect();
        names.sort();

        for name in names {
            let path = format!("/sys/class/net/{name}/address");
            if let Ok(raw) = std::fs::read_to_string(&path) {
                let mac = normalize_mac(raw.trim());
                if mac.len() == 17 && mac != NULL_MAC {
                    return Some(mac);
                }
            }
        }
        None
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ifconfig").output().ok()?;
        let text = String::from_utf8(output.stdout).ok()?;
        text.lines()
            .filter_map(|line| {
                let rest = line.trim_start().strip_prefix("ether ")?;
                rest.split_whitespace().next()
            })
            .map(normalize_mac)
            .find(|mac| mac.len() == 17 && mac != NULL_MAC)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        // Would use platform network APIs in production
        None
    }
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()?;
        let text = String::from_utf8(output.stdout).ok()?;
        text.lines()
            .find(|l| l.contains("IOPlatformUUID"))
            .and_then(|l| l.split('"').nth(3))
            .map(String::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
