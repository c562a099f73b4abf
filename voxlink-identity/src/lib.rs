//! Device identity for VoxLink clients.
//!
//! Every installation carries a durable [`DeviceIdentity`]: a serial
//! number, a secret signing key, the hardware address, and the
//! activation flag. The record is generated on first run and its
//! immutable fields never change afterwards.
//!
//! # Design Principles
//!
//! - **Generate once**: serial number and signing key are created on
//!   first load and never rotated silently. Losing them means the
//!   server-side activation no longer matches this device; recovery
//!   regenerates the record and logs the loss instead of failing startup.
//! - **Secret stays local**: the signing key never leaves the store.
//!   Only HMAC-SHA256 signatures derived from it cross the wire.
//! - **Atomic writes**: the record is replaced via temp-file rename so a
//!   crash cannot leave a half-written identity behind.

mod error;
mod fingerprint;
mod record;
mod store;

pub use error::{IdentityError, IdentityResult};
pub use fingerprint::{normalize_mac, HardwareProfile};
pub use record::DeviceIdentity;
pub use store::{default_config_dir, IdentityStore};
