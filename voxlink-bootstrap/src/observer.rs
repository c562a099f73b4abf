//! Observer contracts at the bootstrap boundary.
//!
//! Consumers plug in here instead of being called directly: one sink
//! for human-facing activation output, one for the transport layer that
//! receives the resolved connection configuration.

use crate::provision::ConnectionConfig;

/// Receives human-facing activation output.
///
/// Rendering (console, GUI, voice) is the consumer's business. The
/// bootstrap guarantees the verification code is delivered before
/// polling starts and stays valid for the whole waiting period.
pub trait PresentationSink: Send + Sync {
    /// A verification code became available for display.
    fn verification_code(&self, code: &str, message: &str);

    /// A one-line status update (waiting, rejected, timed out).
    fn status(&self, line: &str);
}

/// Receives the resolved connection configuration.
pub trait TransportSink: Send + Sync {
    /// Called exactly once per successful bootstrap.
    fn connection_ready(&self, config: &ConnectionConfig);
}

/// Discards all presentation output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresentation;

impl PresentationSink for NullPresentation {
    fn verification_code(&self, _code: &str, _message: &str) {}
    fn status(&self, _line: &str) {}
}

/// Discards the connection configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl TransportSink for NullTransport {
    fn connection_ready(&self, _config: &ConnectionConfig) {}
}
