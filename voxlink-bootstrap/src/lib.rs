//! Device bootstrap for VoxLink clients.
//!
//! Brings a device from cold start to a working connection
//! configuration in three ordered stages:
//!
//! 1. **Identity**: load or create the durable device identity.
//! 2. **Local config integrity**: make sure the per-installation
//!    client ID and device ID exist; never overwrite existing values.
//! 3. **Provisioning**: one identity-bearing exchange with the
//!    provisioning service, reconciled against local state, running the
//!    challenge-response activation exchange when the service demands
//!    proof of key possession.
//!
//! The [`BootstrapEngine`] owns the sequence. Consumers receive results
//! through the sink traits in [`observer`] instead of being called
//! directly, and cancel through a [`CancelToken`].
//!
//! # Example
//!
//! ```
//! use voxlink_bootstrap::{reconcile, Reconciliation};
//!
//! // Local record says activated, server issued no challenge
//! let decision = reconcile(true, false);
//! assert_eq!(decision, Reconciliation::AlreadyActivated);
//! ```

pub mod cancel;
pub mod engine;
pub mod error;
pub mod negotiate;
pub mod observer;
pub mod provision;
pub mod reconcile;
pub mod settings;

pub use cancel::CancelToken;
pub use engine::{BootstrapEngine, BootstrapOutcome};
pub use error::{BootstrapError, BootstrapResult};
pub use negotiate::{ActivationNegotiator, NegotiatorState, RetryPolicy};
pub use observer::{NullPresentation, NullTransport, PresentationSink, TransportSink};
pub use provision::{
    ActivationChallenge, ActivationReply, ActivationRequest, ActivationTransport, AppDescriptor,
    ConnectionConfig, ProtocolVersion, ProvisioningClient, ProvisioningConfig,
    ProvisioningResponse, WebSocketEndpoint,
};
pub use reconcile::{reconcile, Reconciliation};
pub use settings::{BootstrapSettings, SettingsStore};
