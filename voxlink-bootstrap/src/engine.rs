//! The bootstrap engine.
//!
//! Drives the three startup stages in order: device identity, local
//! config integrity, then the provisioning exchange with whatever
//! activation work it demands. One flow at a time per engine; the caller
//! decides whether and when to retry a failed bootstrap.

use crate::cancel::CancelToken;
use crate::error::{BootstrapError, BootstrapResult};
use crate::negotiate::{ActivationNegotiator, RetryPolicy};
use crate::observer::{NullPresentation, NullTransport, PresentationSink, TransportSink};
use crate::provision::{
    AppDescriptor, ConnectionConfig, ProvisioningClient, ProvisioningConfig, ProvisioningResponse,
};
use crate::reconcile::{reconcile, Reconciliation};
use crate::settings::SettingsStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxlink_identity::IdentityStore;

/// Result of a completed bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// Connection configuration for the transport layer.
    pub config: ConnectionConfig,
    /// How local and remote activation state compared.
    pub reconciliation: Reconciliation,
    /// Whether this run performed the activation exchange.
    pub activated_now: bool,
}

/// Drives the bootstrap sequence.
///
/// Explicitly constructed and dependency-injected: the engine owns
/// nothing global, and two engines over different stores are fully
/// independent.
pub struct BootstrapEngine {
    identity: Arc<IdentityStore>,
    settings: Arc<SettingsStore>,
    app: AppDescriptor,
    policy: RetryPolicy,
    presentation: Arc<dyn PresentationSink>,
    transport_sink: Arc<dyn TransportSink>,
    surface_divergence: bool,
    flight: Mutex<()>,
}

impl BootstrapEngine {
    /// Creates an engine over the given stores with null sinks.
    pub fn new(identity: Arc<IdentityStore>, settings: Arc<SettingsStore>) -> Self {
        Self {
            identity,
            settings,
            app: AppDescriptor::current(),
            policy: RetryPolicy::default(),
            presentation: Arc::new(NullPresentation),
            transport_sink: Arc::new(NullTransport),
            surface_divergence: true,
            flight: Mutex::new(()),
        }
    }

    /// Replaces the application descriptor sent to provisioning.
    #[must_use]
    pub fn with_app(mut self, app: AppDescriptor) -> Self {
        self.app = app;
        self
    }

    /// Replaces the activation polling bounds.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the sink for human-facing activation output.
    #[must_use]
    pub fn with_presentation(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.presentation = sink;
        self
    }

    /// Sets the sink receiving the resolved connection config.
    #[must_use]
    pub fn with_transport_sink(mut self, sink: Arc<dyn TransportSink>) -> Self {
        self.transport_sink = sink;
        self
    }

    /// Controls whether state divergence is pushed to the presentation
    /// sink. It is always logged.
    #[must_use]
    pub fn with_divergence_surfacing(mut self, surface: bool) -> Self {
        self.surface_divergence = surface;
        self
    }

    /// Runs one bootstrap to completion.
    ///
    /// Stages run strictly in order; a failed stage aborts the run and
    /// its error is the terminal outcome. Concurrent calls serialize on
    /// an internal guard.
    pub async fn run(&self, cancel: &CancelToken) -> BootstrapResult<BootstrapOutcome> {
        let _flight = self.flight.lock().await;

        // Stage 1: device identity
        let identity = self.identity.load_or_create()?;
        info!(
            serial = %identity.serial_number,
            activated = identity.activated,
            "device identity ready"
        );

        // Stage 2: local config integrity
        let client_id = self.settings.ensure_client_id()?;
        let device_id = self.settings.ensure_device_id(&identity)?;

        if cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }

        // Stage 3: provisioning exchange
        let snapshot = self.settings.snapshot();
        let client = ProvisioningClient::new(ProvisioningConfig {
            endpoint: snapshot.endpoint.clone(),
            protocol: snapshot.protocol,
            device_id,
            client_id,
            app: self.app.clone(),
            language: "en-US".to_string(),
        });

        let response = client.fetch_config().await?;
        let decision = reconcile(identity.activated, response.challenge().is_some());
        debug!(?decision, "reconciled activation state");

        if let Some(message) = decision.divergence_message() {
            warn!(?decision, "local and remote activation state disagree");
            if self.surface_divergence {
                self.presentation.status(message);
            }
        }

        let (config, activated_now) = match response {
            ProvisioningResponse::Ready(config) => {
                if decision.repairs_local_flag() {
                    info!("remote reports device active, repairing local flag");
                    self.identity.mark_activated()?;
                }
                (config, false)
            }
            ProvisioningResponse::ActivationRequired(challenge) => {
                let mut negotiator =
                    ActivationNegotiator::new(&client, self.identity.as_ref())
                        .with_policy(self.policy)
                        .with_portal_hint(snapshot.portal_url.clone());
                negotiator
                    .negotiate(challenge, cancel, self.presentation.as_ref())
                    .await?;

                (self.refetch_config(&client).await?, true)
            }
        };

        self.settings.record_connection(&config)?;
        self.transport_sink.connection_ready(&config);
        info!(activated_now, "bootstrap complete");

        Ok(BootstrapOutcome {
            config,
            reconciliation: decision,
            activated_now,
        })
    }

    /// After a confirmed activation the config comes from one clean
    /// re-fetch. A second challenge at that point breaks the contract.
    async fn refetch_config(
        &self,
        client: &ProvisioningClient,
    ) -> BootstrapResult<ConnectionConfig> {
        match client.fetch_config().await? {
            ProvisioningResponse::Ready(config) => Ok(config),
            ProvisioningResponse::ActivationRequired(_) => Err(BootstrapError::Protocol(
                "service demanded activation again after confirming it".to_string(),
            )),
        }
    }
}
