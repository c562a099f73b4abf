//! Activation negotiation.
//!
//! Challenge-response exchange: sign the server nonce with the device
//! key, submit the proof, and poll until a human enters the verification
//! code at the portal. Polling is bounded by an attempt ceiling and a
//! wall-clock deadline, whichever trips first. Network flaps during
//! polling are transient; an explicit rejection is final.

use crate::cancel::CancelToken;
use crate::error::{BootstrapError, BootstrapResult};
use crate::observer::PresentationSink;
use crate::provision::{
    ActivationChallenge, ActivationReply, ActivationRequest, ActivationTransport,
};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use voxlink_identity::{DeviceIdentity, IdentityStore};

/// Default pause between activation polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default ceiling on submission attempts.
pub const MAX_ATTEMPTS: u32 = 60;
/// Default wall-clock budget for the whole exchange.
pub const POLL_DEADLINE: Duration = Duration::from_secs(300);

/// Bounds for the activation polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between polls.
    pub interval: Duration,
    /// Maximum number of submissions.
    pub max_attempts: u32,
    /// Wall-clock budget for the exchange.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_ATTEMPTS,
            deadline: POLL_DEADLINE,
        }
    }
}

impl RetryPolicy {
    /// Applies a server deadline hint. Hints can only tighten the
    /// budget, never extend it.
    #[must_use]
    pub fn with_deadline_hint(mut self, hint_ms: Option<u64>) -> Self {
        if let Some(ms) = hint_ms {
            let hinted = Duration::from_millis(ms);
            if !hinted.is_zero() && hinted < self.deadline {
                self.deadline = hinted;
            }
        }
        self
    }
}

/// Observable phase of the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatorState {
    /// Not started.
    Idle,
    /// Computing the challenge signature.
    Signing,
    /// A submission is in flight.
    Submitting,
    /// Waiting for the human to enter the code.
    Waiting,
    /// Activation confirmed and persisted.
    Succeeded,
    /// Rejected, cancelled, or broken off with an error.
    Failed,
    /// Attempt or time budget exhausted.
    TimedOut,
}

/// Drives one activation exchange to a terminal state.
pub struct ActivationNegotiator<'a> {
    transport: &'a dyn ActivationTransport,
    identity: &'a IdentityStore,
    policy: RetryPolicy,
    portal_url: Option<String>,
    state: NegotiatorState,
}

impl<'a> ActivationNegotiator<'a> {
    /// Creates a negotiator over the given transport and identity store.
    pub fn new(transport: &'a dyn ActivationTransport, identity: &'a IdentityStore) -> Self {
        Self {
            transport,
            identity,
            policy: RetryPolicy::default(),
            portal_url: None,
            state: NegotiatorState::Idle,
        }
    }

    /// Replaces the polling bounds.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the portal URL mentioned in operator-facing messages.
    #[must_use]
    pub fn with_portal_hint(mut self, url: impl Into<String>) -> Self {
        self.portal_url = Some(url.into());
        self
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> NegotiatorState {
        self.state
    }

    /// Runs the exchange until confirmation, rejection, timeout, or
    /// cancellation.
    ///
    /// On confirmation the activation flag is persisted before success
    /// is reported; a failed write surfaces as an error, never as a
    /// success. A server-issued fresh challenge restarts the budget and
    /// re-announces the code.
    pub async fn negotiate(
        &mut self,
        challenge: ActivationChallenge,
        cancel: &CancelToken,
        presentation: &dyn PresentationSink,
    ) -> BootstrapResult<()> {
        let identity = self.identity.load_or_create()?;
        let policy = self.policy.with_deadline_hint(challenge.timeout_ms);

        let mut current = challenge;
        let mut request = self.sign(&identity, &current)?;
        self.announce(&current, presentation);

        let mut attempts: u32 = 0;
        let mut started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                info!("activation cancelled before completion");
                self.state = NegotiatorState::Failed;
                return Err(BootstrapError::Cancelled);
            }

            if attempts >= policy.max_attempts || started.elapsed() >= policy.deadline {
                warn!(attempts, "activation polling budget exhausted");
                self.state = NegotiatorState::TimedOut;
                presentation.status("Activation timed out; the verification code was never confirmed");
                return Err(BootstrapError::ActivationTimedOut {
                    attempts,
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            attempts += 1;
            self.state = NegotiatorState::Submitting;

            match self.transport.submit_activation(&request).await {
                Ok(ActivationReply::Confirmed) => {
                    if let Err(e) = self.identity.mark_activated() {
                        warn!(error = %e, "activation confirmed but the flag could not be persisted");
                        self.state = NegotiatorState::Failed;
                        return Err(e.into());
                    }
                    self.state = NegotiatorState::Succeeded;
                    info!(attempts, "activation confirmed");
                    presentation.status("Device activated");
                    return Ok(());
                }
                Ok(ActivationReply::Pending { refreshed }) => {
                    self.state = NegotiatorState::Waiting;
                    match refreshed {
                        Some(fresh) => {
                            info!("server rotated the challenge, restarting the poll budget");
                            if !fresh.code.is_empty() {
                                current.code = fresh.code;
                            }
                            current.challenge = fresh.challenge;
                            if fresh.message.is_some() {
                                current.message = fresh.message;
                            }
                            request = self.sign(&identity, &current)?;
                            self.announce(&current, presentation);
                            attempts = 0;
                            started = Instant::now();
                        }
                        None => {
                            debug!(attempt = attempts, "activation pending");
                            presentation.status(&format!(
                                "Waiting for verification ({attempts}/{})",
                                policy.max_attempts
                            ));
                        }
                    }
                }
                Ok(ActivationReply::Rejected { message }) => {
                    warn!(%message, "activation rejected by server");
                    self.state = NegotiatorState::Failed;
                    presentation.status(&format!("Activation rejected: {message}"));
                    return Err(BootstrapError::ActivationRejected(message));
                }
                Err(BootstrapError::Unreachable(reason)) => {
                    // Transient: the human may still be typing the code
                    warn!(%reason, "activation submission failed, will retry");
                    self.state = NegotiatorState::Waiting;
                }
                Err(e) => {
                    self.state = NegotiatorState::Failed;
                    return Err(e);
                }
            }

            sleep(policy.interval).await;
        }
    }

    fn sign(
        &mut self,
        identity: &DeviceIdentity,
        challenge: &ActivationChallenge,
    ) -> BootstrapResult<ActivationRequest> {
        self.state = NegotiatorState::Signing;
        let signature = identity.sign_challenge(&challenge.challenge)?;
        debug!(code = %challenge.code, "signed activation challenge");

        Ok(ActivationRequest {
            serial_number: identity.serial_number.clone(),
            challenge: challenge.challenge.clone(),
            signature,
            version: challenge.version,
        })
    }

    fn announce(&self, challenge: &ActivationChallenge, presentation: &dyn PresentationSink) {
        let message = match (&challenge.message, &self.portal_url) {
            (Some(message), _) => message.clone(),
            (None, Some(portal)) => {
                format!("Enter code {} at {portal}", challenge.spaced_code())
            }
            (None, None) => format!("Enter code {}", challenge.spaced_code()),
        };
        presentation.verification_code(&challenge.code, &message);
    }
}
