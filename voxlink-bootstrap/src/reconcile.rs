//! Activation status reconciliation.
//!
//! The provisioning reply and the local identity record each carry an
//! opinion on whether this device is activated. The reconciler is a pure
//! decision table over those two opinions; the engine performs whatever
//! the decision demands.

/// Decision from comparing the local activation flag with the server's
/// response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Local: not activated. Remote: challenge issued. Run the
    /// activation exchange.
    NeedsActivation,
    /// Local: activated. Remote: ready. Proceed with the returned
    /// config.
    AlreadyActivated,
    /// Local: not activated, but the remote returned a ready config.
    /// The server owns the truth: flip the local flag and proceed.
    RepairLocalState,
    /// Local: activated, but the remote demands activation again
    /// (server-side record lost or reset). Reported, then the exchange
    /// runs anyway.
    InconsistentState,
}

/// Decides how to reconcile the local flag with the remote response.
///
/// Total: every combination maps to exactly one decision. A local
/// "not activated" belief is only corrected when the remote explicitly
/// returns a ready configuration, never from silence.
#[must_use]
pub fn reconcile(local_activated: bool, remote_challenge_present: bool) -> Reconciliation {
    match (local_activated, remote_challenge_present) {
        (false, true) => Reconciliation::NeedsActivation,
        (true, false) => Reconciliation::AlreadyActivated,
        (false, false) => Reconciliation::RepairLocalState,
        (true, true) => Reconciliation::InconsistentState,
    }
}

impl Reconciliation {
    /// True when the activation exchange must run.
    #[must_use]
    pub fn requires_negotiation(&self) -> bool {
        matches!(self, Self::NeedsActivation | Self::InconsistentState)
    }

    /// True when the local flag must be flipped without an exchange.
    #[must_use]
    pub fn repairs_local_flag(&self) -> bool {
        matches!(self, Self::RepairLocalState)
    }

    /// True when local and remote state disagree.
    #[must_use]
    pub fn is_divergence(&self) -> bool {
        matches!(self, Self::RepairLocalState | Self::InconsistentState)
    }

    /// Operator-facing description of the divergence, if any.
    #[must_use]
    pub fn divergence_message(&self) -> Option<&'static str> {
        match self {
            Self::RepairLocalState => {
                Some("Server reports this device as activated; repairing local state")
            }
            Self::InconsistentState => {
                Some("Server no longer recognizes this device's activation; re-activating")
            }
            Self::NeedsActivation | Self::AlreadyActivated => None,
        }
    }
}
