//! Error taxonomy for the handshake coordinator.
//!
//! Three families:
//! - input/authorization errors are deterministic; the caller must change
//!   the request, never retry it;
//! - state errors mean the record moved on without the caller's knowledge
//!   and carry the authoritative status so clients can resynchronize;
//! - transient/infrastructure errors are retry-eligible; the coordinator
//!   fails fast and leaves state unchanged apart from mutations that did
//!   succeed, so a caller-driven retry is safe.

use thiserror::Error;

use crate::record::HandshakeStatus;

#[derive(Debug, Error)]
pub enum HandshakeError {
    // ── Input / authorization ───────────────────────────────────
    #[error("contact does not resolve to a contactable identifier")]
    InvalidCounterparty,

    #[error("an open handshake already exists for this contact (id {existing}, status {status})")]
    DuplicateHandshake {
        existing: String,
        status: HandshakeStatus,
    },

    #[error("claiming account's identifiers do not match the addressed counterparty")]
    NotAuthorized,

    #[error("a party cannot claim their own handshake")]
    SelfClaim,

    // ── State ───────────────────────────────────────────────────
    #[error("handshake record not found")]
    NotFound,

    #[error("operation not valid while handshake is {status}")]
    InvalidState { status: HandshakeStatus },

    #[error("handshake expired before it was claimed")]
    Expired,

    #[error("mint requires both fee payments (initiator paid: {initiator_paid}, receiver paid: {receiver_paid})")]
    PaymentIncomplete {
        initiator_paid: bool,
        receiver_paid: bool,
    },

    // ── Transient / infrastructure ──────────────────────────────
    #[error("fee payment failed: {detail}")]
    PaymentFailed { detail: String },

    #[error("badge mint partially failed: {detail}")]
    MintPartialFailure {
        /// Ref of the side that did mint, persisted before the failure.
        initiator_token_ref: Option<String>,
        detail: String,
    },

    #[error("record store error: {detail}")]
    Store { detail: String },

    #[error("identity directory error: {detail}")]
    Identity { detail: String },

    #[error("ledger gateway error: {detail}")]
    Ledger { detail: String },
}

impl HandshakeError {
    /// Whether a caller-driven retry of the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandshakeError::PaymentFailed { .. }
                | HandshakeError::MintPartialFailure { .. }
                | HandshakeError::Store { .. }
                | HandshakeError::Identity { .. }
                | HandshakeError::Ledger { .. }
        )
    }
}
