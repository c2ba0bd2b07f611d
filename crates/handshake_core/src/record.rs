//! Handshake record – the central entity of the escrow workflow.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handshake lifecycle status.
///
/// `Pending → Matched → Minted`; `Pending → Expired`. No other transitions
/// exist: `Matched` never reverts, and `Minted`/`Expired` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    /// Created by the initiator, waiting for the addressed counterparty.
    Pending,
    /// Claimed by the counterparty; fee payments may land in either order.
    Matched,
    /// Both fees confirmed and both badges minted.
    Minted,
    /// TTL elapsed before a claim.
    Expired,
}

impl HandshakeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeStatus::Minted | HandshakeStatus::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeStatus::Pending => "pending",
            HandshakeStatus::Matched => "matched",
            HandshakeStatus::Minted => "minted",
            HandshakeStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which party a payment or mint belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSide {
    Initiator,
    Receiver,
}

impl PaymentSide {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentSide::Initiator => "initiator",
            PaymentSide::Receiver => "receiver",
        }
    }
}

impl fmt::Display for PaymentSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-side mint progress, derived from the two token-ref fields.
///
/// Persisting each side's ref as soon as its mint lands is what lets a
/// retried `mint` skip the side that already succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintProgress {
    Neither,
    InitiatorOnly,
    Both,
}

/// A handshake between an initiator and an addressed counterparty.
///
/// The receiver is identified by a loosely-typed contact string
/// (`receiver_identifier`) until claim time, when the claiming account's
/// own identifiers are verified against it. `receiver_account_id` is
/// non-null iff status is `Matched` or `Minted`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HandshakeRecord {
    pub id: String,

    // Parties
    pub initiator_account_id: String,
    pub receiver_account_id: Option<String>,
    /// Contact handle or email the handshake is addressed to.
    pub receiver_identifier: String,

    // Display context – no core invariant depends on these.
    pub contact_id: String,
    pub event_id: Option<String>,
    pub event_title: Option<String>,
    pub event_datetime: Option<String>,

    // Payment side
    pub initiator_wallet_address: String,
    pub receiver_wallet_address: Option<String>,
    pub initiator_tx_signature: Option<String>,
    pub receiver_tx_signature: Option<String>,
    /// Fee captured at creation so later fee-schedule changes never affect
    /// in-flight records.
    pub mint_fee_lamports: u64,

    // Outcome
    pub initiator_minted_at: Option<i64>,
    pub receiver_minted_at: Option<i64>,
    pub initiator_token_ref: Option<String>,
    pub receiver_token_ref: Option<String>,
    pub points_awarded: u32,

    // Lifecycle
    pub status: HandshakeStatus,
    pub created_at: i64,
    /// Immutable after creation.
    pub expires_at: i64,
}

impl HandshakeRecord {
    /// Returns true once the TTL has elapsed (only meaningful for Pending).
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// True once both sides' fee payments have confirmed.
    pub fn both_paid(&self) -> bool {
        self.initiator_tx_signature.is_some() && self.receiver_tx_signature.is_some()
    }

    pub fn tx_signature(&self, side: PaymentSide) -> Option<&str> {
        match side {
            PaymentSide::Initiator => self.initiator_tx_signature.as_deref(),
            PaymentSide::Receiver => self.receiver_tx_signature.as_deref(),
        }
    }

    pub fn token_ref(&self, side: PaymentSide) -> Option<&str> {
        match side {
            PaymentSide::Initiator => self.initiator_token_ref.as_deref(),
            PaymentSide::Receiver => self.receiver_token_ref.as_deref(),
        }
    }

    pub fn mint_progress(&self) -> MintProgress {
        match (&self.initiator_token_ref, &self.receiver_token_ref) {
            (Some(_), Some(_)) => MintProgress::Both,
            (Some(_), None) => MintProgress::InitiatorOnly,
            (None, _) => MintProgress::Neither,
        }
    }

    /// True if `account_id` is one of the two parties.
    pub fn involves(&self, account_id: &str) -> bool {
        self.initiator_account_id == account_id
            || self.receiver_account_id.as_deref() == Some(account_id)
    }
}

/// Append-only reward entry, written once per party at mint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PointsLedgerEntry {
    pub account_id: String,
    /// Back-reference, not ownership.
    pub handshake_id: String,
    pub points: u32,
    pub reason: String,
    pub created_at: i64,
}
