//! Record Store – the durable storage seam.
//!
//! Every transition that arbitrates a race (the claim flip, token-ref
//! writes, the terminal mint flip, expiry) is a conditional update that
//! reports whether a row actually changed, so the store itself decides
//! race winners atomically. The coordinator never does a bare
//! read-check-write for those transitions.

use async_trait::async_trait;

use crate::error::HandshakeError;
use crate::record::{HandshakeRecord, PaymentSide, PointsLedgerEntry};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: &HandshakeRecord) -> Result<(), HandshakeError>;

    async fn get(&self, id: &str) -> Result<Option<HandshakeRecord>, HandshakeError>;

    /// Most recent non-terminal record for `(initiator, contact)`, if any.
    /// Backs the duplicate-handshake check at initiation.
    async fn find_active(
        &self,
        initiator_account_id: &str,
        contact_id: &str,
    ) -> Result<Option<HandshakeRecord>, HandshakeError>;

    /// All pending records with no receiver attached yet.
    async fn list_open_pending(&self) -> Result<Vec<HandshakeRecord>, HandshakeError>;

    /// Pending records whose TTL elapsed at or before `now`.
    async fn list_overdue(&self, now: i64) -> Result<Vec<HandshakeRecord>, HandshakeError>;

    /// Conditional `pending → matched` flip attaching the receiver.
    /// Returns false when the record was no longer pending (lost race).
    async fn claim_pending(
        &self,
        id: &str,
        receiver_account_id: &str,
        receiver_wallet_address: &str,
    ) -> Result<bool, HandshakeError>;

    /// Conditional `pending → expired` flip. Returns false when the
    /// record was not pending.
    async fn expire_pending(&self, id: &str) -> Result<bool, HandshakeError>;

    /// Record one side's confirmed fee payment: the transaction signature
    /// and the minted-at timestamp that doubles as the paid marker.
    async fn record_payment(
        &self,
        id: &str,
        side: PaymentSide,
        tx_signature: &str,
        paid_at: i64,
    ) -> Result<(), HandshakeError>;

    /// Conditional write of one side's token ref, only if still unset.
    /// Returns false when another mint call already persisted a ref.
    async fn set_token_ref(
        &self,
        id: &str,
        side: PaymentSide,
        token_ref: &str,
    ) -> Result<bool, HandshakeError>;

    /// Conditional `matched → minted` flip with the points award. Returns
    /// false when another caller already finalized (double-mint guard).
    async fn finalize_mint(&self, id: &str, points_awarded: u32) -> Result<bool, HandshakeError>;

    /// Insert one reward entry if absent, keyed on
    /// `(handshake_id, account_id)`. Returns false when that party's entry
    /// for the handshake already exists, which is what makes mint
    /// settlement re-runnable. The ledger is append-only.
    async fn append_points(&self, entry: &PointsLedgerEntry) -> Result<bool, HandshakeError>;

    /// Number of minted handshakes the account participated in, on either
    /// side. Feeds the directory's trust recompute.
    async fn minted_count(&self, account_id: &str) -> Result<u64, HandshakeError>;
}
