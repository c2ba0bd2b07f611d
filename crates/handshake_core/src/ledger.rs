//! Ledger Gateway – the contract the coordinator expects from a chain
//! client. The coordinator never signs: fee transfers are returned
//! unsigned for the owning wallet to countersign, then relayed back fully
//! signed for broadcast.

use async_trait::async_trait;

use crate::error::HandshakeError;

/// Display metadata attached to a minted badge.
#[derive(Debug, Clone)]
pub struct BadgeMetadata {
    pub handshake_id: String,
    pub event_title: Option<String>,
    pub event_datetime: Option<String>,
}

/// Result of minting one non-transferable badge.
#[derive(Debug, Clone)]
pub struct MintReceipt {
    /// Address of the minted badge record.
    pub token_ref: String,
    /// Signature of the mint transaction.
    pub signature: String,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Construct an unsigned wallet → treasury fee transfer against the
    /// network's current state (fresh blockhash). No broadcast happens
    /// here; the returned base64 transaction goes to the client for
    /// signing.
    async fn build_fee_transfer(
        &self,
        from_wallet: &str,
        lamports: u64,
    ) -> Result<String, HandshakeError>;

    /// Broadcast a fully-signed base64 transaction and wait for finality,
    /// returning the transaction signature. Resubmitting a signature that
    /// already landed must succeed rather than double-charge.
    async fn submit_and_confirm(&self, signed_tx_base64: &str) -> Result<String, HandshakeError>;

    /// Mint a non-transferable badge bound to `owner_wallet`.
    async fn mint_badge(
        &self,
        owner_wallet: &str,
        metadata: &BadgeMetadata,
    ) -> Result<MintReceipt, HandshakeError>;
}
