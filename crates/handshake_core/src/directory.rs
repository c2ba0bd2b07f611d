//! Identity Resolver – the user/identity directory collaborator.

use async_trait::async_trait;

use crate::error::HandshakeError;
use crate::identity::AccountIdentifiers;

/// A contact row resolved for addressing, as seen by its owner.
#[derive(Debug, Clone)]
pub struct ContactProfile {
    /// Linked messaging handle, falling back to email. `None` when the
    /// contact has neither, in which case it cannot be handshaken.
    pub identifier: Option<String>,
    /// Human-readable label for confirmation UI.
    pub display_name: String,
    /// Where the two parties met, carried into the record for display.
    pub event_id: Option<String>,
    pub event_title: Option<String>,
    pub event_datetime: Option<String>,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a contact owned by `account_id`. Returns `None` when the
    /// contact does not exist or belongs to someone else.
    async fn resolve_contact(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<ContactProfile>, HandshakeError>;

    /// The account's own contactable identifiers (the claim-time gate).
    async fn account_identifiers(
        &self,
        account_id: &str,
    ) -> Result<AccountIdentifiers, HandshakeError>;

    /// Display name for an account, for UI enrichment.
    async fn display_name(&self, account_id: &str) -> Result<String, HandshakeError>;

    /// Push a refreshed minted-handshake count into the directory. Trust
    /// scoring itself is the directory's concern; the coordinator only
    /// supplies the count.
    async fn record_handshake_count(
        &self,
        account_id: &str,
        minted: u64,
    ) -> Result<(), HandshakeError>;
}
