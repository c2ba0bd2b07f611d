//! Handshake Coordinator – owns the state machine and the operation
//! surface.
//!
//! States: `Pending → Matched → Minted`; `Pending → Expired`. The natural
//! happens-before order within one handshake is initiate → claim →
//! confirm_payment for each side (in either order, commutative) → mint.
//! Nothing is ordered across different handshakes.
//!
//! Each operation validates first and commits state only after the
//! external (ledger) call succeeds; every race-arbitrating transition is a
//! store-level conditional update, so concurrent double-claim and
//! double-mint attempts resolve to exactly one winner.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::directory::IdentityResolver;
use crate::error::HandshakeError;
use crate::identity::normalize_identifier;
use crate::ledger::{BadgeMetadata, LedgerGateway};
use crate::record::{HandshakeRecord, HandshakeStatus, PaymentSide, PointsLedgerEntry};
use crate::store::RecordStore;

/// Reason string written on every mint reward entry.
pub const POINTS_REASON_MINTED: &str = "handshake_minted";

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Operation outcomes ──────────────────────────────────────────

#[derive(Debug)]
pub struct InitiateOutcome {
    pub handshake_id: String,
    /// Unsigned wallet → treasury fee transfer for the initiator to sign.
    pub unsigned_tx_base64: String,
    pub receiver_identifier: String,
    pub counterparty_name: String,
}

#[derive(Debug)]
pub struct ClaimOutcome {
    pub status: HandshakeStatus,
    /// Second unsigned fee transfer, same captured fee, for the receiver.
    pub unsigned_tx_base64: String,
    pub initiator_name: String,
}

#[derive(Debug)]
pub struct PaymentOutcome {
    pub tx_signature: String,
    pub side: PaymentSide,
    /// Recomputed by re-reading the record after the write.
    pub both_paid: bool,
    pub status: HandshakeStatus,
}

#[derive(Debug)]
pub struct MintOutcome {
    pub status: HandshakeStatus,
    pub initiator_token_ref: String,
    pub receiver_token_ref: String,
    pub points_awarded: u32,
}

/// One inbox entry from [`Coordinator::list_pending_for`].
#[derive(Debug)]
pub struct PendingHandshake {
    pub record: HandshakeRecord,
    pub initiator_name: String,
}

// ── Coordinator ─────────────────────────────────────────────────

pub struct Coordinator<S, L, D> {
    store: S,
    ledger: L,
    directory: D,
    config: CoordinatorConfig,
}

impl<S, L, D> Coordinator<S, L, D>
where
    S: RecordStore,
    L: LedgerGateway,
    D: IdentityResolver,
{
    pub fn new(store: S, ledger: L, directory: D, config: CoordinatorConfig) -> Self {
        Self {
            store,
            ledger,
            directory,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Open a handshake addressed to one of the initiator's contacts.
    ///
    /// The contact must belong to the initiator and resolve to a non-empty
    /// identifier. At most one non-terminal record may exist per
    /// `(initiator, contact)` pair; a duplicate attempt reports the
    /// existing record so the caller can resume instead of retrying
    /// blindly.
    pub async fn initiate(
        &self,
        initiator_account_id: &str,
        contact_id: &str,
        initiator_wallet_address: &str,
    ) -> Result<InitiateOutcome, HandshakeError> {
        let contact = self
            .directory
            .resolve_contact(initiator_account_id, contact_id)
            .await?
            .ok_or(HandshakeError::InvalidCounterparty)?;
        let receiver_identifier = contact
            .identifier
            .filter(|i| !normalize_identifier(i).is_empty())
            .ok_or(HandshakeError::InvalidCounterparty)?;

        if let Some(existing) = self
            .store
            .find_active(initiator_account_id, contact_id)
            .await?
        {
            return Err(HandshakeError::DuplicateHandshake {
                existing: existing.id,
                status: existing.status,
            });
        }

        // Construct the unsigned fee transfer before persisting anything,
        // so a gateway failure leaves no orphan record behind.
        let unsigned_tx_base64 = self
            .ledger
            .build_fee_transfer(initiator_wallet_address, self.config.mint_fee_lamports)
            .await?;

        let now = unix_now();
        let record = HandshakeRecord {
            id: Uuid::new_v4().to_string(),
            initiator_account_id: initiator_account_id.to_string(),
            receiver_account_id: None,
            receiver_identifier: receiver_identifier.clone(),
            contact_id: contact_id.to_string(),
            event_id: contact.event_id,
            event_title: contact.event_title,
            event_datetime: contact.event_datetime,
            initiator_wallet_address: initiator_wallet_address.to_string(),
            receiver_wallet_address: None,
            initiator_tx_signature: None,
            receiver_tx_signature: None,
            mint_fee_lamports: self.config.mint_fee_lamports,
            initiator_minted_at: None,
            receiver_minted_at: None,
            initiator_token_ref: None,
            receiver_token_ref: None,
            points_awarded: 0,
            status: HandshakeStatus::Pending,
            created_at: now,
            expires_at: now + self.config.ttl_secs,
        };
        self.store.create(&record).await?;

        info!(
            handshake = %record.id,
            initiator = %initiator_account_id,
            fee_lamports = record.mint_fee_lamports,
            "handshake initiated"
        );

        Ok(InitiateOutcome {
            handshake_id: record.id,
            unsigned_tx_base64,
            receiver_identifier,
            counterparty_name: contact.display_name,
        })
    }

    /// Claim a pending handshake as the addressed counterparty.
    ///
    /// This is the linchpin authorization check of the subsystem: the
    /// receiver identifier is a loosely-typed contact string at creation
    /// time, so only an account whose resolved identifiers match it may
    /// attach itself here. Expiry is also checked lazily on this touch.
    pub async fn claim(
        &self,
        handshake_id: &str,
        claiming_account_id: &str,
        receiver_wallet_address: &str,
    ) -> Result<ClaimOutcome, HandshakeError> {
        let record = self
            .store
            .get(handshake_id)
            .await?
            .ok_or(HandshakeError::NotFound)?;

        if record.status != HandshakeStatus::Pending {
            return Err(HandshakeError::InvalidState {
                status: record.status,
            });
        }

        let now = unix_now();
        if record.is_expired(now) {
            if self.store.expire_pending(handshake_id).await? {
                info!(handshake = %handshake_id, "expired on claim attempt");
            }
            return Err(HandshakeError::Expired);
        }

        let identifiers = self
            .directory
            .account_identifiers(claiming_account_id)
            .await?;
        if !identifiers.matches(&record.receiver_identifier) {
            warn!(
                handshake = %handshake_id,
                claimant = %claiming_account_id,
                "claim rejected: identifier mismatch"
            );
            return Err(HandshakeError::NotAuthorized);
        }
        if claiming_account_id == record.initiator_account_id {
            return Err(HandshakeError::SelfClaim);
        }

        // Second fee transfer uses the fee captured at initiation, not the
        // current schedule.
        let unsigned_tx_base64 = self
            .ledger
            .build_fee_transfer(receiver_wallet_address, record.mint_fee_lamports)
            .await?;

        // The store arbitrates concurrent claims: exactly one flip wins.
        if !self
            .store
            .claim_pending(handshake_id, claiming_account_id, receiver_wallet_address)
            .await?
        {
            let current = self
                .store
                .get(handshake_id)
                .await?
                .ok_or(HandshakeError::NotFound)?;
            return Err(match current.status {
                HandshakeStatus::Expired => HandshakeError::Expired,
                status => HandshakeError::InvalidState { status },
            });
        }

        let initiator_name = self
            .directory
            .display_name(&record.initiator_account_id)
            .await?;

        info!(
            handshake = %handshake_id,
            receiver = %claiming_account_id,
            "handshake claimed"
        );

        Ok(ClaimOutcome {
            status: HandshakeStatus::Matched,
            unsigned_tx_base64,
            initiator_name,
        })
    }

    /// Relay one side's signed fee payment to the ledger and record the
    /// confirmed signature.
    ///
    /// Pure relay: amounts are never re-derived here, and a retry after a
    /// lost response is safe because the gateway treats an already-landed
    /// signature as success. A broadcast or finality failure leaves the
    /// record unmodified; stale blockhashes are a retry trigger, not a
    /// protocol state change.
    pub async fn confirm_payment(
        &self,
        handshake_id: &str,
        signed_tx_base64: &str,
        side: PaymentSide,
    ) -> Result<PaymentOutcome, HandshakeError> {
        if self.store.get(handshake_id).await?.is_none() {
            return Err(HandshakeError::NotFound);
        }
        if BASE64.decode(signed_tx_base64).is_err() {
            return Err(HandshakeError::PaymentFailed {
                detail: "signed transaction is not valid base64".into(),
            });
        }

        let tx_signature = self
            .ledger
            .submit_and_confirm(signed_tx_base64)
            .await
            .map_err(|e| HandshakeError::PaymentFailed {
                detail: e.to_string(),
            })?;

        self.store
            .record_payment(handshake_id, side, &tx_signature, unix_now())
            .await?;

        let updated = self
            .store
            .get(handshake_id)
            .await?
            .ok_or(HandshakeError::NotFound)?;

        info!(
            handshake = %handshake_id,
            %side,
            signature = %tx_signature,
            both_paid = updated.both_paid(),
            "fee payment confirmed"
        );

        Ok(PaymentOutcome {
            tx_signature,
            side,
            both_paid: updated.both_paid(),
            status: updated.status,
        })
    }

    /// Mint both attestation badges and settle points.
    ///
    /// Requires a matched record with both payments confirmed. Each side's
    /// badge ref is persisted as soon as its mint lands (conditional
    /// set-if-null), so a retry after a partial failure skips the side
    /// that already minted, and two racing calls cannot double-mint. Only
    /// the caller that wins the terminal `matched → minted` flip appends
    /// the reward entries and pushes trust counts.
    pub async fn mint(&self, handshake_id: &str) -> Result<MintOutcome, HandshakeError> {
        let record = self
            .store
            .get(handshake_id)
            .await?
            .ok_or(HandshakeError::NotFound)?;

        if record.status != HandshakeStatus::Matched {
            return Err(HandshakeError::InvalidState {
                status: record.status,
            });
        }
        let initiator_paid = record.initiator_tx_signature.is_some();
        let receiver_paid = record.receiver_tx_signature.is_some();
        if !(initiator_paid && receiver_paid) {
            return Err(HandshakeError::PaymentIncomplete {
                initiator_paid,
                receiver_paid,
            });
        }

        let receiver_account_id = record.receiver_account_id.clone().ok_or_else(|| {
            HandshakeError::Store {
                detail: format!("matched record {} has no receiver account", record.id),
            }
        })?;
        let receiver_wallet = record.receiver_wallet_address.clone().ok_or_else(|| {
            HandshakeError::Store {
                detail: format!("matched record {} has no receiver wallet", record.id),
            }
        })?;

        let metadata = BadgeMetadata {
            handshake_id: record.id.clone(),
            event_title: record.event_title.clone(),
            event_datetime: record.event_datetime.clone(),
        };

        let initiator_token_ref = match record.token_ref(PaymentSide::Initiator) {
            Some(existing) => existing.to_string(),
            None => {
                self.mint_side(
                    &record.id,
                    PaymentSide::Initiator,
                    &record.initiator_wallet_address,
                    &metadata,
                )
                .await?
            }
        };

        let receiver_token_ref = match record.token_ref(PaymentSide::Receiver) {
            Some(existing) => existing.to_string(),
            None => match self
                .mint_side(&record.id, PaymentSide::Receiver, &receiver_wallet, &metadata)
                .await
            {
                Ok(token_ref) => token_ref,
                Err(e) => {
                    // The initiator's badge is already persisted; surface
                    // the partial so a retry can finish the receiver side.
                    return Err(HandshakeError::MintPartialFailure {
                        initiator_token_ref: Some(initiator_token_ref),
                        detail: e.to_string(),
                    });
                }
            },
        };

        let points = self.config.points_per_handshake;

        // Settle the ledger before the terminal flip. Entry writes are
        // keyed on (handshake, account), so a store outage here leaves the
        // record matched and a retry re-runs settlement without duplicating
        // the rows that did land. The record only turns minted once both
        // entries exist.
        let now = unix_now();
        for account_id in [&record.initiator_account_id, &receiver_account_id] {
            self.store
                .append_points(&PointsLedgerEntry {
                    account_id: account_id.to_string(),
                    handshake_id: record.id.clone(),
                    points,
                    reason: POINTS_REASON_MINTED.into(),
                    created_at: now,
                })
                .await?;
        }

        if !self.store.finalize_mint(&record.id, points).await? {
            // A concurrent mint won the terminal flip.
            let current = self
                .store
                .get(&record.id)
                .await?
                .ok_or(HandshakeError::NotFound)?;
            return Err(HandshakeError::InvalidState {
                status: current.status,
            });
        }

        // Past the flip the mint is complete and cannot be retried, so a
        // failed count push is logged, not surfaced; the directory catches
        // up on the party's next mint.
        for account_id in [&record.initiator_account_id, &receiver_account_id] {
            match self.store.minted_count(account_id).await {
                Ok(minted) => {
                    if let Err(e) = self
                        .directory
                        .record_handshake_count(account_id, minted)
                        .await
                    {
                        warn!(account = %account_id, error = %e, "trust count push failed");
                    }
                }
                Err(e) => warn!(account = %account_id, error = %e, "minted recount failed"),
            }
        }

        info!(
            handshake = %record.id,
            initiator_badge = %initiator_token_ref,
            receiver_badge = %receiver_token_ref,
            points,
            "handshake minted"
        );

        Ok(MintOutcome {
            status: HandshakeStatus::Minted,
            initiator_token_ref,
            receiver_token_ref,
            points_awarded: points,
        })
    }

    /// Mint one side's badge and persist its ref. When the conditional
    /// write loses to a concurrent mint, the already-persisted ref is
    /// authoritative.
    async fn mint_side(
        &self,
        handshake_id: &str,
        side: PaymentSide,
        owner_wallet: &str,
        metadata: &BadgeMetadata,
    ) -> Result<String, HandshakeError> {
        let receipt = self.ledger.mint_badge(owner_wallet, metadata).await?;
        if self
            .store
            .set_token_ref(handshake_id, side, &receipt.token_ref)
            .await?
        {
            return Ok(receipt.token_ref);
        }

        warn!(
            handshake = %handshake_id,
            %side,
            "lost token-ref race; keeping the persisted badge"
        );
        let current = self
            .store
            .get(handshake_id)
            .await?
            .ok_or(HandshakeError::NotFound)?;
        current
            .token_ref(side)
            .map(str::to_string)
            .ok_or_else(|| HandshakeError::Store {
                detail: format!("token ref for {side} vanished after lost race"),
            })
    }

    /// Inbound pending handshakes addressed to this account's identifiers.
    /// Read-only; an empty inbox is a normal empty result.
    pub async fn list_pending_for(
        &self,
        account_id: &str,
    ) -> Result<Vec<PendingHandshake>, HandshakeError> {
        let identifiers = self.directory.account_identifiers(account_id).await?;
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let mut inbox = Vec::new();
        for record in self.store.list_open_pending().await? {
            if record.initiator_account_id == account_id {
                continue;
            }
            if !identifiers.matches(&record.receiver_identifier) {
                continue;
            }
            let initiator_name = self
                .directory
                .display_name(&record.initiator_account_id)
                .await?;
            inbox.push(PendingHandshake {
                record,
                initiator_name,
            });
        }
        Ok(inbox)
    }
}

// ── Expiry sweep ────────────────────────────────────────────────

/// Flip every overdue pending record to expired; returns the flip count.
///
/// Optional hardening on top of lazy expiry at claim time: correctness
/// never depends on this running.
pub async fn expire_overdue<S: RecordStore>(store: &S, now: i64) -> Result<u64, HandshakeError> {
    let mut flipped = 0u64;
    for record in store.list_overdue(now).await? {
        if store.expire_pending(&record.id).await? {
            flipped += 1;
            info!(handshake = %record.id, "expired unclaimed handshake");
        }
    }
    Ok(flipped)
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::directory::ContactProfile;
    use crate::identity::AccountIdentifiers;
    use crate::ledger::MintReceipt;
    use crate::memory::MemoryStore;
    use crate::record::MintProgress;

    // Mock directory: accounts with identifiers/names, contacts per owner.
    #[derive(Default)]
    struct StubDirectory {
        accounts: HashMap<String, (AccountIdentifiers, String)>,
        contacts: HashMap<(String, String), ContactProfile>,
        counts: Mutex<HashMap<String, u64>>,
    }

    impl StubDirectory {
        fn with_account(mut self, id: &str, handle: Option<&str>, email: Option<&str>) -> Self {
            self.accounts.insert(
                id.into(),
                (
                    AccountIdentifiers {
                        handle: handle.map(Into::into),
                        email: email.map(Into::into),
                    },
                    format!("name-of-{id}"),
                ),
            );
            self
        }

        fn with_contact(mut self, owner: &str, contact: &str, identifier: Option<&str>) -> Self {
            self.contacts.insert(
                (owner.into(), contact.into()),
                ContactProfile {
                    identifier: identifier.map(Into::into),
                    display_name: format!("contact-{contact}"),
                    event_id: Some("ev-1".into()),
                    event_title: Some("Rust Meetup".into()),
                    event_datetime: Some("2026-03-01T18:00:00Z".into()),
                },
            );
            self
        }
    }

    #[async_trait]
    impl IdentityResolver for &StubDirectory {
        async fn resolve_contact(
            &self,
            account_id: &str,
            contact_id: &str,
        ) -> Result<Option<ContactProfile>, HandshakeError> {
            Ok(self
                .contacts
                .get(&(account_id.to_string(), contact_id.to_string()))
                .cloned())
        }

        async fn account_identifiers(
            &self,
            account_id: &str,
        ) -> Result<AccountIdentifiers, HandshakeError> {
            Ok(self
                .accounts
                .get(account_id)
                .map(|(ids, _)| ids.clone())
                .unwrap_or_default())
        }

        async fn display_name(&self, account_id: &str) -> Result<String, HandshakeError> {
            Ok(self
                .accounts
                .get(account_id)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| account_id.to_string()))
        }

        async fn record_handshake_count(
            &self,
            account_id: &str,
            minted: u64,
        ) -> Result<(), HandshakeError> {
            self.counts
                .lock()
                .unwrap()
                .insert(account_id.to_string(), minted);
            Ok(())
        }
    }

    // Mock ledger: deterministic unsigned payloads and badge refs, with
    // injectable failures.
    #[derive(Default)]
    struct StubLedger {
        seq: AtomicU64,
        fail_submit: std::sync::atomic::AtomicBool,
        fail_mint_wallets: Mutex<Vec<String>>,
    }

    impl StubLedger {
        fn fail_mints_for(&self, wallet: &str) {
            self.fail_mint_wallets.lock().unwrap().push(wallet.into());
        }
    }

    #[async_trait]
    impl LedgerGateway for &StubLedger {
        async fn build_fee_transfer(
            &self,
            from_wallet: &str,
            lamports: u64,
        ) -> Result<String, HandshakeError> {
            Ok(BASE64.encode(format!("transfer:{from_wallet}:{lamports}")))
        }

        async fn submit_and_confirm(
            &self,
            _signed_tx_base64: &str,
        ) -> Result<String, HandshakeError> {
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(HandshakeError::Ledger {
                    detail: "blockhash not found".into(),
                });
            }
            Ok(format!("sig-{}", self.seq.fetch_add(1, Ordering::SeqCst)))
        }

        async fn mint_badge(
            &self,
            owner_wallet: &str,
            metadata: &BadgeMetadata,
        ) -> Result<MintReceipt, HandshakeError> {
            if self
                .fail_mint_wallets
                .lock()
                .unwrap()
                .iter()
                .any(|w| w == owner_wallet)
            {
                return Err(HandshakeError::Ledger {
                    detail: format!("mint rejected for {owner_wallet}"),
                });
            }
            let n = self.seq.fetch_add(1, Ordering::SeqCst);
            Ok(MintReceipt {
                token_ref: format!("badge-{owner_wallet}-{}", metadata.handshake_id),
                signature: format!("mint-sig-{n}"),
            })
        }
    }

    // Store wrapper that fails one chosen append_points call, for
    // exercising outages in the middle of mint settlement.
    #[derive(Clone)]
    struct OutageStore {
        inner: MemoryStore,
        fail_on_append: Arc<AtomicU32>,
        append_calls: Arc<AtomicU32>,
    }

    impl OutageStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_on_append: Arc::new(AtomicU32::new(0)),
                append_calls: Arc::new(AtomicU32::new(0)),
            }
        }

        /// Fail the n-th append_points call (1-based), once.
        fn fail_append_number(&self, n: u32) {
            self.fail_on_append.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RecordStore for OutageStore {
        async fn create(&self, record: &HandshakeRecord) -> Result<(), HandshakeError> {
            self.inner.create(record).await
        }

        async fn get(&self, id: &str) -> Result<Option<HandshakeRecord>, HandshakeError> {
            self.inner.get(id).await
        }

        async fn find_active(
            &self,
            initiator_account_id: &str,
            contact_id: &str,
        ) -> Result<Option<HandshakeRecord>, HandshakeError> {
            self.inner.find_active(initiator_account_id, contact_id).await
        }

        async fn list_open_pending(&self) -> Result<Vec<HandshakeRecord>, HandshakeError> {
            self.inner.list_open_pending().await
        }

        async fn list_overdue(&self, now: i64) -> Result<Vec<HandshakeRecord>, HandshakeError> {
            self.inner.list_overdue(now).await
        }

        async fn claim_pending(
            &self,
            id: &str,
            receiver_account_id: &str,
            receiver_wallet_address: &str,
        ) -> Result<bool, HandshakeError> {
            self.inner
                .claim_pending(id, receiver_account_id, receiver_wallet_address)
                .await
        }

        async fn expire_pending(&self, id: &str) -> Result<bool, HandshakeError> {
            self.inner.expire_pending(id).await
        }

        async fn record_payment(
            &self,
            id: &str,
            side: PaymentSide,
            tx_signature: &str,
            paid_at: i64,
        ) -> Result<(), HandshakeError> {
            self.inner.record_payment(id, side, tx_signature, paid_at).await
        }

        async fn set_token_ref(
            &self,
            id: &str,
            side: PaymentSide,
            token_ref: &str,
        ) -> Result<bool, HandshakeError> {
            self.inner.set_token_ref(id, side, token_ref).await
        }

        async fn finalize_mint(
            &self,
            id: &str,
            points_awarded: u32,
        ) -> Result<bool, HandshakeError> {
            self.inner.finalize_mint(id, points_awarded).await
        }

        async fn append_points(&self, entry: &PointsLedgerEntry) -> Result<bool, HandshakeError> {
            let call = self.append_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on_append.load(Ordering::SeqCst) {
                return Err(HandshakeError::Store {
                    detail: "transient outage".into(),
                });
            }
            self.inner.append_points(entry).await
        }

        async fn minted_count(&self, account_id: &str) -> Result<u64, HandshakeError> {
            self.inner.minted_count(account_id).await
        }
    }

    fn world() -> (MemoryStore, StubLedger, StubDirectory) {
        let directory = StubDirectory::default()
            .with_account("acct-a", Some("@alfa"), Some("alfa@example.com"))
            .with_account("acct-b", Some("@bee"), Some("bee@example.com"))
            .with_account("acct-c", Some("@cee"), None)
            .with_contact("acct-a", "contact-of-b", Some("@Bee"))
            .with_contact("acct-a", "contact-empty", None);
        (MemoryStore::new(), StubLedger::default(), directory)
    }

    fn coordinator<'a>(
        store: &MemoryStore,
        ledger: &'a StubLedger,
        directory: &'a StubDirectory,
    ) -> Coordinator<MemoryStore, &'a StubLedger, &'a StubDirectory> {
        Coordinator::new(store.clone(), ledger, directory, CoordinatorConfig::default())
    }

    // Drives one handshake to Matched with both fees confirmed.
    async fn matched_handshake(
        coord: &Coordinator<MemoryStore, &StubLedger, &StubDirectory>,
    ) -> String {
        let initiated = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap();
        let id = initiated.handshake_id;
        coord.claim(&id, "acct-b", "walletB").await.unwrap();
        coord
            .confirm_payment(&id, &BASE64.encode("signed-a"), PaymentSide::Initiator)
            .await
            .unwrap();
        coord
            .confirm_payment(&id, &BASE64.encode("signed-b"), PaymentSide::Receiver)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_scenario_a_full_lifecycle() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let initiated = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap();
        assert_eq!(initiated.receiver_identifier, "@Bee");
        assert_eq!(initiated.counterparty_name, "contact-contact-of-b");
        let id = initiated.handshake_id.clone();
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            HandshakeStatus::Pending
        );

        let claimed = coord.claim(&id, "acct-b", "walletB").await.unwrap();
        assert_eq!(claimed.status, HandshakeStatus::Matched);
        assert_eq!(claimed.initiator_name, "name-of-acct-a");

        let first = coord
            .confirm_payment(&id, &BASE64.encode("signed-a"), PaymentSide::Initiator)
            .await
            .unwrap();
        assert!(!first.both_paid);
        let second = coord
            .confirm_payment(&id, &BASE64.encode("signed-b"), PaymentSide::Receiver)
            .await
            .unwrap();
        assert!(second.both_paid);

        let minted = coord.mint(&id).await.unwrap();
        assert_eq!(minted.status, HandshakeStatus::Minted);
        assert_eq!(minted.points_awarded, 10);
        assert_ne!(minted.initiator_token_ref, minted.receiver_token_ref);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, HandshakeStatus::Minted);
        assert_eq!(record.points_awarded, 10);
        assert_eq!(record.mint_progress(), MintProgress::Both);

        let entries = store.points_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.points == 10
            && e.reason == POINTS_REASON_MINTED
            && e.handshake_id == id));

        // Both parties' trust counts were pushed.
        let counts = directory.counts.lock().unwrap();
        assert_eq!(counts.get("acct-a"), Some(&1));
        assert_eq!(counts.get("acct-b"), Some(&1));
    }

    #[tokio::test]
    async fn test_scenario_b_duplicate_initiation() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let first = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap();
        let err = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap_err();
        match err {
            HandshakeError::DuplicateHandshake { existing, status } => {
                assert_eq!(existing, first.handshake_id);
                assert_eq!(status, HandshakeStatus::Pending);
            }
            other => panic!("expected DuplicateHandshake, got {other:?}"),
        }
        // P4: still exactly one record.
        assert_eq!(store.list_open_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_unmatched_claimant_rejected() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        let err = coord.claim(&id, "acct-c", "walletC").await.unwrap_err();
        assert!(matches!(err, HandshakeError::NotAuthorized));
        // Record untouched.
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            HandshakeStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_scenario_d_mint_before_claim() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        let err = coord.mint(&id).await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::InvalidState {
                status: HandshakeStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn test_p1_concurrent_claims_one_winner() {
        let (store, ledger, directory) = world();
        // Both b and c resolve to the addressed identifier.
        let directory = directory.with_account("acct-c", Some("@bee"), None);
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;

        let (b, c) = tokio::join!(
            coord.claim(&id, "acct-b", "walletB"),
            coord.claim(&id, "acct-c", "walletC"),
        );
        let wins = [b.is_ok(), c.is_ok()].iter().filter(|&&w| w).count();
        assert_eq!(wins, 1, "exactly one claim must win");
        let loser = if b.is_ok() { c } else { b };
        assert!(matches!(
            loser.unwrap_err(),
            HandshakeError::InvalidState {
                status: HandshakeStatus::Matched
            }
        ));

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, HandshakeStatus::Matched);
        assert!(record.receiver_account_id.is_some());
    }

    #[tokio::test]
    async fn test_p2_authorization_regardless_of_identifier_style() {
        let (store, ledger, directory) = world();
        // Email-only claimer: the contact is addressed by handle, and the
        // stored handle matches the account's handle case-insensitively
        // with or without '@'.
        let directory = directory.with_account("acct-d", None, Some("BEE@example.com"));
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        // acct-d's email does not match the stored handle "@Bee".
        assert!(matches!(
            coord.claim(&id, "acct-d", "walletD").await.unwrap_err(),
            HandshakeError::NotAuthorized
        ));
        // acct-b's handle does, despite case and '@' differences.
        assert!(coord.claim(&id, "acct-b", "walletB").await.is_ok());
    }

    #[tokio::test]
    async fn test_p3_mint_requires_both_payments() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        coord.claim(&id, "acct-b", "walletB").await.unwrap();
        coord
            .confirm_payment(&id, &BASE64.encode("signed-a"), PaymentSide::Initiator)
            .await
            .unwrap();

        let before = store.get(&id).await.unwrap().unwrap();
        let err = coord.mint(&id).await.unwrap_err();
        match err {
            HandshakeError::PaymentIncomplete {
                initiator_paid,
                receiver_paid,
            } => {
                assert!(initiator_paid);
                assert!(!receiver_paid);
            }
            other => panic!("expected PaymentIncomplete, got {other:?}"),
        }
        let after = store.get(&id).await.unwrap().unwrap();
        assert_eq!(after.status, before.status);
        assert!(after.initiator_token_ref.is_none());
        assert!(store.points_entries().is_empty());
    }

    #[tokio::test]
    async fn test_p5_terminal_states_are_sticky() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = matched_handshake(&coord).await;
        coord.mint(&id).await.unwrap();

        assert!(matches!(
            coord.claim(&id, "acct-b", "walletB").await.unwrap_err(),
            HandshakeError::InvalidState {
                status: HandshakeStatus::Minted
            }
        ));
        assert!(matches!(
            coord.mint(&id).await.unwrap_err(),
            HandshakeError::InvalidState {
                status: HandshakeStatus::Minted
            }
        ));
        // The sweep cannot touch a minted record either.
        assert!(!store.expire_pending(&id).await.unwrap());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            HandshakeStatus::Minted
        );
    }

    #[tokio::test]
    async fn test_p6_expiry_enforced_at_claim_time() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        // Rewind the TTL directly in the store.
        {
            let mut record = store.get(&id).await.unwrap().unwrap();
            record.expires_at = 1;
            store.expire_pending(&id).await.unwrap();
            // Recreate as an overdue pending record to exercise the lazy path.
            record.status = HandshakeStatus::Pending;
            record.id = "h-overdue".into();
            store.create(&record).await.unwrap();
        }

        let err = coord
            .claim("h-overdue", "acct-b", "walletB")
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Expired));
        assert_eq!(
            store.get("h-overdue").await.unwrap().unwrap().status,
            HandshakeStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_self_claim_rejected() {
        let (store, ledger, directory) = world();
        // The initiator's own handle happens to match the contact string.
        let directory = directory.with_account("acct-a", Some("@bee"), None);
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        assert!(matches!(
            coord.claim(&id, "acct-a", "walletA").await.unwrap_err(),
            HandshakeError::SelfClaim
        ));
    }

    #[tokio::test]
    async fn test_initiate_rejects_uncontactable_contact() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        assert!(matches!(
            coord
                .initiate("acct-a", "contact-empty", "walletA")
                .await
                .unwrap_err(),
            HandshakeError::InvalidCounterparty
        ));
        assert!(matches!(
            coord
                .initiate("acct-a", "no-such-contact", "walletA")
                .await
                .unwrap_err(),
            HandshakeError::InvalidCounterparty
        ));
        // Contact ownership: acct-b does not own acct-a's contact.
        assert!(matches!(
            coord
                .initiate("acct-b", "contact-of-b", "walletB")
                .await
                .unwrap_err(),
            HandshakeError::InvalidCounterparty
        ));
    }

    #[tokio::test]
    async fn test_payment_failure_leaves_record_unmodified() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        coord.claim(&id, "acct-b", "walletB").await.unwrap();

        ledger.fail_submit.store(true, Ordering::SeqCst);
        let err = coord
            .confirm_payment(&id, &BASE64.encode("signed-a"), PaymentSide::Initiator)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::PaymentFailed { .. }));

        let record = store.get(&id).await.unwrap().unwrap();
        assert!(record.initiator_tx_signature.is_none());
        assert!(record.initiator_minted_at.is_none());

        // A retry with a fresh transaction succeeds.
        ledger.fail_submit.store(false, Ordering::SeqCst);
        let outcome = coord
            .confirm_payment(&id, &BASE64.encode("signed-a2"), PaymentSide::Initiator)
            .await
            .unwrap();
        assert_eq!(outcome.side, PaymentSide::Initiator);
    }

    #[tokio::test]
    async fn test_partial_mint_persists_and_retries() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = matched_handshake(&coord).await;

        // Receiver-side mint fails; the initiator's badge must survive.
        ledger.fail_mints_for("walletB");
        let err = coord.mint(&id).await.unwrap_err();
        let surviving = match err {
            HandshakeError::MintPartialFailure {
                initiator_token_ref,
                ..
            } => initiator_token_ref.expect("initiator badge persisted"),
            other => panic!("expected MintPartialFailure, got {other:?}"),
        };

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, HandshakeStatus::Matched);
        assert_eq!(record.mint_progress(), MintProgress::InitiatorOnly);
        assert_eq!(record.initiator_token_ref.as_deref(), Some(&*surviving));
        assert!(store.points_entries().is_empty());

        // Retry finishes only the receiver side and settles points once.
        ledger.fail_mint_wallets.lock().unwrap().clear();
        let minted = coord.mint(&id).await.unwrap();
        assert_eq!(minted.initiator_token_ref, surviving);
        assert_eq!(minted.status, HandshakeStatus::Minted);
        assert_eq!(store.points_entries().len(), 2);
    }

    #[tokio::test]
    async fn test_mint_retry_after_points_write_outage() {
        let (_, ledger, directory) = world();
        let store = OutageStore::new();
        let coord = Coordinator::new(
            store.clone(),
            &ledger,
            &directory,
            CoordinatorConfig::default(),
        );

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        coord.claim(&id, "acct-b", "walletB").await.unwrap();
        coord
            .confirm_payment(&id, &BASE64.encode("signed-a"), PaymentSide::Initiator)
            .await
            .unwrap();
        coord
            .confirm_payment(&id, &BASE64.encode("signed-b"), PaymentSide::Receiver)
            .await
            .unwrap();

        // The initiator's ledger entry lands, then the store drops out.
        store.fail_append_number(2);
        let err = coord.mint(&id).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Store { .. }));

        // The record must not be terminal yet, otherwise the retry below
        // would be rejected and the missing entry unrecoverable.
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, HandshakeStatus::Matched);
        assert_eq!(record.points_awarded, 0);
        assert_eq!(store.inner.points_entries().len(), 1);

        // Retry finishes settlement without duplicating the entry that
        // already landed.
        let minted = coord.mint(&id).await.unwrap();
        assert_eq!(minted.status, HandshakeStatus::Minted);
        let entries = store.inner.points_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.account_id == "acct-a"));
        assert!(entries.iter().any(|e| e.account_id == "acct-b"));
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().points_awarded,
            minted.points_awarded
        );
    }

    #[tokio::test]
    async fn test_concurrent_mint_single_settlement() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = matched_handshake(&coord).await;
        let (m1, m2) = tokio::join!(coord.mint(&id), coord.mint(&id));
        let wins = [m1.is_ok(), m2.is_ok()].iter().filter(|&&w| w).count();
        assert_eq!(wins, 1, "exactly one mint call may settle");
        assert_eq!(store.points_entries().len(), 2);
    }

    #[tokio::test]
    async fn test_list_pending_for_inbox() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;

        // Addressed party sees it, enriched with the initiator's name.
        let inbox = coord.list_pending_for("acct-b").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].record.id, id);
        assert_eq!(inbox[0].initiator_name, "name-of-acct-a");

        // Non-addressed and initiator accounts see nothing.
        assert!(coord.list_pending_for("acct-c").await.unwrap().is_empty());
        assert!(coord.list_pending_for("acct-a").await.unwrap().is_empty());

        // Claimed records leave the inbox.
        coord.claim(&id, "acct-b", "walletB").await.unwrap();
        assert!(coord.list_pending_for("acct-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_overdue_sweep() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);

        let id = coord
            .initiate("acct-a", "contact-of-b", "walletA")
            .await
            .unwrap()
            .handshake_id;
        let record = store.get(&id).await.unwrap().unwrap();

        // Not yet overdue: sweep is a no-op.
        assert_eq!(expire_overdue(&store, record.created_at).await.unwrap(), 0);
        // Past the TTL: exactly one flip, and the sweep is idempotent.
        let later = record.expires_at + 1;
        assert_eq!(expire_overdue(&store, later).await.unwrap(), 1);
        assert_eq!(expire_overdue(&store, later).await.unwrap(), 0);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            HandshakeStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_confirm_payment_unknown_record() {
        let (store, ledger, directory) = world();
        let coord = coordinator(&store, &ledger, &directory);
        assert!(matches!(
            coord
                .confirm_payment("nope", &BASE64.encode("tx"), PaymentSide::Initiator)
                .await
                .unwrap_err(),
            HandshakeError::NotFound
        ));
    }
}
