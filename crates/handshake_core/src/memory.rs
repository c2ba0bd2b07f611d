//! In-memory record store for tests and local development.
//!
//! Implements the exact conditional-update semantics of the trait under a
//! single mutex, so the race properties of claim/mint are unit-testable
//! without a hosted database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::HandshakeError;
use crate::record::{HandshakeRecord, HandshakeStatus, PaymentSide, PointsLedgerEntry};
use crate::store::RecordStore;

#[derive(Default)]
struct Inner {
    records: HashMap<String, HandshakeRecord>,
    points: Vec<PointsLedgerEntry>,
}

/// Cloning shares the underlying map, so one handle can live inside a
/// coordinator while another observes it.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

/// Recover from poisoned locks rather than propagating panics.
fn lock_or_recover(mutex: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All reward entries appended so far, oldest first.
    pub fn points_entries(&self) -> Vec<PointsLedgerEntry> {
        lock_or_recover(&self.inner).points.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, record: &HandshakeRecord) -> Result<(), HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        if inner.records.contains_key(&record.id) {
            return Err(HandshakeError::Store {
                detail: format!("record {} already exists", record.id),
            });
        }
        inner.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<HandshakeRecord>, HandshakeError> {
        Ok(lock_or_recover(&self.inner).records.get(id).cloned())
    }

    async fn find_active(
        &self,
        initiator_account_id: &str,
        contact_id: &str,
    ) -> Result<Option<HandshakeRecord>, HandshakeError> {
        let inner = lock_or_recover(&self.inner);
        Ok(inner
            .records
            .values()
            .filter(|r| {
                r.initiator_account_id == initiator_account_id
                    && r.contact_id == contact_id
                    && !r.status.is_terminal()
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_open_pending(&self) -> Result<Vec<HandshakeRecord>, HandshakeError> {
        let inner = lock_or_recover(&self.inner);
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == HandshakeStatus::Pending && r.receiver_account_id.is_none())
            .cloned()
            .collect())
    }

    async fn list_overdue(&self, now: i64) -> Result<Vec<HandshakeRecord>, HandshakeError> {
        let inner = lock_or_recover(&self.inner);
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == HandshakeStatus::Pending && r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn claim_pending(
        &self,
        id: &str,
        receiver_account_id: &str,
        receiver_wallet_address: &str,
    ) -> Result<bool, HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        let Some(record) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        if record.status != HandshakeStatus::Pending {
            return Ok(false);
        }
        record.receiver_account_id = Some(receiver_account_id.to_string());
        record.receiver_wallet_address = Some(receiver_wallet_address.to_string());
        record.status = HandshakeStatus::Matched;
        Ok(true)
    }

    async fn expire_pending(&self, id: &str) -> Result<bool, HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        let Some(record) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        if record.status != HandshakeStatus::Pending {
            return Ok(false);
        }
        record.status = HandshakeStatus::Expired;
        Ok(true)
    }

    async fn record_payment(
        &self,
        id: &str,
        side: PaymentSide,
        tx_signature: &str,
        paid_at: i64,
    ) -> Result<(), HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        let record = inner.records.get_mut(id).ok_or(HandshakeError::NotFound)?;
        match side {
            PaymentSide::Initiator => {
                record.initiator_tx_signature = Some(tx_signature.to_string());
                record.initiator_minted_at = Some(paid_at);
            }
            PaymentSide::Receiver => {
                record.receiver_tx_signature = Some(tx_signature.to_string());
                record.receiver_minted_at = Some(paid_at);
            }
        }
        Ok(())
    }

    async fn set_token_ref(
        &self,
        id: &str,
        side: PaymentSide,
        token_ref: &str,
    ) -> Result<bool, HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        let record = inner.records.get_mut(id).ok_or(HandshakeError::NotFound)?;
        let slot = match side {
            PaymentSide::Initiator => &mut record.initiator_token_ref,
            PaymentSide::Receiver => &mut record.receiver_token_ref,
        };
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(token_ref.to_string());
        Ok(true)
    }

    async fn finalize_mint(&self, id: &str, points_awarded: u32) -> Result<bool, HandshakeError> {
        let mut inner = lock_or_recover(&self.inner);
        let Some(record) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        if record.status != HandshakeStatus::Matched {
            return Ok(false);
        }
        record.status = HandshakeStatus::Minted;
        record.points_awarded = points_awarded;
        Ok(true)
    }

    async fn append_points(&self, entry: &PointsLedgerEntry) -> Result<bool, HandshakeError> {
        let mut entry = entry.clone();
        if entry.created_at == 0 {
            entry.created_at = unix_now();
        }
        let mut inner = lock_or_recover(&self.inner);
        if inner
            .points
            .iter()
            .any(|e| e.handshake_id == entry.handshake_id && e.account_id == entry.account_id)
        {
            return Ok(false);
        }
        inner.points.push(entry);
        Ok(true)
    }

    async fn minted_count(&self, account_id: &str) -> Result<u64, HandshakeError> {
        let inner = lock_or_recover(&self.inner);
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == HandshakeStatus::Minted && r.involves(account_id))
            .count() as u64)
    }
}
