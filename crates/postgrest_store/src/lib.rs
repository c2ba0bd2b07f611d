//! PostgREST-backed Record Store and Identity Resolver.
//!
//! Rows live in a hosted Postgres exposed over a PostgREST-style REST API
//! (`/rest/v1/<table>` with query-string filters). All requests carry the
//! service-role key, so row-level security never applies here; the
//! coordinator is the only writer.
//!
//! Race arbitration happens in the database: every conditional transition
//! (claim flip, token-ref set-if-null, terminal mint flip, expiry) is a
//! filtered PATCH with `Prefer: return=representation`, and the caller
//! learns whether it won by whether any row came back. No read-check-write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use handshake_core::directory::{ContactProfile, IdentityResolver};
use handshake_core::error::HandshakeError;
use handshake_core::identity::AccountIdentifiers;
use handshake_core::record::{HandshakeRecord, PaymentSide, PointsLedgerEntry};
use handshake_core::store::RecordStore;

const HANDSHAKES_TABLE: &str = "handshakes";
const POINTS_TABLE: &str = "points_ledger";
const CONTACTS_TABLE: &str = "contacts";
const PROFILES_TABLE: &str = "profiles";

// ── REST plumbing ───────────────────────────────────────────────

/// Shared connection handle: base URL + service-role key. Cloning is cheap
/// (reqwest clients share their pool), so the store and the resolver can
/// wrap the same `Api`.
#[derive(Clone)]
pub struct Api {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl Api {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            service_key: service_key.into(),
        }
    }

    /// Reads `HANDSHAKE_DB_URL` and `HANDSHAKE_DB_SERVICE_KEY`.
    pub fn from_env() -> Result<Self, String> {
        let base_url =
            std::env::var("HANDSHAKE_DB_URL").map_err(|_| "HANDSHAKE_DB_URL is not set")?;
        let service_key = std::env::var("HANDSHAKE_DB_SERVICE_KEY")
            .map_err(|_| "HANDSHAKE_DB_SERVICE_KEY is not set")?;
        Ok(Self::new(base_url, service_key))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    /// GET rows matching the query pairs.
    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, HandshakeError> {
        let response = self
            .with_auth(self.client.get(self.table_url(table)))
            .query(query)
            .send()
            .await
            .map_err(|e| store_err(format!("GET {table}: {e}")))?;
        let response = check_status(table, response).await?;
        response
            .json()
            .await
            .map_err(|e| store_err(format!("GET {table}: invalid response body: {e}")))
    }

    /// POST one row; the caller does not need the inserted representation.
    async fn insert<T: Serialize>(&self, table: &str, row: &T) -> Result<(), HandshakeError> {
        let response = self
            .with_auth(self.client.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| store_err(format!("POST {table}: {e}")))?;
        check_status(table, response).await?;
        Ok(())
    }

    /// POST one row, skipping it when a row with the same `on_conflict`
    /// key already exists. Returns whether the row was actually inserted.
    async fn insert_if_absent<T: Serialize>(
        &self,
        table: &str,
        on_conflict: &str,
        row: &T,
    ) -> Result<bool, HandshakeError> {
        let response = self
            .with_auth(self.client.post(self.table_url(table)))
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .query(&[("on_conflict", on_conflict)])
            .json(row)
            .send()
            .await
            .map_err(|e| store_err(format!("POST {table}: {e}")))?;
        let response = check_status(table, response).await?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| store_err(format!("POST {table}: invalid response body: {e}")))?;
        Ok(!rows.is_empty())
    }

    /// Filtered PATCH returning the updated rows. An empty result means the
    /// filter matched nothing, which is how conditional transitions report
    /// a lost race.
    async fn update_where(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, HandshakeError> {
        let response = self
            .with_auth(self.client.patch(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(filters)
            .json(body)
            .send()
            .await
            .map_err(|e| store_err(format!("PATCH {table}: {e}")))?;
        let response = check_status(table, response).await?;
        response
            .json()
            .await
            .map_err(|e| store_err(format!("PATCH {table}: invalid response body: {e}")))
    }
}

fn store_err(detail: impl Into<String>) -> HandshakeError {
    HandshakeError::Store {
        detail: detail.into(),
    }
}

fn identity_err(detail: impl Into<String>) -> HandshakeError {
    HandshakeError::Identity {
        detail: detail.into(),
    }
}

async fn check_status(
    table: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, HandshakeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(store_err(format!("{table}: HTTP {status}: {body}")))
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn token_ref_column(side: PaymentSide) -> &'static str {
    match side {
        PaymentSide::Initiator => "initiator_token_ref",
        PaymentSide::Receiver => "receiver_token_ref",
    }
}

/// Query for minted records where one party column equals `account_id`.
/// The id travels as a plain `eq.` value, never spliced into composite
/// filter syntax, so ids containing `,` or `)` stay opaque.
fn minted_side_query(column: &'static str, account_id: &str) -> [(&'static str, String); 3] {
    [
        ("status", "eq.minted".to_string()),
        (column, eq(account_id)),
        ("select", "id".to_string()),
    ]
}

// ── Record Store ────────────────────────────────────────────────

/// [`RecordStore`] over the `handshakes` and `points_ledger` tables.
/// `HandshakeRecord` serializes directly as the row shape.
#[derive(Clone)]
pub struct PostgrestStore {
    api: Api,
}

impl PostgrestStore {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn create(&self, record: &HandshakeRecord) -> Result<(), HandshakeError> {
        debug!(id = %record.id, "inserting handshake row");
        self.api.insert(HANDSHAKES_TABLE, record).await
    }

    async fn get(&self, id: &str) -> Result<Option<HandshakeRecord>, HandshakeError> {
        let mut rows: Vec<HandshakeRecord> = self
            .api
            .select(
                HANDSHAKES_TABLE,
                &[("id", eq(id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn find_active(
        &self,
        initiator_account_id: &str,
        contact_id: &str,
    ) -> Result<Option<HandshakeRecord>, HandshakeError> {
        let mut rows: Vec<HandshakeRecord> = self
            .api
            .select(
                HANDSHAKES_TABLE,
                &[
                    ("initiator_account_id", eq(initiator_account_id)),
                    ("contact_id", eq(contact_id)),
                    ("status", "in.(pending,matched)".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn list_open_pending(&self) -> Result<Vec<HandshakeRecord>, HandshakeError> {
        self.api
            .select(
                HANDSHAKES_TABLE,
                &[
                    ("status", "eq.pending".to_string()),
                    ("receiver_account_id", "is.null".to_string()),
                ],
            )
            .await
    }

    async fn list_overdue(&self, now: i64) -> Result<Vec<HandshakeRecord>, HandshakeError> {
        self.api
            .select(
                HANDSHAKES_TABLE,
                &[
                    ("status", "eq.pending".to_string()),
                    ("expires_at", format!("lte.{now}")),
                ],
            )
            .await
    }

    async fn claim_pending(
        &self,
        id: &str,
        receiver_account_id: &str,
        receiver_wallet_address: &str,
    ) -> Result<bool, HandshakeError> {
        let rows = self
            .api
            .update_where(
                HANDSHAKES_TABLE,
                &[("id", eq(id)), ("status", "eq.pending".to_string())],
                &serde_json::json!({
                    "status": "matched",
                    "receiver_account_id": receiver_account_id,
                    "receiver_wallet_address": receiver_wallet_address,
                }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn expire_pending(&self, id: &str) -> Result<bool, HandshakeError> {
        let rows = self
            .api
            .update_where(
                HANDSHAKES_TABLE,
                &[("id", eq(id)), ("status", "eq.pending".to_string())],
                &serde_json::json!({ "status": "expired" }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn record_payment(
        &self,
        id: &str,
        side: PaymentSide,
        tx_signature: &str,
        paid_at: i64,
    ) -> Result<(), HandshakeError> {
        let body = match side {
            PaymentSide::Initiator => serde_json::json!({
                "initiator_tx_signature": tx_signature,
                "initiator_minted_at": paid_at,
            }),
            PaymentSide::Receiver => serde_json::json!({
                "receiver_tx_signature": tx_signature,
                "receiver_minted_at": paid_at,
            }),
        };
        let rows = self
            .api
            .update_where(HANDSHAKES_TABLE, &[("id", eq(id))], &body)
            .await?;
        if rows.is_empty() {
            return Err(HandshakeError::NotFound);
        }
        Ok(())
    }

    async fn set_token_ref(
        &self,
        id: &str,
        side: PaymentSide,
        token_ref: &str,
    ) -> Result<bool, HandshakeError> {
        let column = token_ref_column(side);
        let rows = self
            .api
            .update_where(
                HANDSHAKES_TABLE,
                &[("id", eq(id)), (column, "is.null".to_string())],
                &serde_json::json!({ column: token_ref }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn finalize_mint(&self, id: &str, points_awarded: u32) -> Result<bool, HandshakeError> {
        let rows = self
            .api
            .update_where(
                HANDSHAKES_TABLE,
                &[("id", eq(id)), ("status", "eq.matched".to_string())],
                &serde_json::json!({
                    "status": "minted",
                    "points_awarded": points_awarded,
                }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn append_points(&self, entry: &PointsLedgerEntry) -> Result<bool, HandshakeError> {
        // Relies on the unique index on (handshake_id, account_id).
        self.api
            .insert_if_absent(POINTS_TABLE, "handshake_id,account_id", entry)
            .await
    }

    async fn minted_count(&self, account_id: &str) -> Result<u64, HandshakeError> {
        #[derive(Deserialize)]
        struct IdRow {
            #[allow(dead_code)]
            id: String,
        }
        // One lookup per party column. A party never appears on both sides
        // of a record (self-claims are rejected), so the sum is exact.
        let mut total = 0u64;
        for column in ["initiator_account_id", "receiver_account_id"] {
            let rows: Vec<IdRow> = self
                .api
                .select(HANDSHAKES_TABLE, &minted_side_query(column, account_id))
                .await?;
            total += rows.len() as u64;
        }
        Ok(total)
    }
}

// ── Identity Resolver ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContactRow {
    #[allow(dead_code)]
    id: String,
    display_name: String,
    handle: Option<String>,
    email: Option<String>,
    event_id: Option<String>,
    event_title: Option<String>,
    event_datetime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[allow(dead_code)]
    id: String,
    display_name: String,
    handle: Option<String>,
    email: Option<String>,
}

/// Handle falling back to email; blank strings count as absent.
fn contact_identifier(handle: Option<&str>, email: Option<&str>) -> Option<String> {
    let non_blank = |s: &&str| !s.trim().is_empty();
    handle
        .filter(non_blank)
        .or(email.filter(non_blank))
        .map(str::to_string)
}

/// [`IdentityResolver`] over the `contacts` and `profiles` tables.
#[derive(Clone)]
pub struct PostgrestDirectory {
    api: Api,
}

impl PostgrestDirectory {
    pub fn new(api: Api) -> Self {
        Self { api }
    }

    async fn profile(&self, account_id: &str) -> Result<Option<ProfileRow>, HandshakeError> {
        let mut rows: Vec<ProfileRow> = self
            .api
            .select(
                PROFILES_TABLE,
                &[("id", eq(account_id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl IdentityResolver for PostgrestDirectory {
    async fn resolve_contact(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<ContactProfile>, HandshakeError> {
        // The owner filter makes someone else's contact indistinguishable
        // from a missing one.
        let mut rows: Vec<ContactRow> = self
            .api
            .select(
                CONTACTS_TABLE,
                &[
                    ("id", eq(contact_id)),
                    ("owner_account_id", eq(account_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop().map(|row| ContactProfile {
            identifier: contact_identifier(row.handle.as_deref(), row.email.as_deref()),
            display_name: row.display_name,
            event_id: row.event_id,
            event_title: row.event_title,
            event_datetime: row.event_datetime,
        }))
    }

    async fn account_identifiers(
        &self,
        account_id: &str,
    ) -> Result<AccountIdentifiers, HandshakeError> {
        let profile = self
            .profile(account_id)
            .await?
            .ok_or_else(|| identity_err(format!("no profile for account {account_id}")))?;
        Ok(AccountIdentifiers {
            handle: profile.handle.filter(|h| !h.trim().is_empty()),
            email: profile.email.filter(|e| !e.trim().is_empty()),
        })
    }

    async fn display_name(&self, account_id: &str) -> Result<String, HandshakeError> {
        let profile = self
            .profile(account_id)
            .await?
            .ok_or_else(|| identity_err(format!("no profile for account {account_id}")))?;
        Ok(profile.display_name)
    }

    async fn record_handshake_count(
        &self,
        account_id: &str,
        minted: u64,
    ) -> Result<(), HandshakeError> {
        let rows = self
            .api
            .update_where(
                PROFILES_TABLE,
                &[("id", eq(account_id))],
                &serde_json::json!({ "handshake_count": minted }),
            )
            .await?;
        if rows.is_empty() {
            return Err(identity_err(format!("no profile for account {account_id}")));
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────
