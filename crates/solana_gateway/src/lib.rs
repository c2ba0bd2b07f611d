//! # solana_gateway
//!
//! Ledger Gateway implementation over Solana JSON-RPC.
//!
//! Three jobs:
//! 1. Construct unsigned wallet → treasury fee transfers against a fresh
//!    blockhash, serialized base64 for client-side signing.
//! 2. Broadcast fully-signed transactions and wait for finality. Duplicate
//!    broadcasts of an already-landed signature are treated as success, so
//!    client retries never double-charge.
//! 3. Mint soulbound attestation badges via the pinned badge program,
//!    signed by the service keypair, with retry/backoff against stale
//!    blockhashes.

mod rpc;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use tracing::{info, warn};
use uuid::Uuid;

use handshake_core::error::HandshakeError;
use handshake_core::ledger::{BadgeMetadata, LedgerGateway, MintReceipt};

use crate::rpc::Rpc;

// ── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub rpc_url: String,
    /// Protocol treasury receiving both sides' mint fees.
    pub treasury_address: String,
    /// Path to the service keypair (Solana JSON keypair file) that pays
    /// for badge mints.
    pub keypair_path: String,
    /// How long to wait for finality before reporting failure.
    pub confirm_timeout_secs: u64,
    /// Max attempts per badge mint.
    pub max_mint_retries: u32,
    /// Base backoff (ms) between mint attempts.
    pub retry_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8899".to_string(),
            treasury_address: "8vBqS7g2HkjwR3XhzX8akAZJo5ug1FHHr57EE8ZkZMar".to_string(),
            keypair_path: "~/.config/solana/id.json".to_string(),
            confirm_timeout_secs: 30,
            max_mint_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut p = PathBuf::from(home);
            if path.len() > 2 {
                p.push(&path[2..]);
            }
            return p;
        }
    }
    PathBuf::from(path)
}

fn load_keypair(path: &str) -> Result<Keypair, String> {
    let expanded = expand_tilde(path);
    read_keypair_file(expanded).map_err(|e| format!("read keypair: {e}"))
}

// ── Pure transaction helpers ────────────────────────────────────

/// Unsigned single-transfer transaction with `from` as fee payer, base64.
fn unsigned_transfer_b64(
    from: &Pubkey,
    treasury: &Pubkey,
    lamports: u64,
    blockhash: Hash,
) -> Result<String, String> {
    let ix = system_instruction::transfer(from, treasury, lamports);
    let message = Message::new_with_blockhash(&[ix], Some(from), &blockhash);
    let tx = Transaction::new_unsigned(message);
    let bytes = bincode::serialize(&tx).map_err(|e| format!("serialize transaction: {e}"))?;
    Ok(BASE64.encode(bytes))
}

/// Fee-payer signature of a fully-signed serialized transaction.
fn extract_signature(tx_bytes: &[u8]) -> Result<Signature, String> {
    let tx: Transaction =
        bincode::deserialize(tx_bytes).map_err(|e| format!("deserialize transaction: {e}"))?;
    tx.signatures
        .first()
        .copied()
        .filter(|s| *s != Signature::default())
        .ok_or_else(|| "transaction is missing its fee-payer signature".to_string())
}

fn ledger_err(detail: impl ToString) -> HandshakeError {
    HandshakeError::Ledger {
        detail: detail.to_string(),
    }
}

// ── Gateway ─────────────────────────────────────────────────────

pub struct SolanaGateway {
    rpc: Rpc,
    treasury: Pubkey,
    service_keypair: Keypair,
    config: GatewayConfig,
}

impl SolanaGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, String> {
        let treasury = Pubkey::from_str(&config.treasury_address)
            .map_err(|e| format!("invalid treasury address: {e}"))?;
        let service_keypair = load_keypair(&config.keypair_path)?;
        Ok(Self {
            rpc: Rpc::new(config.rpc_url.clone()),
            treasury,
            service_keypair,
            config,
        })
    }

    /// Verify RPC connectivity; returns the node version string.
    pub async fn check(&self) -> Result<String, HandshakeError> {
        self.rpc.check().await.map_err(ledger_err)
    }

    async fn send_mint_with_retries(
        &self,
        ix: solana_sdk::instruction::Instruction,
    ) -> Result<Signature, HandshakeError> {
        let payer = self.service_keypair.pubkey();
        let attempts = self.config.max_mint_retries.max(1);
        let timeout = Duration::from_secs(self.config.confirm_timeout_secs);

        for attempt in 0..attempts {
            let bh = self.rpc.latest_blockhash().await.map_err(ledger_err)?;
            let tx = {
                let signers: [&dyn Signer; 1] = [&self.service_keypair];
                Transaction::new_signed_with_payer(
                    std::slice::from_ref(&ix),
                    Some(&payer),
                    &signers,
                    bh,
                )
            };

            let sig = match self.rpc.send_transaction(&tx).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("mint sendTransaction failed (attempt {}): {}", attempt + 1, e);
                    if attempt + 1 >= attempts {
                        return Err(ledger_err(format!("sendTransaction failed: {e}")));
                    }
                    self.backoff(attempt).await;
                    continue;
                }
            };

            match self.rpc.wait_for_confirmation(&sig, timeout).await {
                Ok(()) => return Ok(sig),
                Err(e) => {
                    warn!("mint not confirmed (attempt {}): {}", attempt + 1, e);
                    if attempt + 1 >= attempts {
                        return Err(ledger_err(format!("mint transaction failed: {e}")));
                    }
                    self.backoff(attempt).await;
                }
            }
        }

        Err(ledger_err("exhausted mint retries"))
    }

    async fn backoff(&self, attempt: u32) {
        let shift = attempt.min(16);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let backoff = self.config.retry_backoff_ms.saturating_mul(factor);
        tokio::time::sleep(Duration::from_millis(backoff)).await;
    }
}

#[async_trait]
impl LedgerGateway for SolanaGateway {
    async fn build_fee_transfer(
        &self,
        from_wallet: &str,
        lamports: u64,
    ) -> Result<String, HandshakeError> {
        let from = Pubkey::from_str(from_wallet)
            .map_err(|e| ledger_err(format!("invalid wallet address {from_wallet}: {e}")))?;
        let blockhash = self.rpc.latest_blockhash().await.map_err(ledger_err)?;
        unsigned_transfer_b64(&from, &self.treasury, lamports, blockhash).map_err(ledger_err)
    }

    async fn submit_and_confirm(&self, signed_tx_base64: &str) -> Result<String, HandshakeError> {
        let tx_bytes = BASE64
            .decode(signed_tx_base64)
            .map_err(|e| ledger_err(format!("invalid base64 transaction: {e}")))?;
        let sig = extract_signature(&tx_bytes).map_err(ledger_err)?;

        if let Err(e) = self.rpc.send_transaction_b64(signed_tx_base64).await {
            // A rejected resend of a signature that already landed is a
            // successful retry, not a failure.
            match self.rpc.signature_confirmed(&sig).await {
                Ok(true) => {
                    info!(signature = %sig, "duplicate broadcast; signature already landed");
                }
                _ => return Err(ledger_err(format!("sendTransaction failed: {e}"))),
            }
        }

        let timeout = Duration::from_secs(self.config.confirm_timeout_secs);
        self.rpc
            .wait_for_confirmation(&sig, timeout)
            .await
            .map_err(|e| ledger_err(format!("confirmation failed: {e}")))?;

        Ok(sig.to_string())
    }

    async fn mint_badge(
        &self,
        owner_wallet: &str,
        metadata: &BadgeMetadata,
    ) -> Result<MintReceipt, HandshakeError> {
        let owner = Pubkey::from_str(owner_wallet)
            .map_err(|e| ledger_err(format!("invalid wallet address {owner_wallet}: {e}")))?;
        let handshake_id = Uuid::parse_str(&metadata.handshake_id)
            .map_err(|e| ledger_err(format!("invalid handshake id: {e}")))?;

        let args = attest_cpi::MintBadgeArgs {
            handshake_id: *handshake_id.as_bytes(),
            event_title: metadata.event_title.clone(),
            event_datetime: metadata.event_datetime.clone(),
        };
        let ix = attest_cpi::build_mint_badge_ix(&self.service_keypair.pubkey(), &owner, &args)
            .map_err(ledger_err)?;
        let (badge, _) = attest_cpi::derive_badge_pda(&owner, &args.handshake_id);

        let sig = self.send_mint_with_retries(ix).await?;
        info!(owner = %owner, badge = %badge, signature = %sig, "badge minted");

        Ok(MintReceipt {
            token_ref: badge.to_string(),
            signature: sig.to_string(),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────
