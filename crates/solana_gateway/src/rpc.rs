//! Solana JSON-RPC plumbing.

use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use solana_sdk::{hash::Hash, signature::Signature, transaction::Transaction};

pub type RpcError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

pub struct Rpc {
    client: reqwest::Client,
    url: String,
}

impl Rpc {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn call(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        if let Some(err) = resp.error {
            return Err(format!("RPC error: {}", err).into());
        }
        Ok(resp.result.unwrap_or_default())
    }

    /// Connectivity probe; returns the node's solana-core version.
    pub async fn check(&self) -> Result<String, RpcError> {
        let version = self.call("getVersion", serde_json::json!([])).await?;
        Ok(version["solana-core"].as_str().unwrap_or("unknown").to_string())
    }

    pub async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        let result = self
            .call(
                "getLatestBlockhash",
                serde_json::json!([{ "commitment": "confirmed" }]),
            )
            .await?;
        let bh = result["value"]["blockhash"]
            .as_str()
            .ok_or("missing blockhash")?;
        Ok(Hash::from_str(bh)?)
    }

    pub async fn send_transaction_b64(&self, tx_b64: &str) -> Result<Signature, RpcError> {
        let result = self
            .call(
                "sendTransaction",
                serde_json::json!([tx_b64, { "encoding": "base64", "skipPreflight": false, "preflightCommitment": "confirmed" }]),
            )
            .await?;
        let sig_str = result.as_str().ok_or("expected signature string")?;
        Ok(Signature::from_str(sig_str)?)
    }

    pub async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, RpcError> {
        let tx_bytes = bincode::serialize(tx)?;
        self.send_transaction_b64(&BASE64.encode(tx_bytes)).await
    }

    /// One-shot status check. `Ok(true)` once the signature reached
    /// confirmed/finalized; an on-chain execution error is terminal.
    pub async fn signature_confirmed(&self, sig: &Signature) -> Result<bool, RpcError> {
        let result = self
            .call(
                "getSignatureStatuses",
                serde_json::json!([[sig.to_string()], { "searchTransactionHistory": true }]),
            )
            .await?;
        let value0 = &result["value"][0];
        if value0.is_null() {
            return Ok(false);
        }
        if !value0["err"].is_null() {
            return Err(format!("transaction failed: {}", value0["err"]).into());
        }
        match value0["confirmationStatus"].as_str() {
            Some("confirmed") | Some("finalized") => Ok(true),
            _ => Ok(false),
        }
    }

    /// Poll until the signature confirms or `timeout` elapses. A timeout
    /// is not a definitive failure: the transaction may still land.
    pub async fn wait_for_confirmation(
        &self,
        sig: &Signature,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let start = std::time::Instant::now();
        loop {
            if self.signature_confirmed(sig).await? {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err("timeout waiting for confirmation".into());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
