use std::time::Duration;

use crate::config::WALLET_TIMEOUT_SECS;
use crate::error::{AppError, Result};

/// Thin JSON-RPC client for wallet transaction counts against a Polygon node.
pub struct WalletClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl WalletClient {
    pub fn new(rpc_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WALLET_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, rpc_url })
    }

    /// `eth_getTransactionCount(wallet, "latest")` — result is a hex integer.
    pub async fn transaction_count(&self, wallet: &str) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionCount",
            "params": [wallet, "latest"],
        });

        let resp: serde_json::Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = resp.get("error") {
            return Err(AppError::WalletRpc(err.to_string()));
        }

        let hex = resp
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| AppError::WalletRpc("missing result field".to_string()))?;

        parse_hex_u64(hex)
            .ok_or_else(|| AppError::WalletRpc(format!("unparseable tx count: {hex}")))
    }
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}
