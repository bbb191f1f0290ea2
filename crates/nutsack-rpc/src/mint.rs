//! Mint REST client.
//!
//! Typed async methods for the read-only and quote endpoints of a Cashu
//! mint (NUT-01, NUT-02, NUT-04, NUT-05, NUT-06). Minting, swapping and
//! melting proofs need blinded signatures and are left to the wallet's
//! mint collaborator.

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;
use nutsack_types::constants::DEFAULT_UNIT;
use nutsack_types::{Keyset, KeysetKeys, MeltQuote, MintQuote, QuoteState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Response Types
// =============================================================================

/// Mint `/v1/info` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MintInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub motd: Option<String>,
    /// Supported NUTs and their settings, keyed by NUT number.
    #[serde(default)]
    pub nuts: serde_json::Map<String, Value>,
    /// Catch-all for additional fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl MintInfo {
    /// Whether the mint advertises support for NUT `n`.
    pub fn supports(&self, n: u32) -> bool {
        self.nuts.contains_key(&n.to_string())
    }
}

#[derive(Deserialize)]
struct KeysetsResponse {
    keysets: Vec<Keyset>,
}

#[derive(Deserialize)]
struct KeysEntry {
    id: String,
    keys: KeysetKeys,
}

#[derive(Deserialize)]
struct KeysResponse {
    keysets: Vec<KeysEntry>,
}

/// Quote body as sent by the mint. Pre-`state` mints only report `paid`.
#[derive(Deserialize)]
struct QuoteWire {
    quote: String,
    #[serde(default)]
    request: String,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    fee_reserve: u64,
    #[serde(default)]
    state: Option<QuoteState>,
    #[serde(default)]
    paid: Option<bool>,
    #[serde(default)]
    expiry: Option<u64>,
}

impl QuoteWire {
    fn state(&self) -> QuoteState {
        match (self.state, self.paid) {
            (Some(state), _) => state,
            (None, Some(true)) => QuoteState::Paid,
            (None, _) => QuoteState::Unpaid,
        }
    }

    fn into_mint_quote(self, requested: u64) -> MintQuote {
        MintQuote {
            state: self.state(),
            amount: self.amount.unwrap_or(requested),
            quote: self.quote,
            request: self.request,
            expiry: self.expiry,
        }
    }

    fn into_melt_quote(self) -> MeltQuote {
        MeltQuote {
            state: self.state(),
            amount: self.amount.unwrap_or(0),
            fee_reserve: self.fee_reserve,
            quote: self.quote,
            expiry: self.expiry,
        }
    }
}

// =============================================================================
// MintRpc
// =============================================================================

/// Async REST client for one Cashu mint.
pub struct MintRpc {
    client: RpcClient,
}

impl MintRpc {
    /// Create a mint client for the given base URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::new(url)?,
        })
    }

    /// Create with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::with_config(config)?,
        })
    }

    /// Get the underlying REST client for custom calls.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Normalized mint URL.
    pub fn url(&self) -> &str {
        self.client.url()
    }

    // =========================================================================
    // Mint Information
    // =========================================================================

    /// Get mint info (name, version, supported NUTs).
    pub async fn get_info(&self) -> Result<MintInfo, RpcError> {
        let val = self.client.get("/v1/info").await?;
        Ok(serde_json::from_value(val)?)
    }

    /// List all keysets, active and inactive.
    pub async fn get_keysets(&self) -> Result<Vec<Keyset>, RpcError> {
        let val = self.client.get("/v1/keysets").await?;
        let resp: KeysetsResponse = serde_json::from_value(val)?;
        Ok(resp.keysets)
    }

    /// Public keys of one keyset, by denomination.
    pub async fn get_keys(&self, keyset_id: &str) -> Result<KeysetKeys, RpcError> {
        let val = self.client.get(&format!("/v1/keys/{}", keyset_id)).await?;
        let resp: KeysResponse = serde_json::from_value(val)?;
        resp.keysets
            .into_iter()
            .find(|k| k.id == keyset_id)
            .map(|k| k.keys)
            .ok_or(RpcError::NoResult {
                context: format!("get_keys({})", keyset_id),
            })
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    /// Request a Lightning invoice for minting `amount` sats.
    pub async fn create_mint_quote(&self, amount: u64) -> Result<MintQuote, RpcError> {
        let body = serde_json::json!({ "amount": amount, "unit": DEFAULT_UNIT });
        let val = self.client.post("/v1/mint/quote/bolt11", &body).await?;
        let wire: QuoteWire = serde_json::from_value(val)?;
        Ok(wire.into_mint_quote(amount))
    }

    /// Check the payment state of a mint quote.
    pub async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuote, RpcError> {
        let val = self
            .client
            .get(&format!("/v1/mint/quote/bolt11/{}", quote_id))
            .await?;
        let wire: QuoteWire = serde_json::from_value(val)?;
        Ok(wire.into_mint_quote(0))
    }

    /// Ask the mint to quote paying `invoice`.
    pub async fn create_melt_quote(&self, invoice: &str) -> Result<MeltQuote, RpcError> {
        let body = serde_json::json!({ "request": invoice, "unit": DEFAULT_UNIT });
        let val = self.client.post("/v1/melt/quote/bolt11", &body).await?;
        let wire: QuoteWire = serde_json::from_value(val)?;
        Ok(wire.into_melt_quote())
    }

    /// Check the state of a melt quote.
    pub async fn check_melt_quote(&self, quote_id: &str) -> Result<MeltQuote, RpcError> {
        let val = self
            .client
            .get(&format!("/v1/melt/quote/bolt11/{}", quote_id))
            .await?;
        let wire: QuoteWire = serde_json::from_value(val)?;
        Ok(wire.into_melt_quote())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_paid_flag() {
        let wire: QuoteWire = serde_json::from_value(serde_json::json!({
            "quote": "q1",
            "request": "lnbc210n1p...",
            "paid": true,
            "expiry": 1700000000u64,
        }))
        .unwrap();
        let q = wire.into_mint_quote(21);
        assert_eq!(q.state, QuoteState::Paid);
        assert_eq!(q.amount, 21);
    }

    #[test]
    fn test_state_wins_over_paid() {
        let wire: QuoteWire = serde_json::from_value(serde_json::json!({
            "quote": "q1",
            "state": "ISSUED",
            "paid": true,
        }))
        .unwrap();
        assert_eq!(wire.state(), QuoteState::Issued);
    }

    #[test]
    fn test_melt_quote_fields() {
        let wire: QuoteWire = serde_json::from_value(serde_json::json!({
            "quote": "m1",
            "amount": 100,
            "fee_reserve": 3,
            "state": "UNPAID",
        }))
        .unwrap();
        let q = wire.into_melt_quote();
        assert_eq!(q.required(), 103);
        assert_eq!(q.state, QuoteState::Unpaid);
    }

    #[test]
    fn test_keys_response_integer_keys() {
        let resp: KeysResponse = serde_json::from_value(serde_json::json!({
            "keysets": [{
                "id": "009a1f293253e41e",
                "unit": "sat",
                "keys": { "1": "02aa", "2": "02bb", "4": "02cc" }
            }]
        }))
        .unwrap();
        let keys = &resp.keysets[0].keys;
        assert_eq!(keys.get(&4).map(String::as_str), Some("02cc"));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_info_supports() {
        let info: MintInfo = serde_json::from_value(serde_json::json!({
            "name": "Test Mint",
            "nuts": { "4": {"methods": []}, "5": {"methods": []} },
            "icon_url": "https://example.com/icon.png",
        }))
        .unwrap();
        assert!(info.supports(4));
        assert!(!info.supports(12));
        assert!(info.extra.contains_key("icon_url"));
    }
}
