//! Mint collaborator port.
//!
//! The blinded-signature exchange (minting, swapping, melting) is not
//! implemented here; a [`MintClient`] provides it. [`load_mint_snapshot`]
//! covers the read-only part over [`MintRpc`].

use crate::error::WalletError;
use async_trait::async_trait;
use nutsack_rpc::error::codes;
use nutsack_rpc::{MintInfo, MintRpc, RpcError};
use nutsack_types::{KeysetKeys, Keyset, MeltQuote, MintQuote, Proof, QuoteState};
use std::collections::BTreeMap;

/// Mint metadata fetched in one pass.
#[derive(Debug, Clone, Default)]
pub struct MintSnapshot {
    pub info: Option<MintInfo>,
    pub keysets: Vec<Keyset>,
    /// Keys of the active keysets.
    pub keys: BTreeMap<String, KeysetKeys>,
}

/// Proofs split for a payment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSplit {
    /// Returned to the wallet.
    pub keep: Vec<Proof>,
    /// Exactly covering the requested amount.
    pub send: Vec<Proof>,
}

/// Result of melting proofs against a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeltOutcome {
    /// `Paid` once settled; `Pending` while the payment is in flight.
    pub state: QuoteState,
    pub preimage: Option<String>,
    /// Unused fee reserve returned as new proofs.
    pub change: Vec<Proof>,
}

/// Operations against a Cashu mint, keyed by mint URL.
///
/// Implementations report "quote not paid" as
/// [`WalletError::InvoiceNotPaidYet`]; other failures are terminal for the
/// call.
#[async_trait]
pub trait MintClient: Send + Sync {
    async fn load_mint(&self, mint: &str) -> Result<MintSnapshot, WalletError>;

    async fn create_mint_quote(&self, mint: &str, amount: u64) -> Result<MintQuote, WalletError>;

    async fn check_mint_quote(&self, mint: &str, quote_id: &str) -> Result<MintQuote, WalletError>;

    async fn mint_proofs(
        &self,
        mint: &str,
        amount: u64,
        quote_id: &str,
    ) -> Result<Vec<Proof>, WalletError>;

    async fn create_melt_quote(&self, mint: &str, invoice: &str) -> Result<MeltQuote, WalletError>;

    /// Swap `proofs` into a `send` set worth `amount` and the remainder.
    async fn send(
        &self,
        mint: &str,
        amount: u64,
        proofs: Vec<Proof>,
        include_fees: bool,
    ) -> Result<SendSplit, WalletError>;

    async fn melt_proofs(
        &self,
        mint: &str,
        quote: &MeltQuote,
        proofs: Vec<Proof>,
    ) -> Result<MeltOutcome, WalletError>;

    async fn check_melt_quote(&self, mint: &str, quote_id: &str) -> Result<MeltQuote, WalletError>;
}

/// Fetch info, keysets and active keyset keys from a mint.
///
/// Missing info is tolerated; keyset failures are not.
pub async fn load_mint_snapshot(rpc: &MintRpc) -> Result<MintSnapshot, RpcError> {
    let info = match rpc.get_info().await {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!("{}: mint info unavailable: {}", rpc.url(), e);
            None
        }
    };

    let keysets = rpc.get_keysets().await?;
    let mut keys = BTreeMap::new();
    for keyset in keysets.iter().filter(|k| k.active) {
        keys.insert(keyset.id.clone(), rpc.get_keys(&keyset.id).await?);
    }
    log::debug!(
        "{}: {} keysets, {} active",
        rpc.url(),
        keysets.len(),
        keys.len()
    );

    Ok(MintSnapshot { info, keysets, keys })
}

/// Wrap a collaborator failure as a terminal mint error for `op`.
///
/// `InvoiceNotPaidYet` and errors that already name an operation pass
/// through unchanged.
pub(crate) fn mint_failure(op: &str, e: WalletError) -> WalletError {
    match e {
        WalletError::InvoiceNotPaidYet
        | WalletError::MintOperationFailed { .. }
        | WalletError::Cancelled => e,
        WalletError::Rpc(ref rpc) if rpc.mint_code() == Some(codes::QUOTE_NOT_PAID) => {
            log::debug!("{}: {}", op, rpc);
            WalletError::InvoiceNotPaidYet
        }
        other => WalletError::MintOperationFailed {
            op: op.to_string(),
            reason: other.to_string(),
        },
    }
}
