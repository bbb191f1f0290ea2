//! Mint and melt quotes (NUT-04, NUT-05).

use serde::{Deserialize, Serialize};

/// Lifecycle of a quote as reported by the mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    Unpaid,
    Pending,
    Paid,
    /// Mint quotes only: proofs were already issued for this quote.
    Issued,
}

impl std::fmt::Display for QuoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "unpaid"),
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Issued => write!(f, "issued"),
        }
    }
}

/// A mint quote: a Lightning invoice that, once paid, entitles the holder
/// to mint `amount` worth of proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote: String,
    /// BOLT11 invoice to pay.
    pub request: String,
    #[serde(default)]
    pub amount: u64,
    pub state: QuoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// A melt quote: the mint's offer to pay an invoice for `amount` plus up
/// to `fee_reserve` in routing fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub state: QuoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl MeltQuote {
    /// Total the wallet must put up to settle this quote.
    pub fn required(&self) -> u64 {
        self.amount.saturating_add(self.fee_reserve)
    }
}
