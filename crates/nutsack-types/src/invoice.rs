//! BOLT11 invoice amount extraction.
//!
//! Reads only the human-readable part (`ln` + currency + amount); the tagged
//! data and signature are not decoded or validated.

use crate::constants::{MSAT_PER_BTC, MSAT_PER_SAT};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("not a lightning invoice")]
    NotAnInvoice,

    #[error("unknown currency prefix: {0}")]
    UnknownCurrency(String),

    #[error("invalid amount field: {0}")]
    InvalidAmount(String),
}

/// Currency prefixes, longest first so `bcrt` wins over `bc`.
const CURRENCIES: [&str; 5] = ["bcrt", "tbs", "bc", "tb", "sb"];

/// Decode the amount of a BOLT11 invoice in satoshis.
///
/// Returns `Ok(None)` for amountless invoices; sub-satoshi amounts are floored.
pub fn invoice_amount_sat(invoice: &str) -> Result<Option<u64>, InvoiceError> {
    Ok(invoice_amount_msat(invoice)?.map(|msat| msat / MSAT_PER_SAT))
}

/// Decode the amount of a BOLT11 invoice in millisatoshis.
pub fn invoice_amount_msat(invoice: &str) -> Result<Option<u64>, InvoiceError> {
    let lower = invoice.trim().to_ascii_lowercase();
    let lower = lower.strip_prefix("lightning:").unwrap_or(&lower);

    // The data part uses the bech32 charset, which has no '1'.
    let sep = lower.rfind('1').ok_or(InvoiceError::NotAnInvoice)?;
    let hrp = lower[..sep]
        .strip_prefix("ln")
        .ok_or(InvoiceError::NotAnInvoice)?;

    let currency = CURRENCIES
        .iter()
        .find(|c| hrp.starts_with(*c))
        .ok_or_else(|| InvoiceError::UnknownCurrency(hrp.to_string()))?;
    let amount = &hrp[currency.len()..];

    if amount.is_empty() {
        return Ok(None);
    }
    parse_hrp_amount(amount).map(Some)
}

fn parse_hrp_amount(field: &str) -> Result<u64, InvoiceError> {
    let invalid = || InvoiceError::InvalidAmount(field.to_string());

    let (digits, multiplier) = match field.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&field[..i], Some(c)),
        _ => (field, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match multiplier {
        None => value.checked_mul(MSAT_PER_BTC),
        Some('m') => value.checked_mul(MSAT_PER_BTC / 1_000),
        Some('u') => value.checked_mul(MSAT_PER_BTC / 1_000_000),
        Some('n') => value.checked_mul(MSAT_PER_BTC / 1_000_000_000),
        // 1 pico-bitcoin is a tenth of a millisatoshi.
        Some('p') if value % 10 == 0 => Some(value / 10),
        _ => None,
    }
    .ok_or_else(invalid)
}
