//! Ecash proofs, keysets, and denomination helpers.

use crate::constants::DEFAULT_UNIT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DLEQ proof attached to a proof by the mint (NUT-12).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dleq {
    pub e: String,
    pub s: String,
    pub r: String,
}

/// A bearer ecash token issued by a mint.
///
/// Two proofs with the same `secret` are the same token; equality and
/// hashing elsewhere in the wallet key on the secret alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proof {
    /// Keyset id the proof was signed under.
    #[serde(default)]
    pub id: String,
    /// Amount in the keyset's unit.
    pub amount: u64,
    /// Unique secret.
    pub secret: String,
    /// Unblinded mint signature.
    #[serde(default, rename = "C", alias = "c")]
    pub c: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dleq: Option<Dleq>,
}

impl Proof {
    /// Build a bare proof (no witness, no DLEQ).
    pub fn new(id: &str, amount: u64, secret: &str, c: &str) -> Self {
        Self {
            id: id.to_string(),
            amount,
            secret: secret.to_string(),
            c: c.to_string(),
            witness: None,
            dleq: None,
        }
    }
}

/// Sum of proof amounts. Saturates instead of wrapping.
pub fn proofs_amount(proofs: &[Proof]) -> u64 {
    proofs
        .iter()
        .fold(0u64, |total, p| total.saturating_add(p.amount))
}

/// A mint keyset descriptor (NUT-02).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    pub id: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fee_ppk: Option<u64>,
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

/// Public keys of one keyset, by denomination (NUT-01).
pub type KeysetKeys = BTreeMap<u64, String>;

/// Split an amount into power-of-two denominations, smallest first.
///
/// This is the output set a mint issues for a given amount.
pub fn split_amount(amount: u64) -> Vec<u64> {
    (0..64)
        .map(|bit| 1u64 << bit)
        .filter(|d| amount & d != 0)
        .collect()
}
