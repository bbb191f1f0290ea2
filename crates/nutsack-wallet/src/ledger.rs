//! Proof ledger.
//!
//! In-memory authoritative view of held proofs, keyed by secret. Every
//! proof is bound to the event that introduced it (its origin). Events
//! that have been superseded or deleted are tombstoned so that a late or
//! replayed copy can never bring their proofs back.
//!
//! Spendability depends on what the wallet knows about the proof's keyset:
//!
//! | mint keysets        | proof keyset   | status       | spendable |
//! |---------------------|----------------|--------------|-----------|
//! | never loaded        | any            | `Unverified` | yes       |
//! | loaded              | active, sat    | `Active`     | yes       |
//! | loaded              | inactive       | `Inactive`   | no        |
//! | loaded              | other unit     | `OtherUnit`  | no        |
//! | loaded              | missing        | `Unknown`    | no        |

use crate::codec::TokenEvent;
use crate::error::WalletError;
use nutsack_types::constants::DEFAULT_UNIT;
use nutsack_types::{Keyset, KeysetKeys, Proof};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// What the wallet knows about a mint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MintRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    /// `None` until keysets have been fetched from the mint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keysets: Option<Vec<Keyset>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, KeysetKeys>,
}

impl MintRecord {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn keyset_status(&self, keyset_id: &str) -> KeysetStatus {
        let Some(keysets) = &self.keysets else {
            return KeysetStatus::Unverified;
        };
        match keysets.iter().find(|k| k.id == keyset_id) {
            None => KeysetStatus::Unknown,
            Some(k) if k.unit != DEFAULT_UNIT => KeysetStatus::OtherUnit,
            Some(k) if k.active => KeysetStatus::Active,
            Some(_) => KeysetStatus::Inactive,
        }
    }

    pub fn active_keysets(&self) -> impl Iterator<Item = &Keyset> {
        self.keysets
            .iter()
            .flatten()
            .filter(|k| k.active && k.unit == DEFAULT_UNIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeysetStatus {
    Unverified,
    Active,
    Inactive,
    OtherUnit,
    Unknown,
}

impl KeysetStatus {
    pub fn is_spendable(self) -> bool {
        matches!(self, Self::Unverified | Self::Active)
    }
}

impl std::fmt::Display for KeysetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::OtherUnit => write!(f, "other-unit"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A held proof and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldProof {
    pub proof: Proof,
    pub mint: String,
    /// Id of the event that introduced the proof.
    pub origin: String,
}

/// Counts from applying one token event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenApply {
    pub added: usize,
    pub removed: usize,
    pub rebound: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProofLedger {
    mints: BTreeMap<String, MintRecord>,
    /// Held proofs by secret.
    proofs: BTreeMap<String, HeldProof>,
    tombstones: BTreeSet<String>,
}

impl ProofLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mints ───────────────────────────────────────────────────────────

    /// Register a mint. Returns true if it was not known before.
    pub fn add_mint(&mut self, url: &str) -> bool {
        match self.mints.entry(url.to_string()) {
            Entry::Vacant(v) => {
                v.insert(MintRecord::new(url));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Forget a mint. Refused while the mint still backs held proofs.
    pub fn remove_mint(&mut self, url: &str) -> Result<MintRecord, WalletError> {
        if !self.mints.contains_key(url) {
            return Err(WalletError::UnknownMint(url.to_string()));
        }
        let held = self.proofs.values().filter(|h| h.mint == url).count();
        if held > 0 {
            return Err(WalletError::InvalidState(format!(
                "{} still holds {} proofs",
                url, held
            )));
        }
        self.mints
            .remove(url)
            .ok_or_else(|| WalletError::UnknownMint(url.to_string()))
    }

    pub fn mint(&self, url: &str) -> Option<&MintRecord> {
        self.mints.get(url)
    }

    pub fn mints(&self) -> impl Iterator<Item = &MintRecord> {
        self.mints.values()
    }

    pub fn has_mint(&self, url: &str) -> bool {
        self.mints.contains_key(url)
    }

    fn mint_mut(&mut self, url: &str) -> Result<&mut MintRecord, WalletError> {
        self.mints
            .get_mut(url)
            .ok_or_else(|| WalletError::UnknownMint(url.to_string()))
    }

    pub fn set_mint_info(&mut self, url: &str, info: serde_json::Value) -> Result<(), WalletError> {
        self.mint_mut(url)?.info = Some(info);
        Ok(())
    }

    /// Replace the keyset list of a mint. Held proofs whose keyset is not
    /// in the new list are kept but flagged.
    pub fn set_keysets(&mut self, url: &str, keysets: Vec<Keyset>) -> Result<(), WalletError> {
        self.mint_mut(url)?.keysets = Some(keysets);
        for flag in self.unknown_keysets(url) {
            log::warn!("{}, proofs excluded from balance", flag);
        }
        Ok(())
    }

    /// One `UnknownKeyset` per keyset id that held proofs of `url` reference
    /// but the mint's loaded keyset list lacks.
    pub fn unknown_keysets(&self, url: &str) -> Vec<WalletError> {
        let Some(record) = self.mints.get(url) else {
            return Vec::new();
        };
        let ids: BTreeSet<&str> = self
            .held_for_mint(url)
            .filter(|h| record.keyset_status(&h.proof.id) == KeysetStatus::Unknown)
            .map(|h| h.proof.id.as_str())
            .collect();
        ids.into_iter()
            .map(|keyset| WalletError::UnknownKeyset {
                mint: url.to_string(),
                keyset: keyset.to_string(),
            })
            .collect()
    }

    pub fn set_keys(&mut self, url: &str, keyset_id: &str, keys: KeysetKeys) -> Result<(), WalletError> {
        self.mint_mut(url)?.keys.insert(keyset_id.to_string(), keys);
        Ok(())
    }

    pub fn keyset_status(&self, held: &HeldProof) -> KeysetStatus {
        self.mints
            .get(&held.mint)
            .map_or(KeysetStatus::Unverified, |m| m.keyset_status(&held.proof.id))
    }

    fn is_spendable(&self, held: &HeldProof) -> bool {
        self.keyset_status(held).is_spendable()
    }

    // ── Balances ────────────────────────────────────────────────────────

    /// Spendable balance per registered mint.
    pub fn balances(&self) -> BTreeMap<String, u64> {
        let mut out: BTreeMap<String, u64> =
            self.mints.keys().map(|url| (url.clone(), 0)).collect();
        for held in self.proofs.values().filter(|h| self.is_spendable(h)) {
            let total = out.entry(held.mint.clone()).or_default();
            *total = total.saturating_add(held.proof.amount);
        }
        out
    }

    pub fn total_balance(&self) -> u64 {
        self.balances()
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    // ── Proofs ──────────────────────────────────────────────────────────

    /// Insert proofs not already held, bound to `origin`. Registers the
    /// mint. Proofs from a tombstoned origin are ignored.
    pub fn add_proofs(&mut self, mint: &str, proofs: &[Proof], origin: &str) -> usize {
        if self.tombstones.contains(origin) {
            log::debug!("ignoring {} proofs from tombstoned event {}", proofs.len(), origin);
            return 0;
        }
        self.add_mint(mint);

        let mut added = 0;
        for proof in proofs {
            if let Entry::Vacant(v) = self.proofs.entry(proof.secret.clone()) {
                v.insert(HeldProof {
                    proof: proof.clone(),
                    mint: mint.to_string(),
                    origin: origin.to_string(),
                });
                added += 1;
            }
        }
        added
    }

    /// Remove proofs by secret. Missing proofs are ignored.
    pub fn remove_proofs(&mut self, proofs: &[Proof]) -> usize {
        proofs
            .iter()
            .filter(|p| self.proofs.remove(&p.secret).is_some())
            .count()
    }

    /// Spendable proofs of one mint.
    pub fn proofs_for_mint(&self, url: &str) -> Result<Vec<Proof>, WalletError> {
        if !self.mints.contains_key(url) {
            return Err(WalletError::UnknownMint(url.to_string()));
        }
        Ok(self
            .proofs
            .values()
            .filter(|h| h.mint == url && self.is_spendable(h))
            .map(|h| h.proof.clone())
            .collect())
    }

    /// All held proofs of one mint, spendable or not.
    pub fn held_for_mint<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a HeldProof> + 'a {
        self.proofs.values().filter(move |h| h.mint == url)
    }

    pub fn held(&self) -> impl Iterator<Item = &HeldProof> {
        self.proofs.values()
    }

    pub fn contains(&self, proof: &Proof) -> bool {
        self.proofs.contains_key(&proof.secret)
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    // ── Origins ─────────────────────────────────────────────────────────

    pub fn origin_of(&self, proof: &Proof) -> Option<&str> {
        self.proofs.get(&proof.secret).map(|h| h.origin.as_str())
    }

    pub fn proofs_from_event(&self, event_id: &str) -> Vec<Proof> {
        self.proofs
            .values()
            .filter(|h| h.origin == event_id)
            .map(|h| h.proof.clone())
            .collect()
    }

    /// Distinct origins of the given proofs that are still held.
    pub fn origins_of(&self, proofs: &[Proof]) -> BTreeSet<String> {
        proofs
            .iter()
            .filter_map(|p| self.origin_of(p))
            .map(str::to_string)
            .collect()
    }

    /// Bind held proofs to a new origin.
    pub fn rebind(&mut self, proofs: &[Proof], origin: &str) -> usize {
        let mut rebound = 0;
        for proof in proofs {
            if let Some(held) = self.proofs.get_mut(&proof.secret) {
                held.origin = origin.to_string();
                rebound += 1;
            }
        }
        rebound
    }

    pub fn tombstone(&mut self, event_id: &str) -> bool {
        self.tombstones.insert(event_id.to_string())
    }

    pub fn is_tombstoned(&self, event_id: &str) -> bool {
        self.tombstones.contains(event_id)
    }

    /// Tombstone an event and drop the proofs still bound to it.
    pub fn drop_event(&mut self, event_id: &str) -> usize {
        self.tombstone(event_id);
        let before = self.proofs.len();
        self.proofs.retain(|_, h| h.origin != event_id);
        before - self.proofs.len()
    }

    /// Apply a token event.
    ///
    /// Events listed in `del` are tombstoned. Held proofs from those events
    /// that reappear in this one are rebound to `event_id`; the rest are
    /// dropped. The result is the same whichever order the superseded and
    /// superseding events arrive in.
    pub fn apply_token_event(&mut self, event_id: &str, token: &TokenEvent) -> TokenApply {
        if self.tombstones.contains(event_id) {
            log::debug!("token event {} is tombstoned, skipping", event_id);
            return TokenApply::default();
        }

        let superseded: HashSet<&str> = token.del.iter().map(String::as_str).collect();
        for id in &superseded {
            self.tombstones.insert(id.to_string());
        }

        let carried: HashSet<&str> = token.proofs.iter().map(|p| p.secret.as_str()).collect();
        let mut result = TokenApply::default();
        for held in self.proofs.values_mut() {
            if superseded.contains(held.origin.as_str()) && carried.contains(held.proof.secret.as_str()) {
                held.origin = event_id.to_string();
                result.rebound += 1;
            }
        }

        let before = self.proofs.len();
        self.proofs
            .retain(|_, h| !superseded.contains(h.origin.as_str()));
        result.removed = before - self.proofs.len();

        result.added = self.add_proofs(&token.mint, &token.proofs, event_id);
        result
    }
}
