//! Persisted wallet state.
//!
//! Everything the wallet caches across restarts for one identity: the
//! proof ledger, the history log, reconciliation watermarks, the latest
//! wallet descriptor, token events still waiting to be published, and
//! melts the mint has not settled yet.

use crate::codec::{HistoryEntry, TokenEvent, WalletDescriptor};
use crate::event::RawEvent;
use crate::ledger::ProofLedger;
use nutsack_types::{EventKind, Proof};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix of local origins for proofs whose token event is not yet published.
pub const PENDING_PREFIX: &str = "pending:";

pub fn is_pending_origin(id: &str) -> bool {
    id.starts_with(PENDING_PREFIX)
}

// =============================================================================
// Watermarks
// =============================================================================

/// Resume point for one event kind.
///
/// `since` is the highest `created_at` observed; `boundary` holds the ids of
/// the events seen at exactly that timestamp. Queries use `since` as an
/// inclusive bound and skip the boundary ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub since: u64,
    #[serde(default)]
    pub boundary: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    #[serde(default)]
    kinds: BTreeMap<EventKind, Watermark>,
}

impl Watermarks {
    pub fn get(&self, kind: EventKind) -> Option<&Watermark> {
        self.kinds.get(&kind)
    }

    /// Inclusive lower bound for the next query, unset on first run.
    pub fn since(&self, kind: EventKind) -> Option<u64> {
        self.kinds.get(&kind).map(|w| w.since)
    }

    /// Whether `event` sits on the boundary of a previous run.
    pub fn is_seen(&self, kind: EventKind, event: &RawEvent) -> bool {
        self.kinds
            .get(&kind)
            .map_or(false, |w| w.since == event.created_at && w.boundary.contains(&event.id))
    }

    /// Advance past `event`. Older events leave the watermark unchanged.
    pub fn observe(&mut self, kind: EventKind, event: &RawEvent) {
        let w = self.kinds.entry(kind).or_default();
        if event.created_at > w.since {
            w.since = event.created_at;
            w.boundary.clear();
        }
        if event.created_at == w.since {
            w.boundary.insert(event.id.clone());
        }
    }

    pub fn reset(&mut self) {
        self.kinds.clear();
    }
}

// =============================================================================
// History Log
// =============================================================================

/// Append-only history, deduplicated by event id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Append an entry. Returns false if an entry with the same id is
    /// already recorded.
    pub fn insert(&mut self, entry: HistoryEntry) -> bool {
        if let Some(id) = &entry.id {
            if self.contains(id) {
                return false;
            }
        }
        self.entries.push(entry);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id.as_deref() == Some(id))
    }

    /// Entries for display, newest first.
    pub fn newest_first(&self) -> Vec<&HistoryEntry> {
        let mut out: Vec<_> = self.entries.iter().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        out
    }

    /// Entries recorded locally whose event has not been published.
    pub fn unpublished_mut(&mut self) -> impl Iterator<Item = &mut HistoryEntry> {
        self.entries.iter_mut().filter(|e| e.id.is_none())
    }

    /// Add a published token id wherever `placeholder` is referenced.
    /// A held token event may be published as several parts.
    pub fn link_token_id(&mut self, placeholder: &str, id: &str) {
        for entry in &mut self.entries {
            link(&mut entry.created, placeholder, id);
            link(&mut entry.destroyed, placeholder, id);
        }
    }

    /// Drop every reference to a placeholder token id.
    pub fn forget_token_id(&mut self, placeholder: &str) {
        for entry in &mut self.entries {
            entry.created.remove(placeholder);
            entry.destroyed.remove(placeholder);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn link(set: &mut BTreeSet<String>, placeholder: &str, id: &str) {
    if set.contains(placeholder) {
        set.insert(id.to_string());
    }
}

// =============================================================================
// Wallet State
// =============================================================================

/// Proofs the mint holds against a melt that has not settled.
///
/// They are neither held nor spendable. Once the quote settles they are
/// either recorded as paid out or returned to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMelt {
    pub mint: String,
    /// Invoice amount in sats.
    pub amount: u64,
    pub proofs: Vec<Proof>,
    /// Token events written when the proofs were swapped out.
    #[serde(default)]
    pub created: BTreeSet<String>,
    #[serde(default)]
    pub destroyed: BTreeSet<String>,
}

/// The wallet descriptor together with the event it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub descriptor: WalletDescriptor,
    pub event_id: String,
    pub created_at: u64,
}

impl DescriptorRecord {
    /// Newest `created_at` wins; ties go to the larger id.
    pub fn is_older_than(&self, event: &RawEvent) -> bool {
        (self.created_at, self.event_id.as_str()) < (event.created_at, event.id.as_str())
    }
}

/// Everything persisted for one wallet identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletState {
    #[serde(default)]
    pub ledger: ProofLedger,
    #[serde(default)]
    pub history: HistoryLog,
    #[serde(default)]
    pub watermarks: Watermarks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<DescriptorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_mint: Option<String>,
    /// Token events that failed to publish, keyed by placeholder origin.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_tokens: BTreeMap<String, TokenEvent>,
    /// Melts the mint reported as pending, keyed by quote id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_melts: BTreeMap<String, PendingMelt>,
}

impl WalletState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint URLs from the descriptor, or the ledger's mints if none.
    pub fn mint_urls(&self) -> Vec<String> {
        match &self.descriptor {
            Some(rec) => rec.descriptor.mints.clone(),
            None => self.ledger.mints().map(|m| m.url.clone()).collect(),
        }
    }

    pub fn privkey(&self) -> Option<&str> {
        self.descriptor
            .as_ref()
            .and_then(|rec| rec.descriptor.privkey.as_deref())
    }

    /// The active mint, or the first known mint.
    pub fn active_mint(&self) -> Option<String> {
        self.active_mint
            .clone()
            .or_else(|| self.mint_urls().into_iter().next())
    }
}
