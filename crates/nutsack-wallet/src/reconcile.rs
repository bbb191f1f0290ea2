//! Relay-to-ledger reconciliation.
//!
//! Pulls wallet, token, history and deletion events newer than each kind's
//! watermark and folds them into the wallet state. Every mutation is
//! idempotent and commutative, so replays and reordered delivery converge
//! on the same ledger.

use crate::codec::{EventCodec, WalletEvent};
use crate::error::{CodecError, WalletError};
use crate::event::{EventTransport, Filter, RawEvent};
use crate::nip44::Cipher;
use crate::state::{DescriptorRecord, WalletState};
use nutsack_types::EventKind;
use std::collections::HashSet;

/// Reconciliation progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Started pulling one kind.
    Started { kind: EventKind },
    /// Events of one kind fetched.
    Fetched { kind: EventKind, count: usize },
    /// A kind was abandoned.
    Aborted { kind: EventKind, reason: String },
    /// All kinds processed.
    Complete(ReconcileReport),
}

/// Counters from one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Events returned by the transport, after id dedup.
    pub fetched: usize,
    pub applied: usize,
    /// Boundary repeats, replayed history, stale descriptors.
    pub duplicates: usize,
    /// Undecodable or foreign events.
    pub failed: usize,
    pub proofs_added: usize,
    pub proofs_removed: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: &ReconcileReport) {
        self.fetched += other.fetched;
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
        self.proofs_added += other.proofs_added;
        self.proofs_removed += other.proofs_removed;
    }
}

/// Applies remote events for one wallet owner.
pub struct Reconciler<'a> {
    transport: &'a dyn EventTransport,
    codec: EventCodec<'a>,
    owner: &'a str,
    limit: usize,
    max_pages: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        transport: &'a dyn EventTransport,
        cipher: &'a dyn Cipher,
        owner: &'a str,
        limit: usize,
        max_pages: usize,
    ) -> Self {
        Self {
            transport,
            codec: EventCodec::new(cipher, owner),
            owner,
            limit: limit.max(1),
            max_pages,
        }
    }

    /// Pull and apply every synced kind.
    ///
    /// A kind whose events cannot be decrypted is abandoned without moving
    /// its watermark; the other kinds still run and the first such error is
    /// returned at the end. Transport failures abort the run.
    pub async fn run(
        &self,
        state: &mut WalletState,
        event_tx: Option<&tokio::sync::mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileReport, WalletError> {
        let mut report = ReconcileReport::default();
        let mut unsupported: Option<WalletError> = None;

        for kind in EventKind::SYNCED {
            if let Some(tx) = event_tx {
                let _ = tx.send(ReconcileEvent::Started { kind }).await;
            }

            let events = self.fetch(state, kind).await?;
            if let Some(tx) = event_tx {
                let _ = tx
                    .send(ReconcileEvent::Fetched {
                        kind,
                        count: events.len(),
                    })
                    .await;
            }

            match self.apply_kind(state, kind, &events) {
                Ok(kind_report) => {
                    log::debug!("{}: {:?}", kind, kind_report);
                    report.merge(&kind_report);
                }
                Err(e) => {
                    log::warn!("abandoning {} events: {}", kind, e);
                    if let Some(tx) = event_tx {
                        let _ = tx
                            .send(ReconcileEvent::Aborted {
                                kind,
                                reason: e.to_string(),
                            })
                            .await;
                    }
                    unsupported.get_or_insert(e);
                }
            }
        }

        log::info!(
            "reconciled {} events: {} applied, {} duplicate, {} failed, +{} -{} proofs",
            report.fetched,
            report.applied,
            report.duplicates,
            report.failed,
            report.proofs_added,
            report.proofs_removed
        );
        if let Some(tx) = event_tx {
            let _ = tx.send(ReconcileEvent::Complete(report)).await;
        }

        match unsupported {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Query one kind from its watermark, paging back through older events
    /// while pages come back full.
    async fn fetch(&self, state: &WalletState, kind: EventKind) -> Result<Vec<RawEvent>, WalletError> {
        let mut filter = Filter::kind(kind, self.owner);
        filter.since = state.watermarks.since(kind);
        filter.limit = Some(self.limit);

        let mut batch = self.transport.query(&filter).await?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut events: Vec<RawEvent> = Vec::new();
        let mut pages = 0;

        loop {
            let full = batch.len() >= self.limit;
            let oldest = batch.iter().map(|e| e.created_at).min();
            let before = events.len();
            for event in batch {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }

            if !full || kind.is_replaceable() || events.len() == before {
                break;
            }
            if pages >= self.max_pages {
                log::warn!(
                    "{}: stopped after {} pages, older events may be missing",
                    kind,
                    pages
                );
                break;
            }
            // Inclusive: events sharing the oldest timestamp are fetched again
            // and dropped by id.
            filter.until = oldest;
            pages += 1;
            batch = self.transport.query(&filter).await?;
        }

        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Apply fetched events of one kind. Only an unsupported cipher fails
    /// the kind; the watermark is then left where it was.
    fn apply_kind(
        &self,
        state: &mut WalletState,
        kind: EventKind,
        events: &[RawEvent],
    ) -> Result<ReconcileReport, WalletError> {
        let mut report = ReconcileReport {
            fetched: events.len(),
            ..Default::default()
        };
        let mut decoded = Vec::with_capacity(events.len());

        for raw in events {
            if state.watermarks.is_seen(kind, raw) {
                report.duplicates += 1;
                continue;
            }
            if raw.pubkey != self.owner {
                log::warn!("skipping {} event {} from foreign author {}", kind, raw.id, raw.pubkey);
                report.failed += 1;
                continue;
            }
            match self.codec.decode(raw) {
                Ok(payload) => decoded.push((raw, payload)),
                Err(CodecError::UnsupportedEncryption(msg)) => {
                    return Err(WalletError::UnsupportedEncryption(msg));
                }
                Err(e) => {
                    log::warn!("skipping {} event: {}", kind, e);
                    report.failed += 1;
                }
            }
        }

        for (raw, payload) in decoded {
            self.apply_event(state, raw, payload, &mut report);
        }
        for raw in events {
            state.watermarks.observe(kind, raw);
        }
        Ok(report)
    }

    fn apply_event(
        &self,
        state: &mut WalletState,
        raw: &RawEvent,
        payload: WalletEvent,
        report: &mut ReconcileReport,
    ) {
        match payload {
            WalletEvent::Wallet(descriptor) => {
                let newer = state
                    .descriptor
                    .as_ref()
                    .map_or(true, |rec| rec.is_older_than(raw));
                if !newer {
                    report.duplicates += 1;
                    return;
                }
                for url in &descriptor.mints {
                    if state.ledger.add_mint(url) {
                        log::info!("registered mint {}", url);
                    }
                }
                state.descriptor = Some(DescriptorRecord {
                    descriptor,
                    event_id: raw.id.clone(),
                    created_at: raw.created_at,
                });
                report.applied += 1;
            }
            WalletEvent::Token(token) => {
                let result = state.ledger.apply_token_event(&raw.id, &token);
                log::debug!(
                    "token {}: +{} -{} ~{}",
                    raw.id,
                    result.added,
                    result.removed,
                    result.rebound
                );
                report.proofs_added += result.added;
                report.proofs_removed += result.removed;
                report.applied += 1;
            }
            WalletEvent::History(entry) => {
                if state.history.insert(entry) {
                    report.applied += 1;
                } else {
                    report.duplicates += 1;
                }
            }
            WalletEvent::Deletion(deletion) => {
                if deletion.targets_tokens() {
                    for id in &deletion.ids {
                        let dropped = state.ledger.drop_event(id);
                        if dropped > 0 {
                            log::info!("deletion {} dropped {} proofs of {}", raw.id, dropped, id);
                        }
                        report.proofs_removed += dropped;
                    }
                }
                report.applied += 1;
            }
        }
    }
}
