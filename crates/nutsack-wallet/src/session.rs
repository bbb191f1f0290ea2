//! Wallet session.
//!
//! Owns the [`WalletState`] of one identity and is the only path through
//! which it is mutated: reconciliation, mint management, and the local
//! commits that follow a confirmed mint or melt. State is saved to the
//! store after every mutation.
//!
//! Commits publish the new token events first and fall back to a local
//! placeholder origin when publishing fails, so proofs returned by a mint
//! are never dropped. [`WalletSession::flush_pending`] publishes them later.
//! Large commits are split into several token events that each fit in one
//! NIP-44 payload.

use crate::codec::{
    encode_deletion, Direction, EventCodec, HistoryEntry, TokenEvent, WalletDescriptor, MAX_TOKEN_CONTENT,
};
use crate::config::SessionConfig;
use crate::error::WalletError;
use crate::event::{unix_now, EventTransport, RawEvent};
use crate::mint::{mint_failure, MintClient};
use crate::nip44::Cipher;
use crate::reconcile::{ReconcileEvent, ReconcileReport, Reconciler};
use crate::state::{is_pending_origin, DescriptorRecord, PendingMelt, WalletState, PENDING_PREFIX};
use crate::store::WalletStore;
use nutsack_rpc::normalize_url;
use nutsack_types::{proofs_amount, MeltQuote, Proof, QuoteState};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Outcome of a local commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    /// Token events now holding the proofs, empty if nothing remained.
    pub token_ids: Vec<String>,
    /// Whether every token event reached the relays.
    pub published: bool,
    /// Token events superseded by this commit.
    pub destroyed: BTreeSet<String>,
    pub history_id: Option<String>,
}

/// Counters from [`WalletSession::flush_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub tokens: usize,
    pub history: usize,
    /// Held token events that cannot be encoded and stay parked.
    pub skipped: usize,
}

pub struct WalletSession {
    identity: String,
    state: WalletState,
    transport: Arc<dyn EventTransport>,
    cipher: Arc<dyn Cipher>,
    store: Arc<dyn WalletStore>,
    config: SessionConfig,
}

impl WalletSession {
    /// Open the session for `identity`, loading cached state if any.
    pub fn open(
        identity: &str,
        transport: Arc<dyn EventTransport>,
        cipher: Arc<dyn Cipher>,
        store: Arc<dyn WalletStore>,
        config: SessionConfig,
    ) -> Result<Self, WalletError> {
        let state = match store.load(identity)? {
            Some(state) => {
                log::info!(
                    "loaded wallet {}: {} proofs, {} mints",
                    identity,
                    state.ledger.len(),
                    state.ledger.mints().count()
                );
                state
            }
            None => WalletState::new(),
        };
        Ok(Self {
            identity: identity.to_string(),
            state,
            transport,
            cipher,
            store,
            config,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn save(&self) -> Result<(), WalletError> {
        self.store.save(&self.identity, &self.state)
    }

    fn codec(&self) -> EventCodec<'_> {
        EventCodec::new(self.cipher.as_ref(), &self.identity)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Pull remote events into the local state. State is saved even when a
    /// kind could not be decrypted.
    pub async fn refresh(
        &mut self,
        event_tx: Option<&tokio::sync::mpsc::Sender<ReconcileEvent>>,
    ) -> Result<ReconcileReport, WalletError> {
        let reconciler = Reconciler::new(
            self.transport.as_ref(),
            self.cipher.as_ref(),
            &self.identity,
            self.config.query_limit,
            self.config.max_pages,
        );
        let result = reconciler.run(&mut self.state, event_tx).await;
        self.save()?;
        result
    }

    // =========================================================================
    // Wallet and Mints
    // =========================================================================

    /// Publish a new wallet descriptor.
    pub async fn create_wallet(
        &mut self,
        mints: &[&str],
        privkey: Option<String>,
    ) -> Result<RawEvent, WalletError> {
        let mut descriptor = WalletDescriptor {
            privkey,
            mints: Vec::new(),
        };
        for url in mints {
            descriptor.add_mint(&normalize_url(url)?);
        }
        if descriptor.mints.is_empty() {
            return Err(WalletError::InvalidState("a wallet needs at least one mint".into()));
        }
        self.publish_descriptor(descriptor).await
    }

    /// Add a mint to the descriptor. Returns false if already present.
    pub async fn add_mint(&mut self, url: &str) -> Result<bool, WalletError> {
        let url = normalize_url(url)?;
        let mut descriptor = self.current_descriptor();
        if !descriptor.add_mint(&url) {
            return Ok(false);
        }
        self.publish_descriptor(descriptor).await?;
        Ok(true)
    }

    /// Remove a mint from the descriptor.
    ///
    /// Refused for the last mint and for mints still holding proofs.
    pub async fn remove_mint(&mut self, url: &str) -> Result<(), WalletError> {
        let url = normalize_url(url)?;
        let mut descriptor = self.current_descriptor();
        if !descriptor.mints.iter().any(|m| *m == url) {
            return Err(WalletError::UnknownMint(url));
        }
        if descriptor.mints.len() == 1 {
            return Err(WalletError::InvalidState("cannot remove the last mint".into()));
        }
        if self.state.ledger.held_for_mint(&url).next().is_some() {
            return Err(WalletError::InvalidState(format!("{} still holds proofs", url)));
        }

        descriptor.mints.retain(|m| *m != url);
        self.publish_descriptor(descriptor).await?;
        if self.state.ledger.has_mint(&url) {
            self.state.ledger.remove_mint(&url)?;
        }
        if self.state.active_mint.as_deref() == Some(url.as_str()) {
            self.state.active_mint = None;
        }
        self.save()
    }

    pub fn set_active_mint(&mut self, url: &str) -> Result<(), WalletError> {
        let url = normalize_url(url)?;
        if !self.state.mint_urls().contains(&url) && !self.state.ledger.has_mint(&url) {
            return Err(WalletError::UnknownMint(url));
        }
        self.state.active_mint = Some(url);
        self.save()
    }

    /// Fetch keysets, keys and info for a known mint.
    pub async fn load_mint(&mut self, client: &dyn MintClient, url: &str) -> Result<(), WalletError> {
        let url = normalize_url(url)?;
        if !self.state.ledger.has_mint(&url) {
            return Err(WalletError::UnknownMint(url));
        }
        let snapshot = client
            .load_mint(&url)
            .await
            .map_err(|e| mint_failure("load_mint", e))?;

        if let Some(info) = snapshot.info {
            let value = serde_json::to_value(info).map_err(|e| WalletError::Other(e.to_string()))?;
            self.state.ledger.set_mint_info(&url, value)?;
        }
        self.state.ledger.set_keysets(&url, snapshot.keysets)?;
        for (id, keys) in snapshot.keys {
            self.state.ledger.set_keys(&url, &id, keys)?;
        }
        self.save()
    }

    fn current_descriptor(&self) -> WalletDescriptor {
        match &self.state.descriptor {
            Some(rec) => rec.descriptor.clone(),
            None => WalletDescriptor {
                privkey: None,
                mints: self.state.ledger.mints().map(|m| m.url.clone()).collect(),
            },
        }
    }

    async fn publish_descriptor(&mut self, descriptor: WalletDescriptor) -> Result<RawEvent, WalletError> {
        let unsigned = self.codec().encode_wallet(&descriptor)?;
        let event = self.transport.publish(unsigned).await?;
        for url in &descriptor.mints {
            self.state.ledger.add_mint(url);
        }
        log::info!("published wallet descriptor {} ({} mints)", event.id, descriptor.mints.len());
        self.state.descriptor = Some(DescriptorRecord {
            descriptor,
            event_id: event.id.clone(),
            created_at: event.created_at,
        });
        self.save()?;
        Ok(event)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn balances(&self) -> BTreeMap<String, u64> {
        self.state.ledger.balances()
    }

    pub fn total_balance(&self) -> u64 {
        self.state.ledger.total_balance()
    }

    /// History, newest first.
    pub fn history(&self) -> Vec<&HistoryEntry> {
        self.state.history.newest_first()
    }

    /// Token events waiting to be published.
    pub fn pending_count(&self) -> usize {
        self.state.pending_tokens.len()
    }

    // =========================================================================
    // Commits
    // =========================================================================

    /// Record proofs received from a mint under new token events and
    /// log an incoming history entry.
    pub async fn commit_receive(&mut self, mint: &str, proofs: &[Proof]) -> Result<Commit, WalletError> {
        if proofs.is_empty() {
            return Err(WalletError::InvalidState("no proofs to commit".into()));
        }
        let token = TokenEvent {
            mint: mint.to_string(),
            proofs: proofs.to_vec(),
            del: Vec::new(),
        };
        let parts = self.publish_token(&token).await;
        let mut added = 0;
        for (id, part) in &parts {
            added += self.state.ledger.apply_token_event(id, part).added;
        }
        self.save()?;
        let token_ids: Vec<String> = parts.into_iter().map(|(id, _)| id).collect();
        log::info!(
            "received {} sats from {} ({} new proofs, {} token events)",
            token.amount(),
            mint,
            added,
            token_ids.len()
        );

        let history_id = self
            .record_history(
                Direction::In,
                token.amount(),
                token_ids.iter().cloned().collect(),
                BTreeSet::new(),
            )
            .await?;
        Ok(Commit {
            published: all_published(&token_ids),
            token_ids,
            destroyed: BTreeSet::new(),
            history_id,
        })
    }

    /// Replace `spent` with `returned` after a confirmed payment and log an
    /// outgoing history entry of `amount`.
    pub async fn commit_spend(
        &mut self,
        mint: &str,
        spent: &[Proof],
        returned: &[Proof],
        amount: u64,
    ) -> Result<Commit, WalletError> {
        let mut commit = self.commit_replace(mint, spent, returned).await?;
        let created: BTreeSet<String> = commit.token_ids.iter().cloned().collect();
        commit.history_id = self
            .record_history(Direction::Out, amount, created, commit.destroyed.clone())
            .await?;
        Ok(commit)
    }

    /// Replace `spent` with `outputs` of a swap, without a history entry.
    pub async fn commit_swap(
        &mut self,
        mint: &str,
        spent: &[Proof],
        outputs: &[Proof],
    ) -> Result<Commit, WalletError> {
        self.commit_replace(mint, spent, outputs).await
    }

    /// Replace `spent` with `keep` while the mint holds `locked` against a
    /// melt it has not settled. The locked proofs stay out of the ledger
    /// until [`WalletSession::resolve_melt`] sees the final quote state.
    pub async fn commit_melt_pending(
        &mut self,
        mint: &str,
        quote: &MeltQuote,
        spent: &[Proof],
        keep: &[Proof],
        locked: &[Proof],
    ) -> Result<Commit, WalletError> {
        let commit = self.commit_replace(mint, spent, keep).await?;
        self.state.pending_melts.insert(
            quote.quote.clone(),
            PendingMelt {
                mint: mint.to_string(),
                amount: quote.amount,
                proofs: locked.to_vec(),
                created: commit.token_ids.iter().cloned().collect(),
                destroyed: commit.destroyed.clone(),
            },
        );
        self.save()?;
        log::warn!(
            "{}: melt quote {} pending, {} sats locked",
            mint,
            quote.quote,
            proofs_amount(locked)
        );
        Ok(commit)
    }

    /// Settle a pending melt from the quote state reported by the mint.
    ///
    /// `Paid` logs the outgoing payment; `Unpaid` returns the locked proofs
    /// to the wallet. Returns false while the quote is still pending.
    pub async fn resolve_melt(&mut self, quote_id: &str, state: QuoteState) -> Result<bool, WalletError> {
        let melt = self
            .state
            .pending_melts
            .get(quote_id)
            .cloned()
            .ok_or_else(|| WalletError::InvalidState(format!("no pending melt for quote {}", quote_id)))?;

        match state {
            QuoteState::Pending => return Ok(false),
            QuoteState::Paid | QuoteState::Issued => {
                self.state.pending_melts.remove(quote_id);
                log::info!("{}: melt quote {} settled", melt.mint, quote_id);
                self.record_history(
                    Direction::Out,
                    proofs_amount(&melt.proofs),
                    melt.created,
                    melt.destroyed,
                )
                .await?;
            }
            QuoteState::Unpaid => {
                self.state.pending_melts.remove(quote_id);
                log::info!("{}: melt quote {} failed, proofs returned", melt.mint, quote_id);
                self.commit_replace(&melt.mint, &[], &melt.proofs).await?;
            }
        }
        self.save()?;
        Ok(true)
    }

    /// Remove `spent`, roll the untouched proofs of every token event they
    /// came from into new token events together with `returned`, and
    /// retire the old events.
    async fn commit_replace(
        &mut self,
        mint: &str,
        spent: &[Proof],
        returned: &[Proof],
    ) -> Result<Commit, WalletError> {
        let destroyed = self.state.ledger.origins_of(spent);
        let spent_secrets: HashSet<&str> = spent.iter().map(|p| p.secret.as_str()).collect();

        let mut seen = HashSet::new();
        let proofs: Vec<Proof> = destroyed
            .iter()
            .flat_map(|id| self.state.ledger.proofs_from_event(id))
            .filter(|p| !spent_secrets.contains(p.secret.as_str()))
            .chain(returned.iter().cloned())
            .filter(|p| seen.insert(p.secret.clone()))
            .collect();
        let published_del: Vec<String> = destroyed
            .iter()
            .filter(|id| !is_pending_origin(id))
            .cloned()
            .collect();

        let mut commit = Commit {
            destroyed: destroyed.clone(),
            ..Default::default()
        };

        if proofs.is_empty() {
            self.state.ledger.remove_proofs(spent);
            for id in &destroyed {
                self.state.ledger.drop_event(id);
            }
        } else {
            let token = TokenEvent {
                mint: mint.to_string(),
                proofs,
                del: published_del.clone(),
            };
            let parts = self.publish_token(&token).await;
            self.state.ledger.remove_proofs(spent);
            // Each part drops what it does not carry; later parts add theirs back.
            for (id, part) in &parts {
                let local = TokenEvent {
                    del: destroyed.iter().cloned().collect(),
                    ..part.clone()
                };
                self.state.ledger.apply_token_event(id, &local);
            }
            commit.token_ids = parts.into_iter().map(|(id, _)| id).collect();
            commit.published = all_published(&commit.token_ids);
        }
        for id in destroyed.iter().filter(|id| is_pending_origin(id)) {
            self.state.pending_tokens.remove(id);
        }
        self.save()?;
        log::info!(
            "{}: spent {} proofs ({} sats), {} returned, {} token events retired",
            mint,
            spent.len(),
            proofs_amount(spent),
            returned.len(),
            destroyed.len()
        );

        // The new token events already supersede these through `del`.
        if commit.published || commit.token_ids.is_empty() {
            self.publish_deletion(&published_del).await;
        }
        Ok(commit)
    }

    /// Publish a token event as one or more parts that fit the cipher's
    /// size limit. Parts that are not published are parked under
    /// placeholder origins. Returns each part with the id it is held under.
    async fn publish_token(&mut self, token: &TokenEvent) -> Vec<(String, TokenEvent)> {
        let parts = match token.split(MAX_TOKEN_CONTENT) {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("cannot measure token event for {}: {}", token.mint, e);
                vec![token.clone()]
            }
        };
        if parts.len() > 1 {
            log::debug!("token event for {} split into {} parts", token.mint, parts.len());
        }

        let mut offline = false;
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            let published = if offline {
                None
            } else {
                let encoded = self.codec().encode_token(&part);
                match encoded {
                    Ok(unsigned) => match self.transport.publish(unsigned).await {
                        Ok(event) => Some(event.id),
                        Err(e) => {
                            log::warn!("token event for {} not published: {}", part.mint, e);
                            offline = true;
                            None
                        }
                    },
                    Err(e) => {
                        log::error!("token event for {} cannot be encoded: {}", part.mint, e);
                        None
                    }
                }
            };
            let id = match published {
                Some(id) => id,
                None => self.park_token(&part),
            };
            out.push((id, part));
        }
        out
    }

    fn park_token(&mut self, token: &TokenEvent) -> String {
        let placeholder = format!("{}{}", PENDING_PREFIX, hex::encode(rand::random::<[u8; 8]>()));
        log::warn!(
            "holding {} proofs for {} as {}",
            token.proofs.len(),
            token.mint,
            placeholder
        );
        self.state.pending_tokens.insert(placeholder.clone(), token.clone());
        placeholder
    }

    async fn publish_deletion(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.transport.publish(encode_deletion(ids)).await {
            log::warn!("deletion of {} token events not published: {}", ids.len(), e);
        }
    }

    /// Append a history entry, publishing it if possible.
    async fn record_history(
        &mut self,
        direction: Direction,
        amount: u64,
        created: BTreeSet<String>,
        destroyed: BTreeSet<String>,
    ) -> Result<Option<String>, WalletError> {
        let mut entry = HistoryEntry {
            id: None,
            direction,
            amount,
            created,
            destroyed,
            redeemed: BTreeSet::new(),
            timestamp: unix_now(),
        };
        entry.id = self.publish_history(&entry).await;
        let id = entry.id.clone();
        self.state.history.insert(entry);
        self.save()?;
        Ok(id)
    }

    /// Publish a history entry; placeholder ids are left out.
    async fn publish_history(&self, entry: &HistoryEntry) -> Option<String> {
        let mut public = entry.clone();
        public.created.retain(|id| !is_pending_origin(id));
        public.destroyed.retain(|id| !is_pending_origin(id));

        let encoded = self.codec().encode_history(&public);
        let result = match encoded {
            Ok(unsigned) => self.transport.publish(unsigned).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(event) => Some(event.id),
            Err(e) => {
                log::warn!("history entry not published: {}", e);
                None
            }
        }
    }

    /// Publish token events and history entries that failed earlier.
    ///
    /// Held token events that cannot be encoded are skipped and stay
    /// parked. Stops at the first token event the relays refuse.
    pub async fn flush_pending(&mut self) -> Result<FlushReport, WalletError> {
        let mut report = FlushReport::default();
        let pending: Vec<(String, TokenEvent)> = self
            .state
            .pending_tokens
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        'held: for (placeholder, token) in pending {
            let parts = token
                .split(MAX_TOKEN_CONTENT)
                .unwrap_or_else(|_| vec![token.clone()]);
            let mut encoded = Vec::with_capacity(parts.len());
            for part in &parts {
                match self.codec().encode_token(part) {
                    Ok(unsigned) => encoded.push(unsigned),
                    Err(e) => {
                        log::warn!("skipping held token event {}: {}", placeholder, e);
                        report.skipped += 1;
                        continue 'held;
                    }
                }
            }

            let mut ids = Vec::with_capacity(parts.len());
            for (part, unsigned) in parts.iter().zip(encoded) {
                let event = match self.transport.publish(unsigned).await {
                    Ok(event) => event,
                    Err(e) => {
                        if !ids.is_empty() {
                            // Keep only the unpublished remainder parked.
                            let rest = TokenEvent {
                                proofs: parts[ids.len()..]
                                    .iter()
                                    .flat_map(|p| p.proofs.iter().cloned())
                                    .collect(),
                                ..token.clone()
                            };
                            self.state.pending_tokens.insert(placeholder.clone(), rest);
                            self.save()?;
                        }
                        return Err(e);
                    }
                };
                self.state.ledger.rebind(&part.proofs, &event.id);
                self.state.history.link_token_id(&placeholder, &event.id);
                for melt in self.state.pending_melts.values_mut() {
                    if melt.created.contains(&placeholder) {
                        melt.created.insert(event.id.clone());
                    }
                }
                ids.push(event.id);
                report.tokens += 1;
            }

            self.state.ledger.tombstone(&placeholder);
            self.state.history.forget_token_id(&placeholder);
            for melt in self.state.pending_melts.values_mut() {
                melt.created.remove(&placeholder);
            }
            self.state.pending_tokens.remove(&placeholder);
            self.save()?;
            log::info!("published held token event {} as {}", placeholder, ids.join(", "));

            self.publish_deletion(&token.del).await;
        }

        let unpublished: Vec<HistoryEntry> = self
            .state
            .history
            .unpublished_mut()
            .map(|e| e.clone())
            .collect();
        let mut ids = Vec::with_capacity(unpublished.len());
        for entry in &unpublished {
            ids.push(self.publish_history(entry).await);
        }
        for (entry, id) in self.state.history.unpublished_mut().zip(ids) {
            if id.is_some() {
                entry.id = id;
                report.history += 1;
            }
        }
        self.save()?;
        Ok(report)
    }
}

fn all_published(ids: &[String]) -> bool {
    !ids.is_empty() && ids.iter().all(|id| !is_pending_origin(id))
}
