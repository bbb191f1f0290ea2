//! In-memory relay and mint used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use nutsack_types::{invoice_amount_sat, split_amount, Keyset, MeltQuote, MintQuote, Proof, QuoteState};
use nutsack_wallet::{
    ConversationCipher, EventTransport, Filter, MeltOutcome, MemoryStore, MintClient, MintSnapshot,
    RawEvent, SendSplit, SessionConfig, UnsignedEvent, WalletError, WalletSession,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OWNER: &str = "npub-owner";
pub const MINT: &str = "https://mint.example";
pub const KEYSET: &str = "009a1f293253e41e";

pub fn cipher() -> Arc<ConversationCipher> {
    Arc::new(ConversationCipher::new().with_peer(OWNER, [42u8; 32]))
}

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn open_session(relay: &Arc<FakeRelay>, store: &Arc<MemoryStore>) -> WalletSession {
    WalletSession::open(OWNER, relay.clone(), cipher(), store.clone(), fast_config()).unwrap()
}

/// `n` one-sat proofs with full-size secrets and signatures.
pub fn wide_proofs(n: usize) -> Vec<Proof> {
    (0..n)
        .map(|i| Proof::new(KEYSET, 1, &format!("{:064x}", i), &format!("02{:064x}", i)))
        .collect()
}

pub fn proofs(prefix: &str, amounts: &[u64]) -> Vec<Proof> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, &a)| Proof::new(KEYSET, a, &format!("{}-{}", prefix, i), "02aa"))
        .collect()
}

// ─── Relay ──────────────────────────────────────────────────────────────────

/// Relay that signs with sequential ids and answers NIP-01 filters.
#[derive(Default)]
pub struct FakeRelay {
    events: Mutex<Vec<RawEvent>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    queries: AtomicUsize,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store an event as if published by another device.
    pub fn inject(&self, event: RawEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events_of(&self, kind: u16) -> Vec<RawEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn sign(&self, event: UnsignedEvent) -> RawEvent {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        RawEvent {
            id: format!("{:064x}", n),
            pubkey: OWNER.to_string(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags,
            content: event.content,
            sig: "sig".into(),
        }
    }
}

#[async_trait]
impl EventTransport for FakeRelay {
    async fn query(&self, filter: &Filter) -> Result<Vec<RawEvent>, WalletError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(WalletError::Transport("relay unreachable".into()));
        }
        let mut out: Vec<RawEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn publish(&self, event: UnsignedEvent) -> Result<RawEvent, WalletError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(WalletError::Transport("relay unreachable".into()));
        }
        let signed = self.sign(event);
        self.events.lock().unwrap().push(signed.clone());
        Ok(signed)
    }
}

// ─── Mint ───────────────────────────────────────────────────────────────────

/// Scriptable mint. Quote checks follow `script`, then report paid.
#[derive(Default)]
pub struct FakeMint {
    script: Mutex<VecDeque<QuoteState>>,
    pub checks: AtomicUsize,
    pub mints: AtomicUsize,
    pub melts: AtomicUsize,
    next_secret: AtomicU64,
    pub fee_reserve: AtomicU64,
    /// Change returned by a successful melt.
    pub melt_change: AtomicU64,
    pub fail_send: AtomicBool,
    pub fail_melt: AtomicBool,
    pub fail_check: AtomicBool,
    /// State reported for melts and melt quote checks; `None` means paid.
    melt_state: Mutex<Option<QuoteState>>,
}

impl FakeMint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(states: &[QuoteState]) -> Arc<Self> {
        let mint = Self::default();
        mint.script.lock().unwrap().extend(states.iter().copied());
        Arc::new(mint)
    }

    pub fn set_melt_state(&self, state: QuoteState) {
        *self.melt_state.lock().unwrap() = Some(state);
    }

    fn melt_state(&self) -> QuoteState {
        self.melt_state.lock().unwrap().unwrap_or(QuoteState::Paid)
    }

    fn issue(&self, amount: u64) -> Vec<Proof> {
        split_amount(amount)
            .into_iter()
            .map(|a| {
                let n = self.next_secret.fetch_add(1, Ordering::SeqCst);
                Proof::new(KEYSET, a, &format!("minted-{}", n), "02bb")
            })
            .collect()
    }
}

#[async_trait]
impl MintClient for FakeMint {
    async fn load_mint(&self, _mint: &str) -> Result<MintSnapshot, WalletError> {
        let mut keys = BTreeMap::new();
        keys.insert(KEYSET.to_string(), BTreeMap::from([(1u64, "02cc".to_string())]));
        Ok(MintSnapshot {
            info: None,
            keysets: vec![
                Keyset {
                    id: KEYSET.into(),
                    unit: "sat".into(),
                    active: true,
                    input_fee_ppk: None,
                },
                Keyset {
                    id: "00old".into(),
                    unit: "sat".into(),
                    active: false,
                    input_fee_ppk: None,
                },
            ],
            keys,
        })
    }

    async fn create_mint_quote(&self, _mint: &str, amount: u64) -> Result<MintQuote, WalletError> {
        Ok(MintQuote {
            quote: format!("quote-{}", amount),
            request: "lnbc210n1pfakeinvoice".into(),
            amount,
            state: QuoteState::Unpaid,
            expiry: None,
        })
    }

    async fn check_mint_quote(&self, _mint: &str, quote_id: &str) -> Result<MintQuote, WalletError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(WalletError::Other("mint returned 500".into()));
        }
        let state = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(QuoteState::Paid);
        Ok(MintQuote {
            quote: quote_id.to_string(),
            request: String::new(),
            amount: 0,
            state,
            expiry: None,
        })
    }

    async fn mint_proofs(&self, _mint: &str, amount: u64, _quote_id: &str) -> Result<Vec<Proof>, WalletError> {
        self.mints.fetch_add(1, Ordering::SeqCst);
        Ok(self.issue(amount))
    }

    async fn create_melt_quote(&self, _mint: &str, invoice: &str) -> Result<MeltQuote, WalletError> {
        let amount = invoice_amount_sat(invoice)
            .map_err(|e| WalletError::InvalidInvoice(e.to_string()))?
            .unwrap_or(0);
        Ok(MeltQuote {
            quote: "melt-1".into(),
            amount,
            fee_reserve: self.fee_reserve.load(Ordering::SeqCst),
            state: QuoteState::Unpaid,
            expiry: None,
        })
    }

    async fn send(
        &self,
        _mint: &str,
        amount: u64,
        proofs: Vec<Proof>,
        _include_fees: bool,
    ) -> Result<SendSplit, WalletError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(WalletError::Other("swap rejected".into()));
        }
        let total: u64 = proofs.iter().map(|p| p.amount).sum();
        Ok(SendSplit {
            keep: self.issue(total - amount),
            send: self.issue(amount),
        })
    }

    async fn melt_proofs(
        &self,
        _mint: &str,
        quote: &MeltQuote,
        _proofs: Vec<Proof>,
    ) -> Result<MeltOutcome, WalletError> {
        if self.fail_melt.load(Ordering::SeqCst) {
            return Err(WalletError::Other("no route".into()));
        }
        self.melts.fetch_add(1, Ordering::SeqCst);
        let state = self.melt_state();
        if state != QuoteState::Paid {
            return Ok(MeltOutcome {
                state,
                preimage: None,
                change: Vec::new(),
            });
        }
        let change = self.melt_change.load(Ordering::SeqCst).min(quote.fee_reserve);
        Ok(MeltOutcome {
            state,
            preimage: Some("00".repeat(32)),
            change: self.issue(change),
        })
    }

    async fn check_melt_quote(&self, _mint: &str, quote_id: &str) -> Result<MeltQuote, WalletError> {
        Ok(MeltQuote {
            quote: quote_id.to_string(),
            amount: 0,
            fee_reserve: self.fee_reserve.load(Ordering::SeqCst),
            state: self.melt_state(),
            expiry: None,
        })
    }
}
