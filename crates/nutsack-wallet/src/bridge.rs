//! Lightning bridge.
//!
//! Receive: `Idle → InvoiceRequested → AwaitingPayment → Confirmed`.
//! Send: `Idle → InvoiceParsed → Melting → Settled`.
//!
//! Polling is tied to a [`PollHandle`] carrying the generation it was issued
//! for. Cancelling, or requesting another invoice, moves the generation on,
//! so a stale handle can never resume polling.
//!
//! A melt the mint reports as pending leaves its proofs locked in the
//! session until [`LightningBridge::check_pending_melts`] sees it settle.

use crate::config::SessionConfig;
use crate::error::WalletError;
use crate::mint::{mint_failure, MintClient, SendSplit};
use crate::select::select;
use crate::session::{Commit, WalletSession};
use nutsack_types::{invoice_amount_sat, proofs_amount, MintQuote, Proof, QuoteState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Bridge state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    InvoiceRequested {
        mint: String,
        amount: u64,
    },
    AwaitingPayment {
        mint: String,
        quote: String,
        request: String,
        amount: u64,
    },
    Confirmed {
        mint: String,
        amount: u64,
        token_ids: Vec<String>,
    },
    InvoiceParsed {
        amount: Option<u64>,
    },
    Melting {
        mint: String,
        quote: String,
        amount: u64,
        fee_reserve: u64,
    },
    Settled {
        mint: String,
        amount: u64,
        fee_paid: u64,
    },
}

#[derive(Debug, Default)]
struct CancelState {
    generation: AtomicU64,
    notify: Notify,
}

/// Cancellation handle for one invoice poll.
#[derive(Debug, Clone)]
pub struct PollHandle {
    generation: u64,
    cancel: Arc<CancelState>,
    mint: String,
    quote: String,
    amount: u64,
}

impl PollHandle {
    /// Stop polling. Returns false if the handle was already stale.
    pub fn cancel(&self) -> bool {
        let stopped = self
            .cancel
            .generation
            .compare_exchange(
                self.generation,
                self.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        self.cancel.notify.notify_waiters();
        stopped
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.generation.load(Ordering::SeqCst) != self.generation
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    pub fn quote_id(&self) -> &str {
        &self.quote
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

/// A confirmed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub amount: u64,
    pub proofs: Vec<Proof>,
    pub commit: Commit,
}

/// A settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayOutcome {
    pub amount: u64,
    pub fee_paid: u64,
    pub preimage: Option<String>,
    pub commit: Commit,
}

pub struct LightningBridge {
    mint: Arc<dyn MintClient>,
    poll_interval: Duration,
    state: BridgeState,
    cancel: Arc<CancelState>,
    /// Generation of the handle issued for the current invoice.
    issued: Option<u64>,
}

impl LightningBridge {
    pub fn new(mint: Arc<dyn MintClient>, poll_interval: Duration) -> Self {
        Self {
            mint,
            poll_interval,
            state: BridgeState::Idle,
            cancel: Arc::new(CancelState::default()),
            issued: None,
        }
    }

    /// Bridge polling at the session's configured interval.
    pub fn from_config(mint: Arc<dyn MintClient>, config: &SessionConfig) -> Self {
        Self::new(mint, config.poll_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current state. An invoice whose handle was cancelled reads as `Idle`.
    pub fn state(&self) -> BridgeState {
        if matches!(self.state, BridgeState::AwaitingPayment { .. }) && !self.is_awaiting() {
            return BridgeState::Idle;
        }
        self.state.clone()
    }

    fn is_awaiting(&self) -> bool {
        matches!(self.state, BridgeState::AwaitingPayment { .. })
            && self.issued == Some(self.cancel.generation.load(Ordering::SeqCst))
    }

    /// Cancel any pending invoice and return to `Idle`.
    pub fn cancel(&mut self) {
        self.cancel.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify.notify_waiters();
        if !matches!(self.state, BridgeState::Idle) {
            log::info!("lightning bridge cancelled from {:?}", self.state);
        }
        self.state = BridgeState::Idle;
        self.issued = None;
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Request a mint quote for `amount` sats. Any earlier poll handle
    /// becomes stale.
    pub async fn request_invoice(
        &mut self,
        mint: &str,
        amount: u64,
    ) -> Result<(MintQuote, PollHandle), WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidState("invoice amount must be positive".into()));
        }
        let generation = self.cancel.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel.notify.notify_waiters();
        self.state = BridgeState::InvoiceRequested {
            mint: mint.to_string(),
            amount,
        };

        let quote = match self.mint.create_mint_quote(mint, amount).await {
            Ok(quote) => quote,
            Err(e) => {
                self.state = BridgeState::Idle;
                return Err(mint_failure("create_mint_quote", e));
            }
        };
        log::info!("{}: invoice for {} sats, quote {}", mint, amount, quote.quote);

        self.state = BridgeState::AwaitingPayment {
            mint: mint.to_string(),
            quote: quote.quote.clone(),
            request: quote.request.clone(),
            amount,
        };
        self.issued = Some(generation);
        let handle = PollHandle {
            generation,
            cancel: Arc::clone(&self.cancel),
            mint: mint.to_string(),
            quote: quote.quote.clone(),
            amount,
        };
        Ok((quote, handle))
    }

    /// Poll the quote until it is paid, then mint and commit the proofs.
    ///
    /// "Not paid" re-arms the poll after `poll_interval`. Any other mint
    /// error is returned without retry; the handle stays valid so the caller
    /// may poll again.
    pub async fn await_payment(
        &mut self,
        session: &mut WalletSession,
        handle: &PollHandle,
    ) -> Result<ReceiveOutcome, WalletError> {
        if !Arc::ptr_eq(&handle.cancel, &self.cancel) {
            return Err(WalletError::InvalidState("poll handle belongs to another bridge".into()));
        }

        loop {
            if handle.is_cancelled() {
                return Err(self.cancelled(handle));
            }

            if self.quote_paid(handle).await? {
                if handle.is_cancelled() {
                    return Err(self.cancelled(handle));
                }
                match self
                    .mint
                    .mint_proofs(&handle.mint, handle.amount, &handle.quote)
                    .await
                    .map_err(|e| mint_failure("mint_proofs", e))
                {
                    Ok(proofs) => return self.confirm(session, handle, proofs).await,
                    Err(WalletError::InvoiceNotPaidYet) => {
                        log::debug!("quote {} paid but not yet mintable", handle.quote);
                    }
                    Err(e) => return Err(e),
                }
            }

            self.wait(handle).await?;
        }
    }

    async fn quote_paid(&self, handle: &PollHandle) -> Result<bool, WalletError> {
        let quote = match self
            .mint
            .check_mint_quote(&handle.mint, &handle.quote)
            .await
            .map_err(|e| mint_failure("check_mint_quote", e))
        {
            Ok(quote) => quote,
            Err(WalletError::InvoiceNotPaidYet) => return Ok(false),
            Err(e) => return Err(e),
        };

        match quote.state {
            QuoteState::Paid => Ok(true),
            QuoteState::Issued => Err(WalletError::MintOperationFailed {
                op: "check_mint_quote".into(),
                reason: format!("quote {} already issued", handle.quote),
            }),
            QuoteState::Unpaid | QuoteState::Pending => {
                if let Some(expiry) = quote.expiry {
                    if crate::event::unix_now() > expiry {
                        return Err(WalletError::MintOperationFailed {
                            op: "check_mint_quote".into(),
                            reason: format!("quote {} expired", handle.quote),
                        });
                    }
                }
                log::debug!("quote {} is {}", handle.quote, quote.state);
                Ok(false)
            }
        }
    }

    /// Sleep for one poll interval unless cancelled first.
    async fn wait(&mut self, handle: &PollHandle) -> Result<(), WalletError> {
        let notified = handle.cancel.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if handle.is_cancelled() {
            return Err(self.cancelled(handle));
        }
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = &mut notified => {}
        }
        if handle.is_cancelled() {
            return Err(self.cancelled(handle));
        }
        Ok(())
    }

    async fn confirm(
        &mut self,
        session: &mut WalletSession,
        handle: &PollHandle,
        proofs: Vec<Proof>,
    ) -> Result<ReceiveOutcome, WalletError> {
        let amount = proofs_amount(&proofs);
        if amount != handle.amount {
            log::warn!(
                "quote {}: minted {} sats, expected {}",
                handle.quote,
                amount,
                handle.amount
            );
        }
        let commit = session.commit_receive(&handle.mint, &proofs).await?;
        // Consume the handle so it cannot mint twice.
        handle.cancel();
        self.state = BridgeState::Confirmed {
            mint: handle.mint.clone(),
            amount,
            token_ids: commit.token_ids.clone(),
        };
        Ok(ReceiveOutcome {
            amount,
            proofs,
            commit,
        })
    }

    /// Return to `Idle` if the state still belongs to `handle`.
    fn cancelled(&mut self, handle: &PollHandle) -> WalletError {
        if let BridgeState::AwaitingPayment { quote, .. } = &self.state {
            if *quote == handle.quote {
                log::info!("stopped polling quote {}", handle.quote);
                self.state = BridgeState::Idle;
            }
        }
        WalletError::Cancelled
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Decode the amount of an invoice (`None` if it carries none).
    pub fn parse_invoice(&mut self, invoice: &str) -> Result<Option<u64>, WalletError> {
        let amount = invoice_amount_sat(invoice).map_err(|e| WalletError::InvalidInvoice(e.to_string()))?;
        self.state = BridgeState::InvoiceParsed { amount };
        Ok(amount)
    }

    /// Pay `invoice` with proofs from `mint`.
    ///
    /// Spent proofs are removed only after the mint settles the payment.
    /// If the melt fails after the proofs were swapped, the swap outputs
    /// replace the spent inputs so nothing is lost. A melt still pending at
    /// the mint returns [`WalletError::MeltPending`] with the sent proofs
    /// locked out of the ledger.
    pub async fn pay_invoice(
        &mut self,
        session: &mut WalletSession,
        mint: &str,
        invoice: &str,
    ) -> Result<PayOutcome, WalletError> {
        if self.is_awaiting() {
            return Err(WalletError::InvalidState(
                "an invoice is still awaiting payment".into(),
            ));
        }

        let result = self.melt(session, mint, invoice).await;
        if result.is_err() {
            self.state = BridgeState::Idle;
        }
        result
    }

    async fn melt(
        &mut self,
        session: &mut WalletSession,
        mint: &str,
        invoice: &str,
    ) -> Result<PayOutcome, WalletError> {
        let amount = self
            .parse_invoice(invoice)?
            .ok_or_else(|| WalletError::InvalidInvoice("invoice has no amount".into()))?;
        if !session.state().ledger.has_mint(mint) {
            return Err(WalletError::UnknownMint(mint.to_string()));
        }

        let quote = self
            .mint
            .create_melt_quote(mint, invoice)
            .await
            .map_err(|e| mint_failure("create_melt_quote", e))?;
        if quote.amount != amount {
            log::warn!(
                "melt quote {} is for {} sats, invoice says {}",
                quote.quote,
                quote.amount,
                amount
            );
        }

        let options = session.config().selection_options();
        let selection = select(&session.state().ledger, mint, quote.amount, quote.fee_reserve, &options)?;
        self.state = BridgeState::Melting {
            mint: mint.to_string(),
            quote: quote.quote.clone(),
            amount: quote.amount,
            fee_reserve: quote.fee_reserve,
        };
        log::info!(
            "{}: paying {} sats (+{} reserve) with {} proofs",
            mint,
            quote.amount,
            quote.fee_reserve,
            selection.spend.len()
        );

        let split = self
            .mint
            .send(mint, quote.required(), selection.spend.clone(), true)
            .await
            .map_err(|e| mint_failure("send", e))?;

        let melted = self
            .mint
            .melt_proofs(mint, &quote, split.send.clone())
            .await
            .map_err(|e| mint_failure("melt_proofs", e));
        let outcome = match melted {
            Ok(outcome) if outcome.state == QuoteState::Paid => outcome,
            Ok(outcome) if outcome.state == QuoteState::Pending => {
                session
                    .commit_melt_pending(mint, &quote, &selection.spend, &split.keep, &split.send)
                    .await?;
                return Err(WalletError::MeltPending { quote: quote.quote });
            }
            other => {
                let err = match other {
                    Err(e) => e,
                    Ok(outcome) => WalletError::MintOperationFailed {
                        op: "melt_proofs".into(),
                        reason: format!("quote {} is {}", quote.quote, outcome.state),
                    },
                };
                if was_swapped(&selection.spend, &split) {
                    let mut outputs = split.keep;
                    outputs.extend(split.send);
                    session.commit_swap(mint, &selection.spend, &outputs).await?;
                }
                return Err(err);
            }
        };

        let mut returned = split.keep;
        returned.extend(outcome.change);
        let outflow = selection.total.saturating_sub(proofs_amount(&returned));
        let commit = session
            .commit_spend(mint, &selection.spend, &returned, outflow)
            .await?;

        let fee_paid = outflow.saturating_sub(quote.amount);
        self.state = BridgeState::Settled {
            mint: mint.to_string(),
            amount: quote.amount,
            fee_paid,
        };
        Ok(PayOutcome {
            amount: quote.amount,
            fee_paid,
            preimage: outcome.preimage,
            commit,
        })
    }

    /// Ask the mint about every pending melt and settle the finished ones.
    /// Returns the quotes still pending.
    pub async fn check_pending_melts(&self, session: &mut WalletSession) -> Result<Vec<String>, WalletError> {
        let pending: Vec<(String, String)> = session
            .state()
            .pending_melts
            .iter()
            .map(|(quote, melt)| (quote.clone(), melt.mint.clone()))
            .collect();

        let mut waiting = Vec::new();
        for (quote_id, mint) in pending {
            let quote = self
                .mint
                .check_melt_quote(&mint, &quote_id)
                .await
                .map_err(|e| mint_failure("check_melt_quote", e))?;
            if !session.resolve_melt(&quote_id, quote.state).await? {
                log::debug!("melt quote {} still pending", quote_id);
                waiting.push(quote_id);
            }
        }
        Ok(waiting)
    }
}

/// Whether the swap produced proofs the wallet did not already hold.
fn was_swapped(inputs: &[Proof], split: &SendSplit) -> bool {
    let held: HashSet<&str> = inputs.iter().map(|p| p.secret.as_str()).collect();
    split
        .keep
        .iter()
        .chain(split.send.iter())
        .any(|p| !held.contains(p.secret.as_str()))
}
