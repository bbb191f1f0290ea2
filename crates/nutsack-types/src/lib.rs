//! Core types and constants for the nutsack ecash wallet.
//!
//! This crate provides the value types shared by every nutsack crate:
//! ecash proofs and keysets, the Nostr event kinds the wallet replicates
//! through, mint/melt quotes, and BOLT11 invoice amount decoding.

pub mod constants;
pub mod invoice;
pub mod proof;
pub mod quote;

pub use constants::{format_balance, EventKind};
pub use invoice::{invoice_amount_msat, invoice_amount_sat, InvoiceError};
pub use proof::{proofs_amount, split_amount, Dleq, Keyset, KeysetKeys, Proof};
pub use quote::{MeltQuote, MintQuote, QuoteState};
