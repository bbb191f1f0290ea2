//! nutsack wallet core.
//!
//! Reconstructs a Cashu ecash wallet from encrypted NIP-60 events replicated
//! across Nostr relays: event codec and NIP-44 cipher, proof ledger,
//! reconciler, proof selection, the Lightning mint/melt bridge, and the
//! storage port that persists wallet state between sessions.

pub mod error;
pub mod nip44;
pub mod event;
pub mod codec;
pub mod ledger;
pub mod state;
pub mod store;
pub mod select;
pub mod mint;
pub mod config;
pub mod reconcile;
pub mod session;
pub mod bridge;

pub use error::{CipherError, CodecError, WalletError};
pub use nip44::{Cipher, ConversationCipher, NoCipher};
pub use event::{EventTransport, Filter, RawEvent, UnsignedEvent};
pub use codec::{Deletion, Direction, EventCodec, HistoryEntry, TokenEvent, WalletDescriptor, WalletEvent};
pub use ledger::{HeldProof, KeysetStatus, MintRecord, ProofLedger};
pub use state::{HistoryLog, PendingMelt, Watermarks, WalletState};
pub use store::{MemoryStore, SqliteStore, WalletStore};
pub use select::{Selection, SelectionOptions, SelectionStrategy};
pub use mint::{load_mint_snapshot, MeltOutcome, MintClient, MintSnapshot, SendSplit};
pub use config::SessionConfig;
pub use reconcile::{ReconcileEvent, ReconcileReport, Reconciler};
pub use session::{Commit, FlushReport, WalletSession};
pub use bridge::{BridgeState, LightningBridge, PayOutcome, PollHandle, ReceiveOutcome};
