//! Wallet error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("encryption unsupported: {0}")]
    UnsupportedEncryption(String),

    #[error("malformed payload in event {event_id}: {reason}")]
    MalformedPayload { event_id: String, reason: String },

    #[error("unknown mint: {0}")]
    UnknownMint(String),

    #[error("unknown keyset {keyset} at {mint}")]
    UnknownKeyset { mint: String, keyset: String },

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("invoice not paid yet")]
    InvoiceNotPaidYet,

    #[error("mint operation {op} failed: {reason}")]
    MintOperationFailed { op: String, reason: String },

    /// The mint accepted the proofs but has not settled the payment.
    #[error("melt quote {quote} is pending at the mint")]
    MeltPending { quote: String },

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] nutsack_rpc::RpcError),

    #[error("{0}")]
    Other(String),
}

impl From<CodecError> for WalletError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnsupportedEncryption(msg) => Self::UnsupportedEncryption(msg),
            CodecError::MalformedPayload { event_id, reason } => {
                Self::MalformedPayload { event_id, reason }
            }
        }
    }
}

/// Errors from decoding or encoding a wallet event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encryption unsupported: {0}")]
    UnsupportedEncryption(String),

    #[error("malformed payload in event {event_id}: {reason}")]
    MalformedPayload { event_id: String, reason: String },
}

impl CodecError {
    pub(crate) fn malformed(event_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            event_id: event_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from the NIP-44 cipher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The signer cannot encrypt or decrypt for this peer.
    #[error("no conversation key for {0}")]
    Unsupported(String),

    #[error("unknown payload version {0}")]
    UnknownVersion(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid MAC")]
    InvalidMac,

    #[error("invalid plaintext length: {0}")]
    InvalidLength(usize),
}
