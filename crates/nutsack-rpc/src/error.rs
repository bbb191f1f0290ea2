//! RPC error types.

use thiserror::Error;

/// Cashu mint error codes (NUT-00 error responses).
pub mod codes {
    pub const TOKEN_ALREADY_SPENT: i64 = 11001;
    pub const TRANSACTION_UNBALANCED: i64 = 11002;
    pub const UNIT_UNSUPPORTED: i64 = 11005;
    pub const KEYSET_UNKNOWN: i64 = 12001;
    pub const KEYSET_INACTIVE: i64 = 12002;
    pub const QUOTE_NOT_PAID: i64 = 20001;
    pub const TOKENS_ALREADY_ISSUED: i64 = 20002;
    pub const QUOTE_PENDING: i64 = 20005;
    pub const INVOICE_ALREADY_PAID: i64 = 20006;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} at {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {method} at {url}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mint error {code} from {method}: {detail}")]
    Mint {
        code: i64,
        detail: String,
        method: String,
    },

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("invalid mint URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, rate limiting, and 5xx responses are
    /// transient; mint protocol errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The mint's protocol error code, if the mint returned one.
    pub fn mint_code(&self) -> Option<i64> {
        match self {
            Self::Mint { code, .. } => Some(*code),
            _ => None,
        }
    }
}
