//! Event kinds, units, and wallet-wide constants.
//!
//! Reference: NIP-60 (Cashu wallets), NIP-09 (event deletion).

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Kinds
// =============================================================================

/// Nostr event kinds the wallet reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventKind {
    /// NIP-09 deletion request.
    Deletion = 5,
    /// Pending mint quote (optional, informational).
    Quote    = 7374,
    /// Unspent proofs for one mint.
    Token    = 7375,
    /// Spending history record.
    History  = 7376,
    /// Replaceable wallet descriptor.
    Wallet   = 17375,
}

impl EventKind {
    /// Kinds the reconciler pulls on every refresh, in processing order.
    pub const SYNCED: [EventKind; 4] = [
        EventKind::Wallet,
        EventKind::Token,
        EventKind::History,
        EventKind::Deletion,
    ];

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            5 => Some(Self::Deletion),
            7374 => Some(Self::Quote),
            7375 => Some(Self::Token),
            7376 => Some(Self::History),
            17375 => Some(Self::Wallet),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Replaceable kinds keep only the newest event per author.
    pub fn is_replaceable(self) -> bool {
        (10000..20000).contains(&(self as u16))
    }

    /// Whether the event content is NIP-44 encrypted to the owner.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Wallet | Self::Token | Self::History | Self::Quote)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deletion => write!(f, "deletion"),
            Self::Quote    => write!(f, "quote"),
            Self::Token    => write!(f, "token"),
            Self::History  => write!(f, "history"),
            Self::Wallet   => write!(f, "wallet"),
        }
    }
}

// =============================================================================
// Units and Amounts
// =============================================================================

/// Default proof unit.
pub const DEFAULT_UNIT: &str = "sat";

/// Millisatoshis per satoshi.
pub const MSAT_PER_SAT: u64 = 1_000;

/// Satoshis per bitcoin.
pub const SAT_PER_BTC: u64 = 100_000_000;

/// Millisatoshis per bitcoin.
pub const MSAT_PER_BTC: u64 = SAT_PER_BTC * MSAT_PER_SAT;

/// Satoshis per millibitcoin.
pub const SAT_PER_MBTC: u64 = 100_000;

/// Balances below this are shown in sats.
const MBTC_DISPLAY_THRESHOLD: u64 = 1_000;

/// Balances at or above this are shown in BTC.
const BTC_DISPLAY_THRESHOLD: u64 = 1_000_000;

/// Format a satoshi amount for display.
///
/// Three bands: `21 sats`, `0.015 mBTC`, `0.0125 BTC`. Fractions are exact,
/// with trailing zeros trimmed.
pub fn format_balance(sats: u64) -> String {
    if sats < MBTC_DISPLAY_THRESHOLD {
        format!("{} sats", sats)
    } else if sats < BTC_DISPLAY_THRESHOLD {
        format!("{} mBTC", decimal(sats, SAT_PER_MBTC, 5))
    } else {
        format!("{} BTC", decimal(sats, SAT_PER_BTC, 8))
    }
}

fn decimal(sats: u64, per_unit: u64, digits: usize) -> String {
    let whole = sats / per_unit;
    let frac = sats % per_unit;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0width$}", frac, width = digits);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

// =============================================================================
// Tag Markers
// =============================================================================

/// Marker on history `e` tags for token events created by the transaction.
pub const MARKER_CREATED: &str = "created";

/// Marker on history `e` tags for token events destroyed by the transaction.
pub const MARKER_DESTROYED: &str = "destroyed";

/// Marker on plaintext history `e` tags for redeemed nutzap events.
pub const MARKER_REDEEMED: &str = "redeemed";
