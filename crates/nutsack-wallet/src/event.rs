//! Nostr event envelope and the relay transport port.

use crate::error::WalletError;
use async_trait::async_trait;
use nutsack_types::EventKind;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A signed event as stored on relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl RawEvent {
    /// All tags named `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .map(Vec::as_slice)
    }

    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::from_u16(self.kind)
    }
}

/// An event template; the transport signs it on publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(kind: EventKind, tags: Vec<Vec<String>>, content: String) -> Self {
        Self {
            kind: kind.as_u16(),
            created_at: unix_now(),
            tags,
            content,
        }
    }
}

/// Relay query filter (NIP-01 subset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Vec<u16>,
    pub authors: Vec<String>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn kind(kind: EventKind, author: &str) -> Self {
        Self {
            kinds: vec![kind.as_u16()],
            authors: vec![author.to_string()],
            ..Default::default()
        }
    }

    /// Whether `event` satisfies every constraint except `limit`.
    pub fn matches(&self, event: &RawEvent) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && (self.authors.is_empty() || self.authors.contains(&event.pubkey))
            && self.since.map_or(true, |s| event.created_at >= s)
            && self.until.map_or(true, |u| event.created_at <= u)
    }
}

/// Publish/query access to the user's relays.
///
/// Delivery is at-least-once and may reorder events. Implementations map
/// their failures to [`WalletError::Transport`].
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Events matching `filter`, newest first, at most `filter.limit`.
    async fn query(&self, filter: &Filter) -> Result<Vec<RawEvent>, WalletError>;

    /// Sign and publish `event`, returning the signed event.
    async fn publish(&self, event: UnsignedEvent) -> Result<RawEvent, WalletError>;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
