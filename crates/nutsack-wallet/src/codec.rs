//! Wallet event codec.
//!
//! Translates between relay events and the wallet's typed payloads:
//!
//! | kind  | payload            | content                         |
//! |-------|--------------------|---------------------------------|
//! | 17375 | [`WalletDescriptor`] | encrypted `{privkey?, mints}`   |
//! | 7375  | [`TokenEvent`]     | encrypted `{mint, proofs, del?}`  |
//! | 7376  | [`HistoryEntry`]   | encrypted array of string tuples |
//! | 5     | [`Deletion`]       | plaintext `e` and `k` tags       |
//!
//! Reference: NIP-60, NIP-09.

use crate::error::{CipherError, CodecError};
use crate::event::{RawEvent, UnsignedEvent};
use crate::nip44::{Cipher, MAX_PLAINTEXT};
use nutsack_rpc::normalize_url;
use nutsack_types::constants::{MARKER_CREATED, MARKER_DESTROYED, MARKER_REDEEMED};
use nutsack_types::{proofs_amount, EventKind, Proof};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Largest token event JSON the cipher accepts.
pub const MAX_TOKEN_CONTENT: usize = MAX_PLAINTEXT;

// =============================================================================
// Payload Types
// =============================================================================

/// Replaceable wallet configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDescriptor {
    /// Wallet-scoped key for P2PK-locked proofs (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey: Option<String>,
    /// Mint URLs in insertion order, without duplicates.
    #[serde(default)]
    pub mints: Vec<String>,
}

impl WalletDescriptor {
    /// Append `url` unless already present. Returns true if added.
    pub fn add_mint(&mut self, url: &str) -> bool {
        if self.mints.iter().any(|m| m == url) {
            return false;
        }
        self.mints.push(url.to_string());
        true
    }
}

/// Unspent proofs from one mint, optionally superseding older token events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub mint: String,
    pub proofs: Vec<Proof>,
    /// Token event ids this event replaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub del: Vec<String>,
}

impl TokenEvent {
    pub fn amount(&self) -> u64 {
        proofs_amount(&self.proofs)
    }

    /// Split into token events whose JSON fits in `max_len` bytes.
    ///
    /// Every part carries the full `del` list, so whichever part a device
    /// applies first, the superseded events end up tombstoned and each
    /// proof bound to the part that carries it. A proof too large on its
    /// own still gets a part of its own.
    pub fn split(&self, max_len: usize) -> Result<Vec<TokenEvent>, CodecError> {
        let empty = TokenEvent {
            mint: self.mint.clone(),
            proofs: Vec::new(),
            del: self.del.clone(),
        };
        let base = json_len(&empty)?;

        let mut parts = Vec::new();
        let mut current = empty.clone();
        let mut len = base;
        for proof in &self.proofs {
            // One separating comma per proof.
            let size = json_len(proof)? + 1;
            if !current.proofs.is_empty() && len + size > max_len {
                parts.push(std::mem::replace(&mut current, empty.clone()));
                len = base;
            }
            current.proofs.push(proof.clone());
            len += size;
        }
        if !current.proofs.is_empty() || parts.is_empty() {
            parts.push(current);
        }
        Ok(parts)
    }
}

fn json_len<T: Serialize>(value: &T) -> Result<usize, CodecError> {
    serde_json::to_vec(value)
        .map(|v| v.len())
        .map_err(|e| CodecError::malformed("", e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One spending history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Event id, once published.
    #[serde(default)]
    pub id: Option<String>,
    pub direction: Direction,
    pub amount: u64,
    #[serde(default)]
    pub created: BTreeSet<String>,
    #[serde(default)]
    pub destroyed: BTreeSet<String>,
    #[serde(default)]
    pub redeemed: BTreeSet<String>,
    pub timestamp: u64,
}

/// A NIP-09 deletion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub ids: Vec<String>,
    pub kinds: Vec<u16>,
}

impl Deletion {
    /// Whether the request applies to token events. An absent `k` tag
    /// is read as unrestricted.
    pub fn targets_tokens(&self) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&EventKind::Token.as_u16())
    }
}

/// A decoded wallet event, keyed by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Wallet(WalletDescriptor),
    Token(TokenEvent),
    History(HistoryEntry),
    Deletion(Deletion),
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes and decodes events for one wallet owner.
pub struct EventCodec<'a> {
    cipher: &'a dyn Cipher,
    owner: &'a str,
}

impl<'a> EventCodec<'a> {
    pub fn new(cipher: &'a dyn Cipher, owner: &'a str) -> Self {
        Self { cipher, owner }
    }

    /// Decode any wallet event by kind.
    pub fn decode(&self, raw: &RawEvent) -> Result<WalletEvent, CodecError> {
        match raw.event_kind() {
            Some(EventKind::Wallet) => self.decode_wallet(raw).map(WalletEvent::Wallet),
            Some(EventKind::Token) => self.decode_token(raw).map(WalletEvent::Token),
            Some(EventKind::History) => self.decode_history(raw).map(WalletEvent::History),
            Some(EventKind::Deletion) => decode_deletion(raw).map(WalletEvent::Deletion),
            _ => Err(CodecError::malformed(
                &raw.id,
                format!("unexpected kind {}", raw.kind),
            )),
        }
    }

    pub fn decode_wallet(&self, raw: &RawEvent) -> Result<WalletDescriptor, CodecError> {
        expect_kind(raw, EventKind::Wallet)?;
        let value: Value = self.decrypt_json(raw)?;

        let mut desc = match value {
            Value::Object(_) => serde_json::from_value::<WalletDescriptor>(value)
                .map_err(|e| CodecError::malformed(&raw.id, e.to_string()))?,
            // Tag-array form: [["privkey", hex], ["mint", url], ...]
            Value::Array(_) => {
                let tags: Vec<Vec<String>> = serde_json::from_value(value)
                    .map_err(|e| CodecError::malformed(&raw.id, e.to_string()))?;
                let mut desc = WalletDescriptor::default();
                for tag in tags {
                    match (tag.first().map(String::as_str), tag.get(1)) {
                        (Some("privkey"), Some(key)) => desc.privkey = Some(key.clone()),
                        (Some("mint"), Some(url)) => desc.mints.push(url.clone()),
                        _ => {}
                    }
                }
                desc
            }
            _ => return Err(CodecError::malformed(&raw.id, "wallet content is not an object")),
        };

        let mut mints = WalletDescriptor::default();
        let plaintext = raw.tags_named("mint").filter_map(|t| t.get(1));
        for url in desc.mints.iter().chain(plaintext) {
            match normalize_url(url) {
                Ok(url) => {
                    mints.add_mint(&url);
                }
                Err(_) => log::warn!("wallet event {}: ignoring invalid mint {:?}", raw.id, url),
            }
        }
        desc.mints = mints.mints;
        Ok(desc)
    }

    pub fn decode_token(&self, raw: &RawEvent) -> Result<TokenEvent, CodecError> {
        expect_kind(raw, EventKind::Token)?;
        let mut token: TokenEvent = self.decrypt_json(raw)?;

        token.mint = normalize_url(&token.mint)
            .map_err(|e| CodecError::malformed(&raw.id, e.to_string()))?;
        if let Some(p) = token.proofs.iter().find(|p| p.amount == 0 || p.secret.is_empty()) {
            return Err(CodecError::malformed(
                &raw.id,
                format!("invalid proof (amount {}, secret {:?})", p.amount, p.secret),
            ));
        }
        Ok(token)
    }

    pub fn decode_history(&self, raw: &RawEvent) -> Result<HistoryEntry, CodecError> {
        expect_kind(raw, EventKind::History)?;
        let items: Vec<Vec<String>> = self.decrypt_json(raw)?;

        let mut direction = None;
        let mut amount = None;
        let mut created = BTreeSet::new();
        let mut destroyed = BTreeSet::new();

        for item in &items {
            let key = item.first().map(String::as_str);
            let value = item.get(1);
            let marker = item.get(3).map(String::as_str);
            match (key, value, marker) {
                (Some("direction"), Some(v), _) => {
                    direction = Some(match v.as_str() {
                        "in" => Direction::In,
                        "out" => Direction::Out,
                        other => {
                            return Err(CodecError::malformed(
                                &raw.id,
                                format!("unknown direction {:?}", other),
                            ))
                        }
                    });
                }
                (Some("amount"), Some(v), _) => {
                    amount = Some(v.parse::<u64>().map_err(|_| {
                        CodecError::malformed(&raw.id, format!("invalid amount {:?}", v))
                    })?);
                }
                (Some("e"), Some(id), Some(MARKER_CREATED)) => {
                    created.insert(id.clone());
                }
                (Some("e"), Some(id), Some(MARKER_DESTROYED)) => {
                    destroyed.insert(id.clone());
                }
                _ => {}
            }
        }

        let redeemed = raw
            .tags_named("e")
            .filter(|t| t.get(3).map(String::as_str) == Some(MARKER_REDEEMED))
            .filter_map(|t| t.get(1).cloned())
            .collect();

        Ok(HistoryEntry {
            id: Some(raw.id.clone()),
            direction: direction.ok_or_else(|| CodecError::malformed(&raw.id, "missing direction"))?,
            amount: amount.ok_or_else(|| CodecError::malformed(&raw.id, "missing amount"))?,
            created,
            destroyed,
            redeemed,
            timestamp: raw.created_at,
        })
    }

    pub fn encode_wallet(&self, desc: &WalletDescriptor) -> Result<UnsignedEvent, CodecError> {
        let content = self.encrypt_json(desc)?;
        let tags = desc
            .mints
            .iter()
            .map(|m| vec!["mint".to_string(), m.clone()])
            .collect();
        Ok(UnsignedEvent::new(EventKind::Wallet, tags, content))
    }

    pub fn encode_token(&self, token: &TokenEvent) -> Result<UnsignedEvent, CodecError> {
        let content = self.encrypt_json(token)?;
        Ok(UnsignedEvent::new(EventKind::Token, Vec::new(), content))
    }

    pub fn encode_history(&self, entry: &HistoryEntry) -> Result<UnsignedEvent, CodecError> {
        let mut items = vec![
            vec!["direction".to_string(), entry.direction.as_str().to_string()],
            vec!["amount".to_string(), entry.amount.to_string()],
        ];
        items.extend(entry.created.iter().map(|id| marker_tag(id, MARKER_CREATED)));
        items.extend(entry.destroyed.iter().map(|id| marker_tag(id, MARKER_DESTROYED)));

        let content = self.encrypt_json(&items)?;
        let tags = entry
            .redeemed
            .iter()
            .map(|id| marker_tag(id, MARKER_REDEEMED))
            .collect();
        Ok(UnsignedEvent::new(EventKind::History, tags, content))
    }

    fn decrypt_json<T: serde::de::DeserializeOwned>(&self, raw: &RawEvent) -> Result<T, CodecError> {
        let plaintext = self
            .cipher
            .decrypt(self.owner, &raw.content)
            .map_err(|e| cipher_error(&raw.id, e))?;
        serde_json::from_str(&plaintext).map_err(|e| CodecError::malformed(&raw.id, e.to_string()))
    }

    fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, CodecError> {
        let json =
            serde_json::to_string(value).map_err(|e| CodecError::malformed("", e.to_string()))?;
        self.cipher
            .encrypt(self.owner, &json)
            .map_err(|e| cipher_error("", e))
    }
}

/// Decode a deletion request. Deletions are plaintext.
pub fn decode_deletion(raw: &RawEvent) -> Result<Deletion, CodecError> {
    expect_kind(raw, EventKind::Deletion)?;
    let ids: Vec<String> = raw
        .tags_named("e")
        .filter_map(|t| t.get(1).cloned())
        .collect();
    if ids.is_empty() {
        return Err(CodecError::malformed(&raw.id, "deletion without e tags"));
    }
    let kinds = raw
        .tags_named("k")
        .filter_map(|t| t.get(1).and_then(|k| k.parse().ok()))
        .collect();
    Ok(Deletion { ids, kinds })
}

/// Deletion request for token events.
pub fn encode_deletion(ids: &[String]) -> UnsignedEvent {
    let mut tags: Vec<Vec<String>> = ids
        .iter()
        .map(|id| vec!["e".to_string(), id.clone()])
        .collect();
    tags.push(vec!["k".to_string(), EventKind::Token.as_u16().to_string()]);
    UnsignedEvent::new(EventKind::Deletion, tags, String::new())
}

fn marker_tag(id: &str, marker: &str) -> Vec<String> {
    vec!["e".to_string(), id.to_string(), String::new(), marker.to_string()]
}

fn expect_kind(raw: &RawEvent, kind: EventKind) -> Result<(), CodecError> {
    if raw.kind != kind.as_u16() {
        return Err(CodecError::malformed(
            &raw.id,
            format!("expected kind {}, got {}", kind.as_u16(), raw.kind),
        ));
    }
    Ok(())
}

fn cipher_error(event_id: &str, e: CipherError) -> CodecError {
    match e {
        CipherError::Unsupported(msg) => CodecError::UnsupportedEncryption(msg),
        other => CodecError::malformed(event_id, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nip44::{ConversationCipher, NoCipher};

    const OWNER: &str = "owner-pubkey";

    fn cipher() -> ConversationCipher {
        ConversationCipher::new().with_peer(OWNER, [42u8; 32])
    }

    fn sign(template: UnsignedEvent, id: &str) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            pubkey: OWNER.to_string(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: String::new(),
        }
    }

    fn wide_proofs(n: usize) -> Vec<Proof> {
        (0..n)
            .map(|i| Proof::new("009a1f293253e41e", 1, &format!("{:064x}", i), &format!("02{:064x}", i)))
            .collect()
    }

    #[test]
    fn test_token_split_fits_limit() {
        let token = TokenEvent {
            mint: "https://mint.example".into(),
            proofs: wide_proofs(400),
            del: vec!["a".repeat(64)],
        };
        let parts = token.split(MAX_TOKEN_CONTENT).unwrap();
        assert!(parts.len() >= 2);
        for part in &parts {
            assert!(serde_json::to_vec(part).unwrap().len() <= MAX_TOKEN_CONTENT);
            assert_eq!(part.del, token.del);
            assert_eq!(part.mint, token.mint);
        }
        let rejoined: Vec<Proof> = parts.into_iter().flat_map(|p| p.proofs).collect();
        assert_eq!(rejoined, token.proofs);

        // Every part encrypts.
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        for part in token.split(MAX_TOKEN_CONTENT).unwrap() {
            codec.encode_token(&part).unwrap();
        }
        assert!(codec.encode_token(&token).is_err());
    }

    #[test]
    fn test_token_split_small_and_empty() {
        let token = TokenEvent {
            mint: "https://mint.example".into(),
            proofs: wide_proofs(3),
            del: Vec::new(),
        };
        assert_eq!(token.split(MAX_TOKEN_CONTENT).unwrap(), vec![token.clone()]);

        let empty = TokenEvent {
            proofs: Vec::new(),
            ..token
        };
        assert_eq!(empty.split(10).unwrap(), vec![empty.clone()]);
    }

    #[test]
    fn test_token_split_oversized_proof_stands_alone() {
        let mut proofs = wide_proofs(2);
        proofs.insert(1, Proof::new("00ab", 1, &"x".repeat(500), "02aa"));
        let token = TokenEvent {
            mint: "https://mint.example".into(),
            proofs,
            del: Vec::new(),
        };
        let parts = token.split(300).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.proofs.len() == 1));
    }

    #[test]
    fn test_token_roundtrip() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let token = TokenEvent {
            mint: "https://mint.example".into(),
            proofs: vec![Proof::new("00ab", 8, "s1", "02aa")],
            del: vec!["old".into()],
        };
        let raw = sign(codec.encode_token(&token).unwrap(), "t1");
        assert_eq!(raw.kind, 7375);
        assert!(!raw.content.contains("s1"), "content must be encrypted");
        assert_eq!(codec.decode(&raw).unwrap(), WalletEvent::Token(token));
    }

    #[test]
    fn test_token_mint_is_normalized() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let token = TokenEvent {
            mint: "https://mint.example/".into(),
            proofs: vec![Proof::new("00ab", 1, "s1", "02aa")],
            del: vec![],
        };
        let raw = sign(codec.encode_token(&token).unwrap(), "t1");
        assert_eq!(codec.decode_token(&raw).unwrap().mint, "https://mint.example");
    }

    #[test]
    fn test_zero_amount_proof_is_malformed() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let token = TokenEvent {
            mint: "https://mint.example".into(),
            proofs: vec![Proof::new("00ab", 0, "s1", "02aa")],
            del: vec![],
        };
        let raw = sign(codec.encode_token(&token).unwrap(), "bad");
        assert!(matches!(
            codec.decode_token(&raw),
            Err(CodecError::MalformedPayload { event_id, .. }) if event_id == "bad"
        ));
    }

    #[test]
    fn test_history_markers() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let entry = HistoryEntry {
            id: None,
            direction: Direction::Out,
            amount: 21,
            created: ["new".to_string()].into(),
            destroyed: ["old1".to_string(), "old2".to_string()].into(),
            redeemed: ["zap".to_string()].into(),
            timestamp: 0,
        };
        let template = codec.encode_history(&entry).unwrap();
        assert_eq!(
            template.tags,
            vec![vec!["e".to_string(), "zap".into(), "".into(), "redeemed".into()]]
        );

        let plaintext = c.decrypt(OWNER, &template.content).unwrap();
        assert!(plaintext.contains(r#"["amount","21"]"#));
        assert!(plaintext.contains(r#"["e","old1","","destroyed"]"#));

        let raw = sign(template, "h1");
        let decoded = codec.decode_history(&raw).unwrap();
        assert_eq!(decoded.id.as_deref(), Some("h1"));
        assert_eq!(decoded.direction, Direction::Out);
        assert_eq!(decoded.amount, 21);
        assert_eq!(decoded.destroyed.len(), 2);
        assert!(decoded.redeemed.contains("zap"));
        assert_eq!(decoded.timestamp, raw.created_at);
    }

    #[test]
    fn test_history_bad_amount() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let content = c
            .encrypt(OWNER, r#"[["direction","in"],["amount","lots"]]"#)
            .unwrap();
        let raw = sign(UnsignedEvent::new(EventKind::History, vec![], content), "h");
        assert!(matches!(
            codec.decode_history(&raw),
            Err(CodecError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_wallet_object_and_plaintext_mints() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let desc = WalletDescriptor {
            privkey: Some("ab".repeat(32)),
            mints: vec!["https://a.example".into(), "https://b.example".into()],
        };
        let raw = sign(codec.encode_wallet(&desc).unwrap(), "w1");
        assert_eq!(raw.tags_named("mint").count(), 2);
        assert_eq!(codec.decode_wallet(&raw).unwrap(), desc);
    }

    #[test]
    fn test_wallet_tag_array_form() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let content = c
            .encrypt(
                OWNER,
                r#"[["privkey","cafe"],["mint","https://a.example/"],["mint","https://a.example"]]"#,
            )
            .unwrap();
        let mut raw = sign(UnsignedEvent::new(EventKind::Wallet, vec![], content), "w");
        raw.tags.push(vec!["mint".into(), "https://c.example".into()]);

        let desc = codec.decode_wallet(&raw).unwrap();
        assert_eq!(desc.privkey.as_deref(), Some("cafe"));
        assert_eq!(desc.mints, vec!["https://a.example", "https://c.example"]);
    }

    #[test]
    fn test_unsupported_encryption() {
        let c = cipher();
        let raw = sign(
            EventCodec::new(&c, OWNER)
                .encode_token(&TokenEvent {
                    mint: "https://mint.example".into(),
                    proofs: vec![],
                    del: vec![],
                })
                .unwrap(),
            "t",
        );
        let codec = EventCodec::new(&NoCipher, OWNER);
        assert!(matches!(
            codec.decode(&raw),
            Err(CodecError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn test_garbage_ciphertext_is_malformed() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let raw = sign(
            UnsignedEvent::new(EventKind::Token, vec![], "not-base64!".into()),
            "g",
        );
        assert!(matches!(
            codec.decode(&raw),
            Err(CodecError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_deletion_roundtrip() {
        let template = encode_deletion(&["t1".to_string(), "t2".to_string()]);
        assert_eq!(template.content, "");
        let raw = sign(template, "d1");
        let deletion = decode_deletion(&raw).unwrap();
        assert_eq!(deletion.ids, vec!["t1", "t2"]);
        assert!(deletion.targets_tokens());
    }

    #[test]
    fn test_deletion_of_other_kind() {
        let raw = RawEvent {
            id: "d".into(),
            pubkey: OWNER.into(),
            created_at: 1,
            kind: 5,
            tags: vec![
                vec!["e".into(), "x".into()],
                vec!["k".into(), "1".into()],
            ],
            content: String::new(),
            sig: String::new(),
        };
        assert!(!decode_deletion(&raw).unwrap().targets_tokens());
    }

    #[test]
    fn test_wrong_kind() {
        let c = cipher();
        let codec = EventCodec::new(&c, OWNER);
        let raw = sign(encode_deletion(&["t".to_string()]), "d");
        assert!(matches!(
            codec.decode_token(&raw),
            Err(CodecError::MalformedPayload { .. })
        ));
    }
}
