//! NIP-44 v2 payload encryption.
//!
//! Implements the symmetric half of NIP-44: given a 32-byte conversation
//! key, derive per-message keys with HKDF-SHA256, pad, encrypt with
//! ChaCha20, and authenticate with HMAC-SHA256. The conversation key comes
//! from secp256k1 ECDH, which belongs to whoever holds the private key;
//! [`conversation_key`] finishes the derivation from the shared x-coordinate.
//!
//! Payload layout (base64): `version(1) || nonce(32) || ciphertext || mac(32)`.

use crate::error::CipherError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";

const MIN_PLAINTEXT: usize = 1;
/// Largest plaintext a NIP-44 v2 payload can carry.
pub const MAX_PLAINTEXT: usize = 65535;

/// Base64 payload length bounds.
const MIN_PAYLOAD: usize = 132;
const MAX_PAYLOAD: usize = 87472;

/// Decoded payload length bounds.
const MIN_DECODED: usize = 99;
const MAX_DECODED: usize = 65603;

/// Encryption capability scoped to the wallet owner.
///
/// `pubkey` is the peer; wallet events are encrypted to the owner's own key.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, pubkey: &str, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, pubkey: &str, payload: &str) -> Result<String, CipherError>;
}

/// A signer without NIP-44 support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCipher;

impl Cipher for NoCipher {
    fn encrypt(&self, pubkey: &str, _plaintext: &str) -> Result<String, CipherError> {
        Err(CipherError::Unsupported(pubkey.to_string()))
    }

    fn decrypt(&self, pubkey: &str, _payload: &str) -> Result<String, CipherError> {
        Err(CipherError::Unsupported(pubkey.to_string()))
    }
}

/// [`Cipher`] over precomputed conversation keys, one per peer pubkey.
#[derive(Default, Clone)]
pub struct ConversationCipher {
    keys: HashMap<String, [u8; 32]>,
}

impl ConversationCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the conversation key shared with `pubkey`.
    pub fn with_peer(mut self, pubkey: &str, key: [u8; 32]) -> Self {
        self.keys.insert(pubkey.to_string(), key);
        self
    }

    fn key_for(&self, pubkey: &str) -> Result<&[u8; 32], CipherError> {
        self.keys
            .get(pubkey)
            .ok_or_else(|| CipherError::Unsupported(pubkey.to_string()))
    }
}

impl Cipher for ConversationCipher {
    fn encrypt(&self, pubkey: &str, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        encrypt(self.key_for(pubkey)?, plaintext, &nonce)
    }

    fn decrypt(&self, pubkey: &str, payload: &str) -> Result<String, CipherError> {
        decrypt(self.key_for(pubkey)?, payload)
    }
}

/// HKDF-extract the conversation key from an ECDH shared x-coordinate.
pub fn conversation_key(shared_x: &[u8; 32]) -> [u8; 32] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), shared_x);
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

fn message_keys(conversation_key: &[u8; 32], nonce: &[u8; 32]) -> Result<MessageKeys, CipherError> {
    let hk = Hkdf::<Sha256>::from_prk(conversation_key)
        .map_err(|e| CipherError::InvalidPayload(e.to_string()))?;
    let mut okm = [0u8; 76];
    hk.expand(nonce, &mut okm)
        .map_err(|e| CipherError::InvalidPayload(e.to_string()))?;

    let mut keys = MessageKeys {
        chacha_key: [0u8; 32],
        chacha_nonce: [0u8; 12],
        hmac_key: [0u8; 32],
    };
    keys.chacha_key.copy_from_slice(&okm[0..32]);
    keys.chacha_nonce.copy_from_slice(&okm[32..44]);
    keys.hmac_key.copy_from_slice(&okm[44..76]);
    Ok(keys)
}

/// Padded length for a plaintext of `len` bytes (excluding the length prefix).
pub fn calc_padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT..=MAX_PLAINTEXT).contains(&len) {
        return Err(CipherError::InvalidLength(len));
    }
    let mut padded = Vec::with_capacity(2 + calc_padded_len(len));
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + calc_padded_len(len), 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, CipherError> {
    if padded.len() < 2 {
        return Err(CipherError::InvalidPayload("padding too short".into()));
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT || padded.len() != 2 + calc_padded_len(len) {
        return Err(CipherError::InvalidPayload("invalid padding".into()));
    }
    Ok(padded[2..2 + len].to_vec())
}

fn hmac_aad(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CipherError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CipherError::InvalidPayload(e.to_string()))?;
    mac.update(nonce);
    mac.update(ciphertext);
    Ok(mac)
}

/// Encrypt `plaintext` under `conversation_key` with an explicit nonce.
pub fn encrypt(
    conversation_key: &[u8; 32],
    plaintext: &str,
    nonce: &[u8; 32],
) -> Result<String, CipherError> {
    let keys = message_keys(conversation_key, nonce)?;
    let mut buf = pad(plaintext.as_bytes())?;

    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut buf);

    let mac = hmac_aad(&keys.hmac_key, nonce, &buf)?.finalize().into_bytes();

    let mut out = Vec::with_capacity(1 + 32 + buf.len() + 32);
    out.push(VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(&buf);
    out.extend_from_slice(&mac);
    Ok(BASE64.encode(out))
}

/// Decrypt a NIP-44 v2 payload. The MAC is checked in constant time.
pub fn decrypt(conversation_key: &[u8; 32], payload: &str) -> Result<String, CipherError> {
    if payload.starts_with('#') {
        return Err(CipherError::UnknownVersion(b'#'));
    }
    if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
        return Err(CipherError::InvalidPayload(format!(
            "payload length {}",
            payload.len()
        )));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| CipherError::InvalidPayload(e.to_string()))?;
    if !(MIN_DECODED..=MAX_DECODED).contains(&data.len()) {
        return Err(CipherError::InvalidPayload(format!(
            "decoded length {}",
            data.len()
        )));
    }
    if data[0] != VERSION {
        return Err(CipherError::UnknownVersion(data[0]));
    }

    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&data[1..33]);
    let (ciphertext, tag) = data[33..].split_at(data.len() - 33 - 32);

    let keys = message_keys(conversation_key, &nonce)?;
    hmac_aad(&keys.hmac_key, &nonce, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| CipherError::InvalidMac)?;

    let mut buf = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut buf);

    let plaintext = unpad(&buf)?;
    String::from_utf8(plaintext).map_err(|e| CipherError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_str: &str) -> [u8; 32] {
        hex::decode(hex_str).unwrap().try_into().unwrap()
    }

    const CONV_KEY: &str = "c41c775356fd92eadc63ff5a0dc1da211b268cbea22316767095b2871ea1412d";

    fn nonce_one() -> [u8; 32] {
        let mut n = [0u8; 32];
        n[31] = 1;
        n
    }

    #[test]
    fn test_known_vector() {
        let payload = encrypt(&key(CONV_KEY), "a", &nonce_one()).unwrap();
        assert_eq!(
            payload,
            "AgAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABee0G5VSK0/9YypIObAtDKfYEAjD35uVkHyB0F4DwrcNaCXlCWZKaArsGrY6M9wnuTMxWfp1RTN9Xga8no+kF5Vsb"
        );
        assert_eq!(decrypt(&key(CONV_KEY), &payload).unwrap(), "a");
    }

    #[test]
    fn test_padded_lengths() {
        let table = [
            (1, 32),
            (32, 32),
            (33, 64),
            (64, 64),
            (65, 96),
            (100, 128),
            (256, 256),
            (257, 320),
            (1000, 1024),
            (65535, 65536),
        ];
        for (len, padded) in table {
            assert_eq!(calc_padded_len(len), padded, "len {}", len);
        }
    }

    #[test]
    fn test_roundtrip_unicode() {
        let k = key(CONV_KEY);
        let msg = "{\"mint\":\"https://mint.example\",\"proofs\":[]} ⚡";
        let payload = encrypt(&k, msg, &[7u8; 32]).unwrap();
        assert_eq!(decrypt(&k, &payload).unwrap(), msg);
    }

    #[test]
    fn test_tampered_ciphertext_fails_mac() {
        let k = key(CONV_KEY);
        let payload = encrypt(&k, "hello", &nonce_one()).unwrap();
        let mut raw = BASE64.decode(&payload).unwrap();
        raw[40] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert_eq!(decrypt(&k, &tampered), Err(CipherError::InvalidMac));
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = encrypt(&key(CONV_KEY), "hello", &nonce_one()).unwrap();
        assert_eq!(decrypt(&[9u8; 32], &payload), Err(CipherError::InvalidMac));
    }

    #[test]
    fn test_length_limits() {
        let k = key(CONV_KEY);
        assert_eq!(encrypt(&k, "", &nonce_one()), Err(CipherError::InvalidLength(0)));
        let big = "x".repeat(MAX_PLAINTEXT + 1);
        assert_eq!(
            encrypt(&k, &big, &nonce_one()),
            Err(CipherError::InvalidLength(MAX_PLAINTEXT + 1))
        );
        assert!(matches!(decrypt(&k, "AgAA"), Err(CipherError::InvalidPayload(_))));
    }

    #[test]
    fn test_unknown_version() {
        let k = key(CONV_KEY);
        assert_eq!(decrypt(&k, "#abc"), Err(CipherError::UnknownVersion(b'#')));

        let payload = encrypt(&k, "hello", &nonce_one()).unwrap();
        let mut raw = BASE64.decode(&payload).unwrap();
        raw[0] = 1;
        assert_eq!(decrypt(&k, &BASE64.encode(raw)), Err(CipherError::UnknownVersion(1)));
    }

    #[test]
    fn test_conversation_cipher_peers() {
        let cipher = ConversationCipher::new().with_peer("alice", key(CONV_KEY));
        let payload = cipher.encrypt("alice", "secret").unwrap();
        assert_eq!(cipher.decrypt("alice", &payload).unwrap(), "secret");
        assert_eq!(
            cipher.decrypt("bob", &payload),
            Err(CipherError::Unsupported("bob".into()))
        );
    }

    #[test]
    fn test_no_cipher_is_unsupported() {
        assert!(matches!(NoCipher.encrypt("x", "y"), Err(CipherError::Unsupported(_))));
    }

    #[test]
    fn test_conversation_key_is_hmac_extract() {
        // HKDF-extract(salt, ikm) == HMAC-SHA256(salt, ikm)
        let shared = [0u8; 32];
        let mut mac = HmacSha256::new_from_slice(SALT).unwrap();
        mac.update(&shared);
        let expected = mac.finalize().into_bytes();
        assert_eq!(conversation_key(&shared).as_slice(), expected.as_slice());
    }
}
