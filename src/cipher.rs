//! Conversation-key agreement and authenticated payload encryption.
//!
//! Payloads follow the versioned layout used for sealed message content
//! (NIP-44 v2 scheme):
//!
//! ```text
//! base64( version(1) || nonce(32) || ciphertext || hmac(32) )
//! ```
//!
//! The conversation key comes from secp256k1 ECDH and is identical no
//! matter which side derives it. Per-message encryption and authentication
//! keys are split off with an HKDF-style HMAC-SHA256 construction salted by
//! the message nonce; the ciphertext is a ChaCha20 keystream over padded
//! plaintext, authenticated with HMAC-SHA256.

use base64::{engine::general_purpose, Engine as _};
use bitcoin_hashes::{hmac, sha256, Hash, HashEngine};
use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    ChaCha20,
};
use rand::{rngs::OsRng, RngCore};
use secp256k1::{ecdh, Parity, PublicKey, SecretKey, XOnlyPublicKey};
use thiserror::Error;

/// Version byte of the payload layout
pub const PAYLOAD_VERSION: u8 = 2;

/// Nonce length carried in every payload; also satisfies the minimum
/// 24-byte requirement for per-message nonces.
pub const NONCE_LEN: usize = 32;

const CHACHA_NONCE_LEN: usize = 12;
const VERSION_LEN: usize = 1;
const MAC_LEN: usize = 32;
const KEY_LEN: usize = 32;
const PAD_BLOCK: usize = 32;

/// Errors from payload encryption and decryption
#[derive(Debug, Error)]
pub enum Error {
    /// Payload is not valid base64
    #[error("Invalid base64 payload")]
    Base64,

    /// Payload too short to contain version, nonce and MAC
    #[error("Malformed payload")]
    Malformed,

    /// Version byte is not a supported layout
    #[error("Unsupported payload version {0}")]
    UnsupportedVersion(u8),

    /// Key material could not be used for agreement or encryption
    #[error("Invalid key material")]
    InvalidKey,

    /// Authentication tag did not match; ciphertext was tampered with or
    /// the wrong conversation key was used
    #[error("Message authentication failed")]
    MacMismatch,

    /// Padding or plaintext recovery failed after a valid MAC
    #[error("Decryption failed")]
    DecryptionFailed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Symmetric key shared by exactly two parties.
///
/// Derived from one side's secret key and the other side's public key;
/// both derivations produce the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ConversationKey([u8; KEY_LEN]);

impl ConversationKey {
    /// ECDH key agreement between `secret` and the peer's x-only key.
    ///
    /// Uses the x coordinate of the shared point, which is invariant under
    /// the even-y normalization applied when lifting x-only keys, so both
    /// parties derive identical bytes for every key pair.
    pub fn derive(secret: &SecretKey, peer: &XOnlyPublicKey) -> Self {
        let peer_point = PublicKey::from_x_only_public_key(*peer, Parity::Even);
        let shared = ecdh::shared_secret_point(&peer_point, secret);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&shared[..KEY_LEN]);
        ConversationKey(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        ConversationKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs.
        f.write_str("ConversationKey(..)")
    }
}

/// Per-message encryption/authentication key pair split from the
/// conversation key and nonce.
struct MessageKeys {
    encryption: [u8; KEY_LEN],
    authentication: [u8; KEY_LEN],
}

fn hmac_sha256(key: &[u8], data: &[&[u8]]) -> [u8; 32] {
    let mut engine = hmac::HmacEngine::<sha256::Hash>::new(key);
    for part in data {
        engine.input(part);
    }
    hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

/// HKDF-style extract-and-expand: the nonce salts the extraction so every
/// message gets distinct keys from the same conversation key.
fn message_keys(key: &ConversationKey, nonce: &[u8; NONCE_LEN]) -> MessageKeys {
    let prk = hmac_sha256(nonce, &[key.as_bytes()]);
    let t1 = hmac_sha256(&prk, &[&[1u8]]);
    let t2 = hmac_sha256(&prk, &[&t1, &[2u8]]);
    MessageKeys {
        encryption: t1,
        authentication: t2,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Pad to the next multiple of the block size with a 0x01 terminator.
fn pad(plaintext: &[u8]) -> Vec<u8> {
    let mut padded = Vec::from(plaintext);
    padded.push(1);
    let remainder = padded.len() % PAD_BLOCK;
    if remainder != 0 {
        padded.resize(padded.len() + PAD_BLOCK - remainder, 0);
    }
    padded
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    for (i, byte) in padded.iter().enumerate().rev() {
        match byte {
            0 => continue,
            1 => return Ok(padded[..i].to_vec()),
            _ => return Err(Error::DecryptionFailed),
        }
    }
    Err(Error::DecryptionFailed)
}

fn keystream(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], data: &mut [u8]) -> Result<()> {
    let chacha_nonce: [u8; CHACHA_NONCE_LEN] = nonce[..CHACHA_NONCE_LEN]
        .try_into()
        .map_err(|_| Error::InvalidKey)?;
    let mut cipher = ChaCha20::new(&(*key).into(), &chacha_nonce.into());
    cipher.apply_keystream(data);
    Ok(())
}

/// Fresh random nonce for one message.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt with a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &ConversationKey) -> Result<String> {
    encrypt_with_nonce(plaintext, key, &random_nonce())
}

/// Encrypt with a caller-supplied nonce.
///
/// The envelope builder reuses one nonce for both layers of a message;
/// nonces must never be reused across messages.
pub fn encrypt_with_nonce(
    plaintext: &str,
    key: &ConversationKey,
    nonce: &[u8; NONCE_LEN],
) -> Result<String> {
    let keys = message_keys(key, nonce);

    let mut buffer = pad(plaintext.as_bytes());
    keystream(&keys.encryption, nonce, &mut buffer)?;

    let mut payload = Vec::with_capacity(VERSION_LEN + NONCE_LEN + buffer.len() + MAC_LEN);
    payload.push(PAYLOAD_VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buffer);

    let mac = hmac_sha256(&keys.authentication, &[&payload]);
    payload.extend_from_slice(&mac);

    Ok(general_purpose::STANDARD.encode(payload))
}

/// Decrypt a payload produced by [`encrypt`] or [`encrypt_with_nonce`].
pub fn decrypt(payload: &str, key: &ConversationKey) -> Result<String> {
    let payload = general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| Error::Base64)?;
    if payload.len() < VERSION_LEN + NONCE_LEN + MAC_LEN {
        return Err(Error::Malformed);
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(Error::UnsupportedVersion(payload[0]));
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&payload[VERSION_LEN..VERSION_LEN + NONCE_LEN]);

    let keys = message_keys(key, &nonce);

    let mac_start = payload.len() - MAC_LEN;
    let mac = hmac_sha256(&keys.authentication, &[&payload[..mac_start]]);
    if !constant_time_eq(&mac, &payload[mac_start..]) {
        return Err(Error::MacMismatch);
    }

    let mut buffer = payload[VERSION_LEN + NONCE_LEN..mac_start].to_vec();
    keystream(&keys.encryption, &nonce, &mut buffer)?;
    let plaintext = unpad(&buffer)?;
    String::from_utf8(plaintext).map_err(|_| Error::DecryptionFailed)
}

/// Nonce embedded in an encoded payload, without decrypting it.
pub fn embedded_nonce(payload: &str) -> Result<[u8; NONCE_LEN]> {
    let payload = general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| Error::Base64)?;
    if payload.len() < VERSION_LEN + NONCE_LEN + MAC_LEN {
        return Err(Error::Malformed);
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&payload[VERSION_LEN..VERSION_LEN + NONCE_LEN]);
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;
    use hex_literal::hex;

    const NONCE: [u8; NONCE_LEN] =
        hex!("b635236c42db20f021bb8d1cdff5ca75dd1a0cc72ea742ad750f33010b24f73b");

    fn parties() -> (Keys, Keys) {
        let alice = Keys::from_secret_hex(
            "0beebd062ec8735f4243466049d7747ef5d6594ee838de147f8aab842b15e273",
        )
        .unwrap();
        let bob = Keys::from_secret_hex(
            "e108399bd8424357a710b606ae0c13166d853d327e47a6e5e038197346bdbf45",
        )
        .unwrap();
        (alice, bob)
    }

    #[test]
    fn conversation_key_is_symmetric() {
        let (alice, bob) = parties();
        let from_alice = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let from_bob = ConversationKey::derive(bob.secret_key(), alice.public_key());
        assert_eq!(from_alice, from_bob);
    }

    #[test]
    fn conversation_key_symmetric_for_random_pairs() {
        // Parity of the underlying points must not matter.
        for _ in 0..16 {
            let a = Keys::generate();
            let b = Keys::generate();
            assert_eq!(
                ConversationKey::derive(a.secret_key(), b.public_key()),
                ConversationKey::derive(b.secret_key(), a.public_key()),
            );
        }
    }

    #[test]
    fn round_trip() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let payload = encrypt("Are you going to the party tonight?", &key).unwrap();
        assert_eq!(
            decrypt(&payload, &key).unwrap(),
            "Are you going to the party tonight?"
        );
    }

    #[test]
    fn round_trip_empty_and_multibyte() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        for plaintext in ["", "héllo wörld", "🔑🗝️", "a"] {
            let payload = encrypt(plaintext, &key).unwrap();
            assert_eq!(decrypt(&payload, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn explicit_nonce_is_embedded() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let payload = encrypt_with_nonce("psst", &key, &NONCE).unwrap();
        assert_eq!(embedded_nonce(&payload).unwrap(), NONCE);
    }

    #[test]
    fn tampering_is_detected() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let payload = encrypt("do not touch", &key).unwrap();

        let mut raw = general_purpose::STANDARD.decode(&payload).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xff;
        let tampered = general_purpose::STANDARD.encode(raw);

        assert!(matches!(decrypt(&tampered, &key), Err(Error::MacMismatch)));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let payload = encrypt("secret", &key).unwrap();

        let eve = Keys::generate();
        let wrong = ConversationKey::derive(eve.secret_key(), bob.public_key());
        assert!(matches!(decrypt(&payload, &wrong), Err(Error::MacMismatch)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let (alice, bob) = parties();
        let key = ConversationKey::derive(alice.secret_key(), bob.public_key());
        let payload = encrypt("v?", &key).unwrap();

        let mut raw = general_purpose::STANDARD.decode(&payload).unwrap();
        raw[0] = 9;
        let reversioned = general_purpose::STANDARD.encode(raw);

        assert!(matches!(
            decrypt(&reversioned, &key),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let key = ConversationKey::from_bytes([7u8; 32]);
        let short = general_purpose::STANDARD.encode([PAYLOAD_VERSION, 0, 0, 0]);
        assert!(matches!(decrypt(&short, &key), Err(Error::Malformed)));
        assert!(matches!(decrypt("%%%", &key), Err(Error::Base64)));
    }
}
