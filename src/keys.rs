//! Session key material.
//!
//! Nostr identifies parties by the 32-byte x-only form of a secp256k1
//! public key, hex encoded. `Keys` bundles a secret key with its derived
//! public key so callers never pair the wrong halves, and is the signing
//! identity handed to the envelope builder and the relay auth tracker.

use rand::rngs::OsRng;
use secp256k1::{KeyPair, Secp256k1, SecretKey, XOnlyPublicKey};
use thiserror::Error;

use crate::utils::is_hex;

/// Errors raised while parsing or deriving key material
#[derive(Debug, Error)]
pub enum Error {
    /// No key was supplied where one is required
    #[error("Key material is missing")]
    Missing,

    /// Secret key is not a valid 32-byte scalar
    #[error("Invalid secret key")]
    InvalidSecretKey,

    /// Public key is not a valid 32-byte x-only point
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// A secp256k1 key pair owned by the session.
#[derive(Clone)]
pub struct Keys {
    secret: SecretKey,
    keypair: KeyPair,
    public: XOnlyPublicKey,
}

impl Keys {
    /// Generate a fresh key pair from the OS random source.
    ///
    /// Also used for the single-use ephemeral key that authors a gift
    /// wrap; such a key must never be reused.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut OsRng);
        let keypair = KeyPair::from_secret_key(&secp, &secret);
        let (public, _parity) = keypair.x_only_public_key();
        Keys {
            secret,
            keypair,
            public,
        }
    }

    /// Build a key pair from a 64-character hex secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, Error> {
        if secret_hex.is_empty() {
            return Err(Error::Missing);
        }
        let bytes = hex::decode(secret_hex).map_err(|_| Error::InvalidSecretKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| Error::InvalidSecretKey)?;
        let secp = Secp256k1::new();
        let keypair = KeyPair::from_secret_key(&secp, &secret);
        let (public, _parity) = keypair.x_only_public_key();
        Ok(Keys {
            secret,
            keypair,
            public,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> &XOnlyPublicKey {
        &self.public
    }

    /// Hex form of the public key as it appears in event `pubkey` fields.
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material stays out of logs.
        f.debug_struct("Keys")
            .field("public", &self.public_hex())
            .finish()
    }
}

/// Parse a peer's 64-character hex public key.
pub fn parse_public_key(public_hex: &str) -> Result<XOnlyPublicKey, Error> {
    if public_hex.is_empty() {
        return Err(Error::Missing);
    }
    if !is_hex(public_hex) {
        return Err(Error::InvalidPublicKey);
    }
    let bytes = hex::decode(public_hex).map_err(|_| Error::InvalidPublicKey)?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|_| Error::InvalidPublicKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_usable_keys() {
        let keys = Keys::generate();
        assert_eq!(keys.public_hex().len(), 64);
        assert!(is_hex(&keys.public_hex()));
    }

    #[test]
    fn secret_hex_round_trip() {
        let keys =
            Keys::from_secret_hex("0beebd062ec8735f4243466049d7747ef5d6594ee838de147f8aab842b15e273")
                .unwrap();
        let reparsed = parse_public_key(&keys.public_hex()).unwrap();
        assert_eq!(&reparsed, keys.public_key());
    }

    #[test]
    fn empty_secret_is_missing() {
        assert!(matches!(Keys::from_secret_hex(""), Err(Error::Missing)));
    }

    #[test]
    fn malformed_secret_rejected() {
        assert!(matches!(
            Keys::from_secret_hex("not hex"),
            Err(Error::InvalidSecretKey)
        ));
    }

    #[test]
    fn empty_public_is_missing() {
        assert!(matches!(parse_public_key(""), Err(Error::Missing)));
    }

    #[test]
    fn debug_redacts_secret() {
        let keys = Keys::generate();
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains(&hex::encode(keys.secret_key().secret_bytes())));
    }
}
