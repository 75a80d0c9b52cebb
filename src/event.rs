//! Nostr event model: canonical id, Schnorr signatures, tag access.
//!
//! Events are the only structure this crate hands to the transport. An
//! event without a signature is a rumor; `sign` computes the canonical id
//! and attaches a Schnorr signature over it.

use bitcoin_hashes::{sha256, Hash};
use secp256k1::schnorr::Signature;
use secp256k1::{Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::Keys;

/// Errors from event id calculation, signing, and verification
#[derive(Debug, Error)]
pub enum Error {
    /// Canonical serialization failed
    #[error("Event serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event id is not a valid 32-byte hash
    #[error("Invalid event id")]
    InvalidId,

    /// The signature or pubkey could not be parsed
    #[error("Invalid signature data")]
    InvalidSignature,

    /// A required field is absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A tagged, timestamped protocol message.
///
/// `sig` is `None` for rumors (unsigned events embedded inside a seal) and
/// is omitted from their serialized form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sig: Option<String>,
}

impl Event {
    /// Create an unsigned event with its id already computed.
    pub fn new(
        pubkey: &str,
        kind: u32,
        content: &str,
        tags: Vec<Vec<String>>,
        created_at: u64,
    ) -> Result<Self> {
        let mut event = Event {
            id: String::new(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags,
            content: content.to_string(),
            sig: None,
        };
        event.id = event.compute_id()?;
        Ok(event)
    }

    /// SHA-256 of the canonical `[0, pubkey, created_at, kind, tags, content]`
    /// serialization, hex encoded.
    pub fn compute_id(&self) -> Result<String> {
        let serialized = serde_json::to_string(&(
            0,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?;
        let digest = sha256::Hash::hash(serialized.as_bytes());
        Ok(hex::encode(digest.to_byte_array()))
    }

    /// Recompute the id and sign it with the given keys.
    ///
    /// Overwrites `pubkey` with the signing key so an event can never
    /// carry a signature from a key other than its stated author.
    pub fn sign(&mut self, keys: &Keys) -> Result<()> {
        self.pubkey = keys.public_hex();
        self.id = self.compute_id()?;

        let id_bytes = hex::decode(&self.id).map_err(|_| Error::InvalidId)?;
        let message = Message::from_slice(&id_bytes).map_err(|_| Error::InvalidId)?;

        let secp = Secp256k1::new();
        let signature = secp.sign_schnorr(&message, keys.keypair());
        self.sig = Some(hex::encode(signature.as_ref()));
        Ok(())
    }

    /// Verify the Schnorr signature over the event id.
    pub fn verify(&self) -> Result<bool> {
        let sig_hex = self.sig.as_ref().ok_or(Error::MissingField("sig"))?;
        let sig_bytes = hex::decode(sig_hex).map_err(|_| Error::InvalidSignature)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| Error::InvalidSignature)?;

        let pubkey_bytes = hex::decode(&self.pubkey).map_err(|_| Error::InvalidSignature)?;
        let pubkey =
            XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|_| Error::InvalidSignature)?;

        let id_bytes = hex::decode(&self.id).map_err(|_| Error::InvalidId)?;
        let message = Message::from_slice(&id_bytes).map_err(|_| Error::InvalidId)?;

        let secp = Secp256k1::new();
        Ok(secp.verify_schnorr(&signature, &message, &pubkey).is_ok())
    }

    /// All second positions of tags whose first position is `name`.
    pub fn tag_values_by_name(&self, name: &str) -> Vec<String> {
        self.tags
            .iter()
            .filter(|tag| !tag.is_empty() && tag[0] == name)
            .filter_map(|tag| tag.get(1).cloned())
            .collect()
    }

    /// First value of the first tag named `name`, if any.
    pub fn first_tag_value(&self, name: &str) -> Option<String> {
        self.tags
            .iter()
            .find(|tag| !tag.is_empty() && tag[0] == name)
            .and_then(|tag| tag.get(1).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Keys {
        Keys::from_secret_hex("0beebd062ec8735f4243466049d7747ef5d6594ee838de147f8aab842b15e273")
            .unwrap()
    }

    #[test]
    fn id_is_stable() {
        let event = Event::new("ab".repeat(32).as_str(), 1, "hi", vec![], 1_691_518_405).unwrap();
        assert_eq!(event.id, event.compute_id().unwrap());
        assert_eq!(event.id.len(), 64);
    }

    #[test]
    fn id_depends_on_content() {
        let a = Event::new("ab".repeat(32).as_str(), 1, "hi", vec![], 1_691_518_405).unwrap();
        let b = Event::new("ab".repeat(32).as_str(), 1, "ho", vec![], 1_691_518_405).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rumor_serialization_omits_sig() {
        let event = Event::new("ab".repeat(32).as_str(), 14, "psst", vec![], 1_691_518_405).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"sig\""));
    }

    #[test]
    fn sign_and_verify() {
        let keys = keys();
        let mut event = Event::new(&keys.public_hex(), 1, "hello", vec![], 1_691_518_405).unwrap();
        event.sign(&keys).unwrap();
        assert!(event.verify().unwrap());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let keys = keys();
        let mut event = Event::new(&keys.public_hex(), 1, "hello", vec![], 1_691_518_405).unwrap();
        event.sign(&keys).unwrap();
        // id no longer matches the signature
        event.id = event
            .compute_id()
            .unwrap()
            .chars()
            .rev()
            .collect::<String>();
        assert!(!event.verify().unwrap());
    }

    #[test]
    fn unsigned_event_cannot_verify() {
        let event = Event::new("ab".repeat(32).as_str(), 1, "x", vec![], 0).unwrap();
        assert!(matches!(event.verify(), Err(Error::MissingField("sig"))));
    }

    #[test]
    fn tag_accessors() {
        let tags = vec![
            vec!["p".to_string(), "aa".to_string(), "wss://r1".to_string()],
            vec!["p".to_string(), "bb".to_string()],
            vec!["subject".to_string(), "greetings".to_string()],
        ];
        let event = Event::new("ab".repeat(32).as_str(), 14, "", tags, 0).unwrap();
        assert_eq!(event.tag_values_by_name("p"), vec!["aa", "bb"]);
        assert_eq!(event.first_tag_value("subject").as_deref(), Some("greetings"));
        assert!(event.first_tag_value("e").is_none());
    }
}
