//! Private direct-message envelopes.
//!
//! A message travels to relays as three nested layers:
//!
//! - a rumor (kind 14 direct message or kind 15 file message): the
//!   plaintext event, never signed, never published on its own;
//! - a seal (kind 13): the serialized rumor encrypted to the conversation
//!   key, authored and signed by the real sender, with a timestamp
//!   backdated by up to two days so publish time cannot be correlated
//!   with send time;
//! - a gift wrap (kind 1059): the serialized seal encrypted with the same
//!   conversation key and nonce, authored and signed by a single-use
//!   ephemeral key so the outer event is unlinkable to the sender. Only
//!   the gift wrap reaches the transport.

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use base64::{engine::general_purpose, Engine as _};

use crate::cipher::{self, ConversationKey};
use crate::event::{self, Event};
use crate::keys::{self, Keys};
use crate::pool::{self, EventSink};
use crate::utils::unix_time;

/// Direct message rumor kind
pub const DIRECT_MESSAGE_KIND: u32 = 14;
/// File message rumor kind
pub const FILE_MESSAGE_KIND: u32 = 15;
/// Seal kind
pub const SEAL_KIND: u32 = 13;
/// Gift wrap kind
pub const GIFT_WRAP_KIND: u32 = 1059;

/// Seals are backdated by a uniform offset within this window (seconds).
pub const SEAL_BACKDATE_WINDOW: u64 = 2 * 24 * 60 * 60;

/// Errors from envelope construction and opening
#[derive(Debug, Error)]
pub enum Error {
    /// A required key was absent or unusable
    #[error("Missing key material: {0}")]
    MissingKeyMaterial(&'static str),

    /// Key material was present but malformed
    #[error(transparent)]
    Key(keys::Error),

    /// Cipher failure while building an envelope
    #[error("Encryption failure: {0}")]
    Encryption(#[source] cipher::Error),

    /// Cipher failure while opening an envelope
    #[error("Decryption failure: {0}")]
    Decryption(#[source] cipher::Error),

    /// Event id/signature handling failed
    #[error(transparent)]
    Event(#[from] event::Error),

    /// Layer serialization failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inner layer had the wrong kind
    #[error("Unexpected event kind {actual}, expected {expected}")]
    UnexpectedKind { expected: u32, actual: u32 },

    /// A rumor handed to `seal` already carried a signature
    #[error("Rumor must be unsigned")]
    SignedRumor,

    /// The seal inside a gift wrap was unsigned or its signature invalid
    #[error("Seal signature is missing or invalid")]
    ForgedSeal,

    /// The seal was authored by a different key than expected
    #[error("Seal author does not match the expected sender")]
    SenderMismatch,

    /// The pool refused or failed to broadcast the envelope
    #[error("Publish failure: {0}")]
    Publish(#[from] pool::PublishError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Metadata for an encrypted file referenced by a kind 15 message.
///
/// The file itself is uploaded elsewhere; the rumor carries its URL plus
/// the parameters a recipient needs to fetch and decrypt it.
#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub url: String,
    pub mime_type: String,
    pub encryption_algorithm: String,
    pub decryption_key: String,
    pub decryption_nonce: String,
    /// SHA-256 of the encrypted file, hex encoded
    pub sha256: String,
    pub size: Option<u64>,
    pub dimensions: Option<(u32, u32)>,
    pub blurhash: Option<String>,
    pub thumbnail_url: Option<String>,
    pub fallback_urls: Vec<String>,
}

impl FileAttachment {
    fn tags(&self) -> Vec<Vec<String>> {
        let mut tags = vec![
            vec!["file-type".to_string(), self.mime_type.clone()],
            vec![
                "encryption-algorithm".to_string(),
                self.encryption_algorithm.clone(),
            ],
            vec!["decryption-key".to_string(), self.decryption_key.clone()],
            vec!["decryption-nonce".to_string(), self.decryption_nonce.clone()],
            vec!["x".to_string(), self.sha256.clone()],
        ];
        if let Some(size) = self.size {
            tags.push(vec!["size".to_string(), size.to_string()]);
        }
        if let Some((width, height)) = self.dimensions {
            tags.push(vec!["dim".to_string(), format!("{width}x{height}")]);
        }
        if let Some(blurhash) = &self.blurhash {
            tags.push(vec!["blurhash".to_string(), blurhash.clone()]);
        }
        if let Some(thumb) = &self.thumbnail_url {
            tags.push(vec!["thumb".to_string(), thumb.clone()]);
        }
        for fallback in &self.fallback_urls {
            tags.push(vec!["fallback".to_string(), fallback.clone()]);
        }
        tags
    }
}

/// `["p", recipient, relay-hint]` recipient tag.
fn p_tag(recipient_hex: &str, relay_hint: Option<&str>) -> Vec<String> {
    vec![
        "p".to_string(),
        recipient_hex.to_string(),
        relay_hint.unwrap_or("").to_string(),
    ]
}

/// `["e", id, relay-hint, "reply"]` threading tag.
pub fn reply_tag(event_id: &str, relay_hint: Option<&str>) -> Vec<String> {
    vec![
        "e".to_string(),
        event_id.to_string(),
        relay_hint.unwrap_or("").to_string(),
        "reply".to_string(),
    ]
}

/// `["subject", title]` conversation-title tag.
pub fn subject_tag(title: &str) -> Vec<String> {
    vec!["subject".to_string(), title.to_string()]
}

fn recipient_key(recipient_hex: &str) -> Result<secp256k1::XOnlyPublicKey> {
    match keys::parse_public_key(recipient_hex) {
        Ok(public) => Ok(public),
        Err(keys::Error::Missing) => Err(Error::MissingKeyMaterial("recipient public key")),
        Err(e) => Err(Error::Key(e)),
    }
}

/// Uniformly random timestamp within the backdate window ending now.
fn backdated_timestamp() -> u64 {
    let now = unix_time();
    now - rand::thread_rng().gen_range(0..SEAL_BACKDATE_WINDOW)
}

/// Build an unsigned kind 14 rumor carrying the plaintext.
///
/// Empty content is allowed; validation is a caller concern.
pub fn direct_message_rumor(
    sender: &Keys,
    recipient_hex: &str,
    content: &str,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Event> {
    let mut tags = vec![p_tag(recipient_hex, relay_hint)];
    tags.extend_from_slice(extra_tags);
    Ok(Event::new(
        &sender.public_hex(),
        DIRECT_MESSAGE_KIND,
        content,
        tags,
        unix_time(),
    )?)
}

/// Build an unsigned kind 15 rumor referencing an encrypted file.
pub fn file_message_rumor(
    sender: &Keys,
    recipient_hex: &str,
    attachment: &FileAttachment,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Event> {
    let mut tags = vec![p_tag(recipient_hex, relay_hint)];
    tags.extend_from_slice(extra_tags);
    tags.extend(attachment.tags());
    Ok(Event::new(
        &sender.public_hex(),
        FILE_MESSAGE_KIND,
        &attachment.url,
        tags,
        unix_time(),
    )?)
}

/// Encrypt a rumor into a kind 13 seal signed by the sender.
///
/// The seal's timestamp is backdated within [`SEAL_BACKDATE_WINDOW`] so
/// observers cannot correlate it with the actual send time.
pub fn seal(
    rumor: &Event,
    sender: &Keys,
    key: &ConversationKey,
    nonce: &[u8; cipher::NONCE_LEN],
) -> Result<Event> {
    if rumor.sig.is_some() {
        return Err(Error::SignedRumor);
    }
    let rumor_json = serde_json::to_string(rumor)?;
    let content = cipher::encrypt_with_nonce(&rumor_json, key, nonce).map_err(Error::Encryption)?;
    let mut sealed = Event::new(
        &sender.public_hex(),
        SEAL_KIND,
        &content,
        vec![],
        backdated_timestamp(),
    )?;
    sealed.sign(sender)?;
    Ok(sealed)
}

/// Encrypt a seal into a kind 1059 gift wrap signed by a fresh ephemeral
/// key.
///
/// The ephemeral key exists only for the duration of this call; reusing
/// one would link otherwise unrelated wraps to each other.
pub fn gift_wrap(
    sealed: &Event,
    recipient_hex: &str,
    relay_hint: Option<&str>,
    key: &ConversationKey,
    nonce: &[u8; cipher::NONCE_LEN],
) -> Result<Event> {
    if sealed.kind != SEAL_KIND {
        return Err(Error::UnexpectedKind {
            expected: SEAL_KIND,
            actual: sealed.kind,
        });
    }
    if sealed.sig.is_none() {
        return Err(Error::ForgedSeal);
    }
    let seal_json = serde_json::to_string(sealed)?;
    let content = cipher::encrypt_with_nonce(&seal_json, key, nonce).map_err(Error::Encryption)?;

    let ephemeral = Keys::generate();
    let mut wrap = Event::new(
        &ephemeral.public_hex(),
        GIFT_WRAP_KIND,
        &content,
        vec![p_tag(recipient_hex, relay_hint)],
        unix_time(),
    )?;
    wrap.sign(&ephemeral)?;
    Ok(wrap)
}

/// Build a complete gift-wrapped direct message, ready to publish.
///
/// One conversation key and one random nonce cover both encryption
/// layers; the returned event is already signed by its ephemeral author.
pub fn build_private_message_envelope(
    sender: &Keys,
    recipient_hex: &str,
    content: &str,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Event> {
    let recipient = recipient_key(recipient_hex)?;
    let key = ConversationKey::derive(sender.secret_key(), &recipient);
    let nonce = cipher::random_nonce();

    let rumor = direct_message_rumor(sender, recipient_hex, content, relay_hint, extra_tags)?;
    let sealed = seal(&rumor, sender, &key, &nonce)?;
    let wrap = gift_wrap(&sealed, recipient_hex, relay_hint, &key, &nonce)?;
    debug!(recipient = recipient_hex, wrap_id = %wrap.id, "built private message envelope");
    Ok(wrap)
}

/// Build a complete gift-wrapped file message, ready to publish.
pub fn build_file_message_envelope(
    sender: &Keys,
    recipient_hex: &str,
    attachment: &FileAttachment,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Event> {
    let recipient = recipient_key(recipient_hex)?;
    let key = ConversationKey::derive(sender.secret_key(), &recipient);
    let nonce = cipher::random_nonce();

    let rumor = file_message_rumor(sender, recipient_hex, attachment, relay_hint, extra_tags)?;
    let sealed = seal(&rumor, sender, &key, &nonce)?;
    let wrap = gift_wrap(&sealed, recipient_hex, relay_hint, &key, &nonce)?;
    debug!(recipient = recipient_hex, wrap_id = %wrap.id, "built file message envelope");
    Ok(wrap)
}

/// Build one envelope per conversation participant: the recipient's copy
/// plus the sender's own, so the sender can read the thread back later.
pub fn build_conversation_envelopes(
    sender: &Keys,
    recipient_hex: &str,
    content: &str,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Vec<Event>> {
    let recipient = recipient_key(recipient_hex)?;
    let rumor = direct_message_rumor(sender, recipient_hex, content, relay_hint, extra_tags)?;

    let sender_hex = sender.public_hex();
    let mut participants = vec![(recipient_hex.to_string(), recipient)];
    if recipient_hex != sender_hex {
        participants.push((sender_hex, *sender.public_key()));
    }

    let mut wraps = Vec::with_capacity(participants.len());
    for (participant_hex, participant) in participants {
        let key = ConversationKey::derive(sender.secret_key(), &participant);
        let nonce = cipher::random_nonce();
        let sealed = seal(&rumor, sender, &key, &nonce)?;
        wraps.push(gift_wrap(&sealed, &participant_hex, relay_hint, &key, &nonce)?);
    }
    Ok(wraps)
}

/// Build a private message envelope and hand it straight to the pool.
pub fn send_private_message(
    sink: &dyn EventSink,
    sender: &Keys,
    recipient_hex: &str,
    content: &str,
    relay_hint: Option<&str>,
    extra_tags: &[Vec<String>],
) -> Result<Event> {
    let wrap = build_private_message_envelope(sender, recipient_hex, content, relay_hint, extra_tags)?;
    sink.publish(&wrap)?;
    Ok(wrap)
}

/// Decrypt a gift wrap, yielding the seal inside.
pub fn unwrap_gift_wrap(wrap: &Event, key: &ConversationKey) -> Result<Event> {
    if wrap.kind != GIFT_WRAP_KIND {
        return Err(Error::UnexpectedKind {
            expected: GIFT_WRAP_KIND,
            actual: wrap.kind,
        });
    }
    let seal_json = cipher::decrypt(&wrap.content, key).map_err(Error::Decryption)?;
    Ok(serde_json::from_str(&seal_json)?)
}

/// Decrypt a seal, yielding the rumor inside.
pub fn unseal(sealed: &Event, key: &ConversationKey) -> Result<Event> {
    if sealed.kind != SEAL_KIND {
        return Err(Error::UnexpectedKind {
            expected: SEAL_KIND,
            actual: sealed.kind,
        });
    }
    let rumor_json = cipher::decrypt(&sealed.content, key).map_err(Error::Decryption)?;
    Ok(serde_json::from_str(&rumor_json)?)
}

/// Open a gift wrap from a known sender and return the rumor.
///
/// Verifies that the seal was authored and signed by `sender_hex`; the
/// outer wrap's ephemeral author carries no authenticity on its own.
pub fn open_envelope(wrap: &Event, recipient: &Keys, sender_hex: &str) -> Result<Event> {
    let sender = match keys::parse_public_key(sender_hex) {
        Ok(public) => public,
        Err(keys::Error::Missing) => {
            return Err(Error::MissingKeyMaterial("sender public key"))
        }
        Err(e) => return Err(Error::Key(e)),
    };
    let key = ConversationKey::derive(recipient.secret_key(), &sender);

    let sealed = unwrap_gift_wrap(wrap, &key)?;
    if sealed.pubkey != sender_hex {
        return Err(Error::SenderMismatch);
    }
    if !sealed.verify().unwrap_or(false) {
        return Err(Error::ForgedSeal);
    }
    unseal(&sealed, &key)
}

/// Open a gift wrap and insist the rumor is a kind 14 direct message.
pub fn open_direct_message(wrap: &Event, recipient: &Keys, sender_hex: &str) -> Result<Event> {
    let rumor = open_envelope(wrap, recipient, sender_hex)?;
    if rumor.kind != DIRECT_MESSAGE_KIND {
        return Err(Error::UnexpectedKind {
            expected: DIRECT_MESSAGE_KIND,
            actual: rumor.kind,
        });
    }
    Ok(rumor)
}

/// Recipient pubkeys named in a message's `p` tags.
pub fn message_recipients(rumor: &Event) -> Vec<String> {
    rumor.tag_values_by_name("p")
}

/// Conversation title, if the message carries a `subject` tag.
pub fn message_subject(rumor: &Event) -> Option<String> {
    rumor.first_tag_value("subject")
}

/// Parent event id, if the message is a reply.
pub fn message_reply_to(rumor: &Event) -> Option<String> {
    rumor.first_tag_value("e")
}

/// Structural check on an incoming gift wrap, without decrypting it:
/// right kind, at least one recipient tag, base64 content, signature
/// present.
pub fn is_well_formed_gift_wrap(event: &Event) -> bool {
    event.kind == GIFT_WRAP_KIND
        && !event.tag_values_by_name("p").is_empty()
        && general_purpose::STANDARD.decode(&event.content).is_ok()
        && event.sig.is_some()
}

/// Whether an incoming gift wrap is addressed to the given pubkey.
pub fn is_addressed_to(event: &Event, pubkey_hex: &str) -> bool {
    event.kind == GIFT_WRAP_KIND
        && event
            .tag_values_by_name("p")
            .iter()
            .any(|p| p == pubkey_hex)
}
