//! Private direct messaging and relay authentication for Nostr clients.
//!
//! Two independent components over one event model:
//!
//! - [`envelope`] builds and opens three-layer encrypted direct messages:
//!   a plaintext rumor (kind 14/15) sealed by the sender (kind 13, with a
//!   backdated timestamp) and gift-wrapped under a single-use ephemeral
//!   key (kind 1059), so relays see neither sender identity nor send
//!   time. Encryption uses an ECDH conversation key both parties can
//!   derive ([`cipher`]).
//! - [`auth`] tracks per-relay challenge/response authentication
//!   (kind 22242): answers each challenge at most once, caps deliveries,
//!   and exposes aggregate status over the connected relay set.
//!
//! Key storage, sockets, and the relay pool stay outside; they plug in
//! through the traits in [`pool`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use nostr_dm::auth::RelayAuthTracker;
//! use nostr_dm::envelope::build_private_message_envelope;
//! use nostr_dm::keys::Keys;
//! # use nostr_dm::event::Event;
//! # use nostr_dm::pool::{AuthTransport, PublishError, RelayDirectory};
//! # struct Pool;
//! # impl AuthTransport for Pool {
//! #     fn send_auth(&self, _: &str, _: &Event) -> Result<(), PublishError> { Ok(()) }
//! # }
//! # impl RelayDirectory for Pool {
//! #     fn connected_relays(&self) -> Vec<String> { vec![] }
//! # }
//!
//! # fn main() -> anyhow::Result<()> {
//! let keys = Keys::from_secret_hex(
//!     "0beebd062ec8735f4243466049d7747ef5d6594ee838de147f8aab842b15e273",
//! )?;
//! let recipient = "252f10c83610ebca1a059c0bae8255eba2f95be4d1d7bcfa89d7248a82d9f111";
//!
//! // Ready to hand to the relay pool for broadcast.
//! let wrap = build_private_message_envelope(&keys, recipient, "hey", None, &[])?;
//! assert_eq!(wrap.kind, nostr_dm::envelope::GIFT_WRAP_KIND);
//!
//! let pool = Arc::new(Pool);
//! let tracker = RelayAuthTracker::new(keys, pool.clone(), pool);
//! tracker.on_challenge("wss://relay.example.com", "challenge-string");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cipher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod keys;
pub mod pool;
pub mod utils;

pub use auth::{AuthOptions, AuthSummary, RelayAuthState, RelayAuthTracker};
pub use cipher::ConversationKey;
pub use envelope::{
    build_private_message_envelope, open_direct_message, open_envelope, send_private_message,
    FileAttachment,
};
pub use error::{Error, Result};
pub use event::Event;
pub use keys::Keys;
pub use pool::{AuthTransport, EventSink, PoolEvent, PublishError, RelayDirectory};
