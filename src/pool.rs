//! Relay-pool collaborator seams and event intake.
//!
//! The crate never owns a socket. The surrounding transport implements
//! [`AuthTransport`], [`RelayDirectory`] and [`EventSink`], and feeds
//! relay callbacks into a bounded [`PoolEvent`] channel drained by a
//! single dispatch task. One consumer per channel keeps challenge
//! handling serialized per relay without any cross-key locking.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{AuthSummary, RelayAuthTracker};
use crate::event::Event;

/// Default capacity of the pool event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Transport-level publish/send failures
#[derive(Debug, Error)]
pub enum PublishError {
    /// The relay explicitly rejected the event
    #[error("Relay rejected event: {0}")]
    Rejected(String),

    /// The event never reached the relay
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Sends signed AUTH responses to a relay, fire-and-forget.
///
/// The transport owns the socket-level AUTH handshake; the tracker only
/// hands it the signed event.
pub trait AuthTransport: Send + Sync {
    fn send_auth(&self, relay_url: &str, event: &Event) -> Result<(), PublishError>;
}

/// Supplies the set of currently connected relay URLs.
pub trait RelayDirectory: Send + Sync {
    fn connected_relays(&self) -> Vec<String>;
}

/// Broadcasts a signed event to the relay pool.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event) -> Result<(), PublishError>;
}

/// Callbacks the relay pool delivers, reified as channel messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// The relay issued an authentication challenge
    Challenge {
        relay_url: String,
        challenge: String,
    },
    /// The relay accepted our challenge response
    Authed { relay_url: String },
    /// The relay sent a human-readable notice
    Notice { relay_url: String, message: String },
    /// The relay connection dropped; its auth bookkeeping can go
    Disconnected { relay_url: String },
}

/// Bounded channel for feeding pool events to the dispatcher.
pub fn pool_channel(capacity: usize) -> (mpsc::Sender<PoolEvent>, mpsc::Receiver<PoolEvent>) {
    mpsc::channel(capacity)
}

/// Drain pool events into the tracker from a single task.
///
/// Runs until the channel closes (all senders dropped).
pub fn spawn_auth_dispatcher(
    tracker: Arc<RelayAuthTracker>,
    mut receiver: mpsc::Receiver<PoolEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                PoolEvent::Challenge {
                    relay_url,
                    challenge,
                } => tracker.on_challenge(&relay_url, &challenge),
                PoolEvent::Authed { relay_url } => tracker.on_authed(&relay_url),
                PoolEvent::Notice { relay_url, message } => {
                    tracker.on_notice(&relay_url, &message)
                }
                PoolEvent::Disconnected { relay_url } => tracker.forget_relay(&relay_url),
            }
        }
        debug!("pool event channel closed, dispatcher exiting");
    })
}

/// Periodically re-evaluate aggregate auth status.
///
/// Coarse liveness for still-pending relays: the summary is recomputed
/// every `period` and published on the returned watch channel. The task
/// stops when every receiver is dropped.
pub fn spawn_status_poller(
    tracker: Arc<RelayAuthTracker>,
    period: Duration,
) -> (JoinHandle<()>, watch::Receiver<AuthSummary>) {
    let (sender, receiver) = watch::channel(AuthSummary::default());
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if sender.send(tracker.summary()).is_err() {
                debug!("status watchers gone, poller exiting");
                break;
            }
        }
    });
    (handle, receiver)
}
