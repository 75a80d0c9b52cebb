//! Relay authentication tracking (NIP-42 style challenge/response).
//!
//! Relays gate access behind a challenge: the client proves key ownership
//! by signing a kind 22242 event over the challenge string. The tracker
//! owns one state machine per relay URL
//! (`pending -> authenticated | failed`), answers challenges at most once
//! per (relay, challenge) pair, caps deliveries per pair, and absorbs all
//! signing/transport errors into `failed` transitions, so one relay's
//! trouble never aborts processing for the others.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::keys::Keys;
use crate::pool::{AuthTransport, RelayDirectory};
use crate::utils::unix_time;

/// Challenge-response event kind
pub const AUTH_KIND: u32 = 22242;

/// Default cap on deliveries per (relay, challenge) pair
pub const DEFAULT_MAX_CHALLENGE_ATTEMPTS: u32 = 3;

/// Authentication state of a single relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAuthState {
    /// Connected, challenge outstanding or not yet issued
    Pending,
    /// The relay accepted our challenge response
    Authenticated,
    /// Auth-related notice, attempt cap, or internal error
    Failed,
}

/// Per-(relay, challenge) bookkeeping.
///
/// Deleted when the relay resolves to authenticated or failed, so the map
/// cannot grow without bound.
#[derive(Debug, Clone, Default)]
struct ChallengeRecord {
    attempts: u32,
    responded: bool,
}

#[derive(Debug, Clone)]
struct RelayRecord {
    state: RelayAuthState,
    last_error: Option<String>,
}

impl Default for RelayRecord {
    fn default() -> Self {
        RelayRecord {
            state: RelayAuthState::Pending,
            last_error: None,
        }
    }
}

/// Tracker tunables.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Value of the `origin` tag on challenge responses
    pub origin: String,
    /// Deliveries allowed per (relay, challenge) before the relay fails
    pub max_challenge_attempts: u32,
}

impl Default for AuthOptions {
    fn default() -> Self {
        AuthOptions {
            origin: String::new(),
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
        }
    }
}

/// Aggregate authentication status across the connected relay set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSummary {
    pub authenticated_relays: Vec<String>,
    pub failed_relays: Vec<String>,
    /// At least one relay accepted our response
    pub is_authenticated: bool,
}

enum ChallengeAction {
    Respond,
    Ignore,
    Exhausted,
}

/// Per-session relay authentication state machine.
///
/// All state is owned by the instance; independent sessions (or tests)
/// never contaminate each other. Handlers are callable from any thread;
/// the check-and-mark on a challenge record happens under its map entry
/// guard, which is released before signing, sending, or purging.
pub struct RelayAuthTracker {
    keys: Keys,
    options: AuthOptions,
    transport: Arc<dyn AuthTransport>,
    directory: Arc<dyn RelayDirectory>,
    relays: DashMap<String, RelayRecord>,
    challenges: DashMap<(String, String), ChallengeRecord>,
    session_authed: watch::Sender<bool>,
}

impl RelayAuthTracker {
    pub fn new(
        keys: Keys,
        transport: Arc<dyn AuthTransport>,
        directory: Arc<dyn RelayDirectory>,
    ) -> Self {
        Self::with_options(keys, transport, directory, AuthOptions::default())
    }

    pub fn with_options(
        keys: Keys,
        transport: Arc<dyn AuthTransport>,
        directory: Arc<dyn RelayDirectory>,
        options: AuthOptions,
    ) -> Self {
        let (session_authed, _) = watch::channel(false);
        RelayAuthTracker {
            keys,
            options,
            transport,
            directory,
            relays: DashMap::new(),
            challenges: DashMap::new(),
            session_authed,
        }
    }

    /// Observe the aggregate "session is authenticated" flag.
    ///
    /// Becomes `true` when any relay authenticates, `false` on [`reset`].
    ///
    /// [`reset`]: RelayAuthTracker::reset
    pub fn subscribe_session_authed(&self) -> watch::Receiver<bool> {
        self.session_authed.subscribe()
    }

    /// Handle a challenge delivery from a relay.
    ///
    /// The first delivery of a (relay, challenge) pair produces a signed
    /// kind 22242 response handed to the transport; duplicates are
    /// ignored; reaching the delivery cap fails the relay. Never returns
    /// an error: failures become state transitions.
    pub fn on_challenge(&self, relay_url: &str, challenge: &str) {
        if self.state_of(relay_url) == Some(RelayAuthState::Failed) {
            debug!(relay = relay_url, "challenge for failed relay ignored");
            return;
        }
        self.relays.entry(relay_url.to_string()).or_default();

        let action = {
            let key = (relay_url.to_string(), challenge.to_string());
            let mut record = self.challenges.entry(key).or_default();
            record.attempts += 1;
            if record.attempts >= self.options.max_challenge_attempts {
                ChallengeAction::Exhausted
            } else if record.responded {
                ChallengeAction::Ignore
            } else {
                record.responded = true;
                ChallengeAction::Respond
            }
        };

        match action {
            ChallengeAction::Ignore => {
                debug!(relay = relay_url, "duplicate challenge ignored");
            }
            ChallengeAction::Exhausted => {
                self.mark_failed(relay_url, "challenge attempt limit reached");
            }
            ChallengeAction::Respond => self.respond(relay_url, challenge),
        }
    }

    /// The relay accepted our response.
    ///
    /// Purges the relay's challenge records: success invalidates any
    /// stale in-flight bookkeeping, so a later identical challenge is
    /// treated as brand new.
    pub fn on_authed(&self, relay_url: &str) {
        {
            let mut record = self.relays.entry(relay_url.to_string()).or_default();
            if record.state == RelayAuthState::Failed {
                debug!(relay = relay_url, "authed notification for failed relay ignored");
                return;
            }
            record.state = RelayAuthState::Authenticated;
            record.last_error = None;
        }
        self.purge_challenges(relay_url);
        self.session_authed.send_replace(true);
        info!(relay = relay_url, "relay authenticated");
    }

    /// Handle a relay notice; anything mentioning "auth" fails the relay.
    pub fn on_notice(&self, relay_url: &str, message: &str) {
        if message.to_lowercase().contains("auth") {
            self.mark_failed(relay_url, &format!("relay notice: {message}"));
        }
    }

    /// Drop all bookkeeping for a disconnected relay.
    pub fn forget_relay(&self, relay_url: &str) {
        self.relays.remove(relay_url);
        self.purge_challenges(relay_url);
        debug!(relay = relay_url, "relay forgotten");
    }

    /// Authenticated-or-not per currently connected relay.
    pub fn auth_status(&self) -> HashMap<String, bool> {
        self.directory
            .connected_relays()
            .into_iter()
            .map(|url| {
                let authed = self.state_of(&url) == Some(RelayAuthState::Authenticated);
                (url, authed)
            })
            .collect()
    }

    /// Whether every connected relay is authenticated.
    ///
    /// Vacuously true with no connected relays; callers caring about the
    /// empty set must check it themselves.
    pub fn all_relays_authenticated(&self) -> bool {
        self.auth_status().values().all(|authed| *authed)
    }

    /// Aggregate summary over the connected relay set.
    pub fn summary(&self) -> AuthSummary {
        let status = self.auth_status();
        let mut authenticated_relays = Vec::new();
        let mut failed_relays = Vec::new();
        for (url, authed) in status {
            if authed {
                authenticated_relays.push(url);
            } else {
                failed_relays.push(url);
            }
        }
        authenticated_relays.sort();
        failed_relays.sort();
        let is_authenticated = !authenticated_relays.is_empty();
        AuthSummary {
            authenticated_relays,
            failed_relays,
            is_authenticated,
        }
    }

    /// Current state of a relay, if any bookkeeping exists for it.
    pub fn relay_state(&self, relay_url: &str) -> Option<RelayAuthState> {
        self.state_of(relay_url)
    }

    /// Failure reason recorded for a relay, if it failed.
    pub fn last_error(&self, relay_url: &str) -> Option<String> {
        self.relays
            .get(relay_url)
            .and_then(|record| record.last_error.clone())
    }

    /// Whether bookkeeping exists for a (relay, challenge) pair.
    pub fn has_challenge_record(&self, relay_url: &str, challenge: &str) -> bool {
        self.challenges
            .contains_key(&(relay_url.to_string(), challenge.to_string()))
    }

    /// Wipe all per-relay state, e.g. after key rotation.
    pub fn reset(&self) {
        self.relays.clear();
        self.challenges.clear();
        self.session_authed.send_replace(false);
        info!("relay auth state reset");
    }

    fn state_of(&self, relay_url: &str) -> Option<RelayAuthState> {
        self.relays.get(relay_url).map(|record| record.state)
    }

    fn respond(&self, relay_url: &str, challenge: &str) {
        let tags = vec![
            vec!["relay".to_string(), relay_url.to_string()],
            vec!["challenge".to_string(), challenge.to_string()],
            vec!["origin".to_string(), self.options.origin.clone()],
        ];
        let signed = Event::new(
            &self.keys.public_hex(),
            AUTH_KIND,
            challenge,
            tags,
            unix_time(),
        )
        .and_then(|mut event| {
            event.sign(&self.keys)?;
            Ok(event)
        });

        let event = match signed {
            Ok(event) => event,
            Err(e) => {
                self.mark_failed(relay_url, &format!("signing failed: {e}"));
                return;
            }
        };
        if let Err(e) = self.transport.send_auth(relay_url, &event) {
            self.mark_failed(relay_url, &format!("transport failure: {e}"));
            return;
        }
        debug!(relay = relay_url, "challenge response sent");
    }

    fn mark_failed(&self, relay_url: &str, reason: &str) {
        let demoted = {
            let mut record = self.relays.entry(relay_url.to_string()).or_default();
            if record.state == RelayAuthState::Authenticated {
                false
            } else {
                record.state = RelayAuthState::Failed;
                record.last_error = Some(reason.to_string());
                true
            }
        };
        self.purge_challenges(relay_url);
        if demoted {
            warn!(relay = relay_url, reason, "relay authentication failed");
        } else {
            debug!(relay = relay_url, reason, "failure for authenticated relay ignored");
        }
    }

    fn purge_challenges(&self, relay_url: &str) {
        self.challenges.retain(|key, _| key.0 != relay_url);
    }
}
