//! Session state shared by every in-flight request
//!
//! A [`SessionHandle`] owns the credentials, the current [`SessionState`] snapshot,
//! and the [`TokenGate`]. Readers take an `Arc<SessionState>` snapshot and compute
//! request headers from it on every call; the only writer is the
//! [`ReauthCoordinator`](crate::reauth::ReauthCoordinator), which swaps in a whole
//! new snapshot after a successful login.

use crate::config::Credentials;
use crate::types::SchoolId;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Header carrying the school the token is switched to
pub const SCHOOL_HEADER: &str = "XC-App-User-SchoolId";
/// Header carrying the authentication token
pub const TOKEN_HEADER: &str = "AuthToken";

/// Immutable snapshot of the authentication state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Current authentication token (None before the first login)
    pub token: Option<String>,
    /// School the token is currently switched to
    pub school_id: Option<SchoolId>,
    /// Bumped on every successful login; 0 means "never logged in"
    pub generation: u64,
}

impl SessionState {
    /// Whether a login has populated this snapshot
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Request headers derived from this snapshot
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(2);
        if let Some(school_id) = &self.school_id {
            headers.push((SCHOOL_HEADER, school_id.to_string()));
        }
        if let Some(token) = &self.token {
            headers.push((TOKEN_HEADER, token.clone()));
        }
        headers
    }
}

/// Binary "token usable" signal
///
/// Closed while a re-authentication is in progress. Workers wait for it to be open
/// before reading the session; once reopened, every waiter observes the refreshed
/// snapshot because the snapshot is swapped before the gate opens.
#[derive(Debug)]
pub struct TokenGate {
    tx: watch::Sender<bool>,
}

impl TokenGate {
    /// Create an open gate
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    /// Whether the token is currently usable
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is open (returns immediately if it already is)
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as the gate, so this only returns once open.
        let _ = rx.wait_for(|open| *open).await;
    }

    pub(crate) fn close(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for TokenGate {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionInner {
    credentials: RwLock<Credentials>,
    state: RwLock<Arc<SessionState>>,
    gate: TokenGate,
}

/// Cloneable handle to the shared session (all clones see the same state)
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Create an empty (not logged in) session for the given credentials
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                credentials: RwLock::new(credentials),
                state: RwLock::new(Arc::new(SessionState::default())),
                gate: TokenGate::new(),
            }),
        }
    }

    /// Credentials used by the next login
    pub fn credentials(&self) -> Credentials {
        self.inner
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the credentials; takes effect on the next login
    pub fn set_credentials(&self, credentials: Credentials) {
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    /// Current snapshot, regardless of the gate
    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&*self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Wait for the gate to open, then take a snapshot
    pub async fn ready_snapshot(&self) -> Arc<SessionState> {
        self.inner.gate.wait_open().await;
        self.snapshot()
    }

    /// The token-ready gate
    pub fn gate(&self) -> &TokenGate {
        &self.inner.gate
    }

    /// Swap in a new snapshot (re-authentication only)
    pub(crate) fn replace(&self, state: SessionState) {
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("SessionHandle")
            .field("authenticated", &state.is_authenticated())
            .field("school_id", &state.school_id)
            .field("generation", &state.generation)
            .field("gate_open", &self.inner.gate.is_open())
            .finish()
    }
}
