//! Coordinated re-authentication
//!
//! Many workers can hit a rate limit in the same window. [`ReauthCoordinator`]
//! collapses those into a single login + school switch:
//!
//! - The first caller flips the in-progress flag and closes the [`TokenGate`]
//!   inside one synchronous critical section, then performs the login.
//! - Callers arriving while the flag is set wait for the gate and return
//!   [`ReauthOutcome::Joined`] without logging in themselves.
//! - Callers whose observed session generation is already stale return
//!   [`ReauthOutcome::Superseded`]: someone refreshed after they read the token.
//!
//! The flag is cleared and the gate reopened on every exit path, including a
//! failed login and a cancelled leader.
//!
//! [`TokenGate`]: crate::session::TokenGate

use crate::api::ExamApi;
use crate::error::{AuthError, Error, Result};
use crate::session::{SessionHandle, SessionState};
use crate::types::Event;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// How a call to [`ReauthCoordinator::reauthenticate`] was resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReauthOutcome {
    /// This caller performed the login; the session now has `generation`
    Refreshed {
        /// New session generation
        generation: u64,
    },
    /// Another caller was already refreshing; this caller waited for it
    Joined,
    /// The session was refreshed after the caller observed it; nothing to do
    Superseded {
        /// Current session generation
        generation: u64,
    },
}

enum Entry<'a> {
    Leader(RefreshGuard<'a>),
    Follower,
    Superseded(u64),
}

/// Serializes login calls across all in-flight workers
pub struct ReauthCoordinator {
    api: Arc<dyn ExamApi>,
    session: SessionHandle,
    refreshing: Mutex<bool>,
    cooldown: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl ReauthCoordinator {
    /// Create a coordinator for `session`
    ///
    /// `cooldown` is slept after a successful re-login, before waiters are released.
    pub fn new(
        api: Arc<dyn ExamApi>,
        session: SessionHandle,
        cooldown: Duration,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            api,
            session,
            refreshing: Mutex::new(false),
            cooldown,
            event_tx,
        }
    }

    /// The session this coordinator writes to
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Sender side of the event channel
    pub fn events(&self) -> &broadcast::Sender<Event> {
        &self.event_tx
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initial login, through the same single-writer path (no cooldown)
    ///
    /// Returns the session generation in place afterwards.
    ///
    /// # Errors
    ///
    /// Returns the login or school-switch error when this caller logged in, and
    /// [`AuthError::ConcurrentLoginFailed`] when it waited for a concurrent login
    /// that failed.
    pub async fn authenticate(&self) -> Result<u64> {
        let observed = self.session.generation();
        match self.enter(observed) {
            Entry::Leader(guard) => {
                let generation = self.login_and_switch().await?;
                drop(guard);
                Ok(generation)
            }
            Entry::Follower => {
                self.session.gate().wait_open().await;
                let generation = self.session.generation();
                if generation == observed {
                    return Err(AuthError::ConcurrentLoginFailed.into());
                }
                Ok(generation)
            }
            Entry::Superseded(generation) => Ok(generation),
        }
    }

    /// Re-authenticate after a rate limit seen with session `observed_generation`
    ///
    /// # Errors
    ///
    /// Returns the login or school-switch error when this caller led the refresh
    /// and it failed. Waiters of a failed refresh return `Joined`; their next
    /// attempt observes the unchanged session.
    pub async fn reauthenticate(&self, observed_generation: u64) -> Result<ReauthOutcome> {
        let guard = match self.enter(observed_generation) {
            Entry::Leader(guard) => guard,
            Entry::Follower => {
                tracing::debug!("Re-authentication in progress, waiting for the token gate");
                self.session.gate().wait_open().await;
                return Ok(ReauthOutcome::Joined);
            }
            Entry::Superseded(generation) => {
                tracing::debug!(
                    observed_generation,
                    generation,
                    "Session already refreshed, skipping re-authentication"
                );
                return Ok(ReauthOutcome::Superseded { generation });
            }
        };

        tracing::warn!(observed_generation, "Rate limited, re-authenticating");
        let generation = self.login_and_switch().await?;

        if !self.cooldown.is_zero() {
            tracing::info!(cooldown_ms = self.cooldown.as_millis(), "Cooling down after re-authentication");
            tokio::time::sleep(self.cooldown).await;
        }

        drop(guard);
        Ok(ReauthOutcome::Refreshed { generation })
    }

    /// Check-and-set of the in-progress flag with no suspension point in between
    fn enter(&self, observed_generation: u64) -> Entry<'_> {
        let mut refreshing = self.refreshing.lock().unwrap_or_else(PoisonError::into_inner);
        if *refreshing {
            return Entry::Follower;
        }

        let current = self.session.generation();
        if current != observed_generation {
            return Entry::Superseded(current);
        }

        *refreshing = true;
        self.session.gate().close();
        Entry::Leader(RefreshGuard { coordinator: self })
    }

    async fn login_and_switch(&self) -> Result<u64> {
        let credentials = self.session.credentials();
        let previous = self.session.snapshot();

        let result = async {
            let grant = self.api.login(&credentials).await?;
            let mut state = SessionState {
                token: Some(grant.token),
                school_id: Some(grant.school_id),
                generation: previous.generation + 1,
            };

            if state.school_id.as_ref() != Some(&credentials.school_id) {
                self.api.switch_school(&state, &credentials.school_id).await?;
                state.school_id = Some(credentials.school_id.clone());
            }
            Ok::<_, Error>(state)
        }
        .await;

        match result {
            Ok(state) => {
                let generation = state.generation;
                self.session.replace(state);
                tracing::info!(generation, school_id = %credentials.school_id, "Session established");
                self.event_tx.send(Event::Authenticated { generation }).ok();
                Ok(generation)
            }
            Err(e) => {
                tracing::error!(error = %e, "Authentication failed");
                self.event_tx
                    .send(Event::AuthenticationFailed {
                        error: e.to_string(),
                    })
                    .ok();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ReauthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReauthCoordinator")
            .field("session", &self.session)
            .field("refreshing", &self.is_refreshing())
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// Clears the in-progress flag and reopens the gate when dropped
struct RefreshGuard<'a> {
    coordinator: &'a ReauthCoordinator,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        // Both under the lock so a new leader cannot close the gate in between
        let mut refreshing = self
            .coordinator
            .refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *refreshing = false;
        self.coordinator.session.gate().open();
    }
}
