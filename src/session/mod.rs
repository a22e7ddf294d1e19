//! Session/profile controller.
//!
//! Owns the externally sourced session and profile, derives [`AuthStatus`] from
//! them and publishes status, user and profile as one snapshot. Dependents read
//! the snapshot or subscribe to it; they never write it.

mod actions;
mod events;
mod lookup;

use crate::backend::{BackendError, ProfileStore, SessionService};
use crate::types::*;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

pub use lookup::ProfileLookup;

/// Result type for controller operations
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Sign-out failed: {0}")]
    SignOut(#[source] BackendError),

    #[error("Controller is already listening for session changes")]
    AlreadyStarted,
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);

        let jitter_ms = (exp.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return exp;
        }
        let jitter = rand::rng().random_range(0..=jitter_ms);
        (exp + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Controller configuration
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub retry: RetryPolicy,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();

        let max_attempts = std::env::var("AUTH_RETRY_ATTEMPTS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.max_attempts);
        let base_delay = std::env::var("AUTH_RETRY_BASE_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        let max_delay = std::env::var("AUTH_RETRY_MAX_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);

        Self {
            retry: RetryPolicy {
                max_attempts,
                base_delay,
                max_delay,
            },
        }
    }
}

/// Raw inputs behind the published snapshot
#[derive(Debug, Default)]
struct ControllerState {
    session: Option<Session>,
    /// Bumped whenever the signed-in user changes (including to or from nobody)
    generation: u64,
    next_ticket: u64,
    /// Ticket of the newest lookup whose result was published
    applied_ticket: u64,
    /// Whether the session service has delivered any verdict yet
    session_known: bool,
}

impl ControllerState {
    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Counts outstanding backend work; decrements on drop
struct PendingGuard(Arc<watch::Sender<usize>>);

impl PendingGuard {
    fn new(pending: &Arc<watch::Sender<usize>>) -> Self {
        pending.send_modify(|n| *n += 1);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Race-free view of "is this visitor signed in, and do they have a profile"
pub struct AuthController {
    sessions: Arc<dyn SessionService>,
    profiles: Arc<dyn ProfileStore>,
    config: ControllerConfig,
    state: RwLock<ControllerState>,
    published: watch::Sender<AuthSnapshot>,
    pending: Arc<watch::Sender<usize>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AuthController {
    pub fn new(
        sessions: Arc<dyn SessionService>,
        profiles: Arc<dyn ProfileStore>,
        config: ControllerConfig,
    ) -> Self {
        let (published, _rx) = watch::channel(AuthSnapshot::initializing());
        let (pending, _rx) = watch::channel(0);

        Self {
            sessions,
            profiles,
            config,
            state: RwLock::new(ControllerState::default()),
            published,
            pending: Arc::new(pending),
            listener: Mutex::new(None),
        }
    }

    pub fn current_status(&self) -> AuthStatus {
        self.published.borrow().status.clone()
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.published.borrow().user.clone()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.published.borrow().profile.clone()
    }

    /// Status, user and profile from the same update
    pub fn snapshot(&self) -> AuthSnapshot {
        self.published.borrow().clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.published.subscribe()
    }

    /// Wait until the status leaves `Initializing`
    pub async fn wait_until_settled(&self) -> AuthSnapshot {
        let mut rx = self.published.subscribe();
        let snapshot = match rx.wait_for(|s| s.status.is_settled()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    /// Number of lookups and session checks still outstanding
    pub fn pending_work(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no lookup or session check is outstanding
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Replace the published snapshot. Callers hold the state write lock.
    fn publish(&self, snapshot: AuthSnapshot) {
        let previous = self.published.send_replace(snapshot);
        let current = self.published.borrow();
        if previous.status != current.status {
            tracing::info!(
                "Auth status {:?} -> {:?} (user: {:?})",
                previous.status,
                current.status,
                current.user.as_ref().map(|u| &u.id)
            );
        }
    }
}

impl Drop for AuthController {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
