//! Seams to the hosted backend: the auth/session service and the profile store.
//!
//! The controller only ever talks to these traits. `memory` provides fakes that
//! deliver events in a controlled order, `supabase` talks to the hosted REST API.

pub mod memory;
pub mod supabase;

use crate::types::*;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, Mutex};

pub use memory::{LookupGate, MemoryProfileStore, MemorySessionService};
pub use supabase::{SupabaseAuth, SupabaseConfig, SupabaseProfiles};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by the hosted backend or its stand-ins
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("No active session")]
    NoSession,

    #[error("Response decoding failed: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Items delivered by a session subscription. Dropping the stream unsubscribes.
pub type SessionStream = BoxStream<'static, BackendResult<SessionChange>>;

/// Trait for the external authentication/session service
#[async_trait]
pub trait SessionService: Send + Sync {
    /// One-shot read of the current session, if any
    async fn current_session(&self) -> BackendResult<Option<Session>>;

    /// Subscribe to session changes. The current session is delivered first.
    async fn subscribe(&self) -> SessionStream;

    /// Ask the service to invalidate the current session
    async fn sign_out(&self) -> BackendResult<()>;
}

/// Trait for the external profile record store
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns `Ok(None)` only when the store confirms there is no record
    async fn find_profile(&self, user_id: &UserId) -> BackendResult<Option<Profile>>;

    async fn find_profile_by_handle(&self, handle: &str) -> BackendResult<Option<Profile>>;

    /// Insert a new record; fails with `Conflict` on a duplicate id or handle
    async fn insert_profile(&self, profile: Profile) -> BackendResult<()>;
}

struct FeedState {
    current: Option<Session>,
    subscribers: Vec<mpsc::UnboundedSender<BackendResult<SessionChange>>>,
}

/// Holds the current session and fans changes out to every subscriber
pub struct SessionFeed {
    state: Mutex<FeedState>,
}

impl SessionFeed {
    pub fn new(initial: Option<Session>) -> Self {
        Self {
            state: Mutex::new(FeedState {
                current: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.state.lock().await.current.clone()
    }

    /// Register a subscriber; it immediately receives the current session
    pub async fn subscribe(&self) -> SessionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;

        let initial = SessionChange::new(AuthEventKind::InitialSession, state.current.clone());
        // The receiver is still alive here, so this cannot fail
        let _ = tx.send(Ok(initial));
        state.subscribers.push(tx);

        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed()
    }

    /// Replace the current session and notify subscribers
    pub async fn set(&self, kind: AuthEventKind, session: Option<Session>) {
        let mut state = self.state.lock().await;
        state.current = session.clone();

        let change = SessionChange::new(kind, session);
        state
            .subscribers
            .retain(|tx| tx.send(Ok(change.clone())).is_ok());

        tracing::debug!(
            "Session change {:?} delivered to {} subscriber(s)",
            kind,
            state.subscribers.len()
        );
    }

    /// Deliver an error item (e.g. the service lost its connection)
    pub async fn fail(&self, error: BackendError) {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .retain(|tx| tx.send(Err(error.clone())).is_ok());
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }
}

impl Default for SessionFeed {
    fn default() -> Self {
        Self::new(None)
    }
}
