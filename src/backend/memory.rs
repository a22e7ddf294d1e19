//! In-process stand-ins for the hosted backend.
//!
//! Used by tests and local runs. Both fakes can inject outages, and the profile
//! store can hold individual lookups until a test releases them.

use super::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

/// Auth service backed by a local [`SessionFeed`]
pub struct MemorySessionService {
    feed: SessionFeed,
    /// Number of upcoming session checks that report the service as unreachable
    outage_checks: Mutex<u32>,
    fail_sign_out: AtomicBool,
    token_seq: AtomicU64,
}

impl MemorySessionService {
    pub fn new() -> Self {
        Self {
            feed: SessionFeed::default(),
            outage_checks: Mutex::new(0),
            fail_sign_out: AtomicBool::new(false),
            token_seq: AtomicU64::new(0),
        }
    }

    /// Start with an already persisted session for `user_id`
    pub fn with_session(user_id: &str) -> Self {
        let service = Self::new();
        let session = service.mint_session(UserIdentity::new(user_id));
        Self {
            feed: SessionFeed::new(Some(session)),
            ..service
        }
    }

    fn mint_session(&self, user: UserIdentity) -> Session {
        let seq = self.token_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Session {
            access_token: format!("access-{}-{}", user.id, seq),
            refresh_token: Some(format!("refresh-{}-{}", user.id, seq)),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
            user,
        }
    }

    /// Simulate a successful sign-in
    pub async fn sign_in(&self, user_id: &str) -> Session {
        let session = self.mint_session(UserIdentity::new(user_id));
        self.feed
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        session
    }

    /// Replace the current session's tokens for the same user
    pub async fn refresh_token(&self) -> Option<Session> {
        let current = self.feed.current().await?;
        let session = self.mint_session(current.user);
        self.feed
            .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
            .await;
        Some(session)
    }

    /// Change the signed-in user's email without changing who they are
    pub async fn update_email(&self, email: &str) -> Option<Session> {
        let mut session = self.feed.current().await?;
        session.user.email = Some(email.to_string());
        self.feed
            .set(AuthEventKind::UserUpdated, Some(session.clone()))
            .await;
        Some(session)
    }

    /// Simulate server-side session loss (revoked or expired token)
    pub async fn revoke(&self) {
        self.feed.set(AuthEventKind::SignedOut, None).await;
    }

    /// Make the next `checks` session checks fail as unreachable
    pub async fn set_unreachable(&self, checks: u32) {
        *self.outage_checks.lock().await = checks;
    }

    /// Make `sign_out` fail without touching the session
    pub fn set_sign_out_failure(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Push an error item to current subscribers
    pub async fn emit_outage(&self, message: &str) {
        self.feed
            .fail(BackendError::Unavailable(message.to_string()))
            .await;
    }

    pub async fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count().await
    }

    /// Consume one outage check, returning the error if the service is "down"
    async fn take_outage(&self) -> Option<BackendError> {
        let mut remaining = self.outage_checks.lock().await;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(BackendError::Unavailable(
            "auth service unreachable".to_string(),
        ))
    }
}

impl Default for MemorySessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionService for MemorySessionService {
    async fn current_session(&self) -> BackendResult<Option<Session>> {
        if let Some(err) = self.take_outage().await {
            return Err(err);
        }
        Ok(self.feed.current().await)
    }

    async fn subscribe(&self) -> SessionStream {
        let stream = self.feed.subscribe().await;
        match self.take_outage().await {
            // Replace the initial delivery with the outage, keep later changes
            Some(err) => stream::once(async move { Err(err) })
                .chain(stream.skip(1))
                .boxed(),
            None => stream,
        }
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "sign-out request failed".to_string(),
            ));
        }
        self.feed.set(AuthEventKind::SignedOut, None).await;
        Ok(())
    }
}

/// Holds one profile lookup for a user until released
#[derive(Clone)]
pub struct LookupGate {
    notify: Arc<Notify>,
}

impl LookupGate {
    pub fn release(&self) {
        self.notify.notify_one();
    }
}

/// Profile table kept in memory
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<UserId, Profile>>,
    failures: Mutex<HashMap<UserId, u32>>,
    gates: Mutex<HashMap<UserId, LookupGate>>,
    lookups: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record directly, bypassing uniqueness checks
    pub async fn put(&self, profile: Profile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }

    /// Make the next `times` lookups for `user_id` fail
    pub async fn fail_lookups(&self, user_id: &str, times: u32) {
        self.failures
            .lock()
            .await
            .insert(user_id.to_string(), times);
    }

    /// Hold the next lookup for `user_id` until the returned gate is released
    pub async fn hold(&self, user_id: &str) -> LookupGate {
        let gate = LookupGate {
            notify: Arc::new(Notify::new()),
        };
        self.gates
            .lock()
            .await
            .insert(user_id.to_string(), gate.clone());
        gate
    }

    /// Total number of `find_profile` calls so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn take_failure(&self, user_id: &UserId) -> bool {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(user_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_profile(&self, user_id: &UserId) -> BackendResult<Option<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().await.remove(user_id);
        if let Some(gate) = gate {
            gate.notify.notified().await;
        }

        if self.take_failure(user_id).await {
            return Err(BackendError::Unavailable(format!(
                "profile lookup for {} failed",
                user_id
            )));
        }

        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn find_profile_by_handle(&self, handle: &str) -> BackendResult<Option<Profile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .find(|p| p.handle == handle)
            .cloned())
    }

    async fn insert_profile(&self, profile: Profile) -> BackendResult<()> {
        let mut profiles = self.profiles.write().await;

        if profiles.contains_key(&profile.id) {
            return Err(BackendError::Conflict(format!(
                "profile for {} already exists",
                profile.id
            )));
        }
        if profiles.values().any(|p| p.handle == profile.handle) {
            return Err(BackendError::Conflict(format!(
                "handle {} is taken",
                profile.handle
            )));
        }

        profiles.insert(profile.id.clone(), profile);
        Ok(())
    }
}
