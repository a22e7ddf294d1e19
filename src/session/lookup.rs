use super::*;
use crate::backend::BackendResult;

/// Outcome of reading a user's profile record.
///
/// `Failed` is kept apart from `Missing`: a failed read must never send a user
/// with an existing profile back to setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    Found(Profile),
    Missing,
    Failed(BackendError),
}

impl From<BackendResult<Option<Profile>>> for ProfileLookup {
    fn from(result: BackendResult<Option<Profile>>) -> Self {
        match result {
            Ok(Some(profile)) => ProfileLookup::Found(profile),
            Ok(None) => ProfileLookup::Missing,
            Err(e) => ProfileLookup::Failed(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LookupOrigin {
    /// Triggered by a session change; failure becomes a visible error
    SessionChange,
    /// Triggered by `refresh_profile`; failure keeps the settled status
    Refresh,
}

#[derive(Debug, Clone)]
pub(super) struct LookupRequest {
    pub user: UserIdentity,
    pub generation: u64,
    pub ticket: u64,
    pub origin: LookupOrigin,
}

impl AuthController {
    /// Run a lookup on its own task so it finishes even if the caller goes away
    pub(super) fn spawn_lookup(self: &Arc<Self>, request: LookupRequest) -> JoinHandle<()> {
        let guard = PendingGuard::new(&self.pending);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.run_lookup(request).await;
            drop(guard);
        })
    }

    /// Look up and apply in one go; returns whether the result was published
    pub(super) async fn run_lookup(&self, request: LookupRequest) -> bool {
        let outcome = self.lookup_with_retry(&request).await;
        self.apply_lookup(request, outcome).await
    }

    async fn is_current(&self, request: &LookupRequest) -> bool {
        let state = self.state.read().await;
        state.generation == request.generation
            && state
                .session
                .as_ref()
                .is_some_and(|s| s.user_id() == &request.user.id)
    }

    async fn lookup_with_retry(&self, request: &LookupRequest) -> ProfileLookup {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            let outcome = ProfileLookup::from(self.profiles.find_profile(&request.user.id).await);
            match outcome {
                ProfileLookup::Failed(e) if attempt < policy.max_attempts => {
                    if !self.is_current(request).await {
                        // Nobody will look at this result any more
                        return ProfileLookup::Failed(e);
                    }
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        "Profile lookup for {} failed (attempt {}/{}): {}, retrying in {:?}",
                        request.user.id,
                        attempt,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn apply_lookup(&self, request: LookupRequest, outcome: ProfileLookup) -> bool {
        let mut state = self.state.write().await;

        let same_session = state.generation == request.generation
            && state
                .session
                .as_ref()
                .is_some_and(|s| s.user_id() == &request.user.id);
        if !same_session || request.ticket <= state.applied_ticket {
            tracing::debug!(
                "Discarding stale profile lookup #{} for {}",
                request.ticket,
                request.user.id
            );
            return false;
        }

        // Use the latest identity for this user (token refreshes may update it)
        let user = state
            .session
            .as_ref()
            .map(|s| s.user.clone())
            .unwrap_or(request.user);

        let snapshot = match outcome {
            ProfileLookup::Found(profile) => AuthSnapshot::ready(user, profile),
            ProfileLookup::Missing => AuthSnapshot::needs_profile(user),
            ProfileLookup::Failed(e) => match request.origin {
                LookupOrigin::SessionChange => {
                    tracing::error!("Profile lookup for {} gave up: {}", user.id, e);
                    AuthSnapshot::failed(AuthFailure::ProfileUnavailable {
                        user_id: user.id,
                        message: e.to_string(),
                    })
                }
                LookupOrigin::Refresh => {
                    tracing::warn!(
                        "Profile refresh for {} failed, keeping {:?}: {}",
                        user.id,
                        self.current_status(),
                        e
                    );
                    return false;
                }
            },
        };

        state.applied_ticket = request.ticket;
        self.publish(snapshot);
        true
    }
}
