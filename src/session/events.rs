use super::lookup::{LookupOrigin, LookupRequest};
use super::*;
use futures::StreamExt;

impl AuthController {
    /// Subscribe to the session service and start reacting to changes.
    ///
    /// The subscription's first item is the current session, so there is no
    /// separate initial check.
    pub async fn start(self: &Arc<Self>) -> AuthResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Err(AuthError::AlreadyStarted);
        }

        let mut stream = self.sessions.subscribe().await;
        let controller = Arc::downgrade(self);

        *listener = Some(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                match item {
                    Ok(change) => controller.apply_session_change(change, false).await,
                    Err(e) => controller.handle_service_error(e).await,
                }
            }
            tracing::debug!("Session subscription closed");
        }));

        tracing::info!("Auth controller started");
        Ok(())
    }

    /// Stop listening. Dropping the stream unsubscribes from the service.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            tracing::info!("Auth controller stopped");
        }
    }

    /// Apply one session change atomically.
    ///
    /// With `only_if_unknown` the change is dropped if another verdict already
    /// arrived; used by the recovery path after a service outage.
    pub(super) async fn apply_session_change(
        self: &Arc<Self>,
        change: SessionChange,
        only_if_unknown: bool,
    ) {
        let mut state = self.state.write().await;
        if only_if_unknown && state.session_known {
            tracing::debug!("Session verdict already known, dropping recovered check");
            return;
        }
        state.session_known = true;

        let Some(session) = change.session else {
            let had_session = state.session.take().is_some();
            state.generation += 1;
            if had_session {
                tracing::info!("Session ended ({:?})", change.kind);
            }
            // Profile goes in the same update as the session
            self.publish(AuthSnapshot::unauthenticated());
            return;
        };

        let same_user = state
            .session
            .as_ref()
            .is_some_and(|s| s.user_id() == session.user_id());
        let user = session.user.clone();
        state.session = Some(session);

        if same_user {
            let status = self.current_status();
            if status.is_authenticated() {
                // Keep the settled snapshot, only refresh the identity
                let mut snapshot = self.snapshot();
                snapshot.user = Some(user);
                self.publish(snapshot);
                return;
            }
            if status == AuthStatus::Initializing {
                tracing::debug!(
                    "Session for {} replaced ({:?}) while its lookup is pending",
                    user.id,
                    change.kind
                );
                return;
            }
            // Error: the new event is a chance to try again
        } else {
            state.generation += 1;
        }

        self.publish(AuthSnapshot::initializing());
        let request = LookupRequest {
            user,
            generation: state.generation,
            ticket: state.issue_ticket(),
            origin: LookupOrigin::SessionChange,
        };
        drop(state);

        self.spawn_lookup(request);
    }

    async fn handle_service_error(self: &Arc<Self>, error: BackendError) {
        if self.state.read().await.session_known {
            tracing::warn!("Auth service error after verdict, keeping state: {}", error);
            return;
        }

        tracing::warn!("Auth service unavailable before first verdict: {}", error);
        self.spawn_session_check();
    }

    pub(super) fn spawn_session_check(self: &Arc<Self>) -> JoinHandle<()> {
        let guard = PendingGuard::new(&self.pending);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.check_session().await;
            drop(guard);
        })
    }

    /// Ask the service directly with bounded retries; publish a hard error when exhausted
    pub(super) async fn check_session(self: &Arc<Self>) {
        let policy = self.config.retry.clone();
        let mut attempt = 1;

        let error = loop {
            match self.sessions.current_session().await {
                Ok(session) => {
                    let change = SessionChange::new(AuthEventKind::InitialSession, session);
                    self.apply_session_change(change, true).await;
                    return;
                }
                Err(e) if attempt < policy.max_attempts => {
                    if self.state.read().await.session_known {
                        return;
                    }
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        "Session check attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        let state = self.state.write().await;
        if state.session_known {
            return;
        }
        tracing::error!(
            "Auth service unreachable after {} attempts: {}",
            policy.max_attempts,
            error
        );
        self.publish(AuthSnapshot::failed(AuthFailure::SessionUnavailable {
            message: error.to_string(),
        }));
        drop(state);
    }
}
