use super::lookup::{LookupOrigin, LookupRequest};
use super::*;

impl AuthController {
    /// Ask the auth service to end the session.
    ///
    /// Local state only changes when the resulting session change arrives, so a
    /// failed sign-out leaves everything as it was.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.sessions.sign_out().await.map_err(|e| {
            tracing::warn!("Sign-out failed, keeping current session: {}", e);
            AuthError::SignOut(e)
        })
    }

    /// Re-read the current user's profile, e.g. right after the setup step created it.
    ///
    /// The settled status stays visible until the new result lands. No-op while
    /// signed out.
    pub async fn refresh_profile(&self) {
        let request = {
            let mut state = self.state.write().await;
            let Some(session) = state.session.as_ref() else {
                tracing::debug!("refresh_profile without a session, ignoring");
                return;
            };
            let user = session.user.clone();
            LookupRequest {
                user,
                generation: state.generation,
                ticket: state.issue_ticket(),
                origin: LookupOrigin::Refresh,
            }
        };

        let _guard = PendingGuard::new(&self.pending);
        self.run_lookup(request).await;
    }

    /// Re-run whatever step put the controller into `Error`. No-op otherwise.
    ///
    /// The work runs on its own task, so dropping this future does not leave
    /// the controller stuck in `Initializing`. Awaiting it waits for the result.
    pub async fn retry(self: &Arc<Self>) {
        let task = {
            let mut state = self.state.write().await;
            match self.current_status() {
                AuthStatus::Error(AuthFailure::SessionUnavailable { .. }) => {
                    self.publish(AuthSnapshot::initializing());
                    tracing::info!("Retrying session check");
                    self.spawn_session_check()
                }
                AuthStatus::Error(AuthFailure::ProfileUnavailable { user_id, .. }) => {
                    let Some(session) = state.session.as_ref() else {
                        return;
                    };
                    if session.user_id() != &user_id {
                        return;
                    }
                    let user = session.user.clone();
                    let request = LookupRequest {
                        user,
                        generation: state.generation,
                        ticket: state.issue_ticket(),
                        origin: LookupOrigin::SessionChange,
                    };
                    self.publish(AuthSnapshot::initializing());
                    tracing::info!("Retrying profile lookup for {}", request.user.id);
                    self.spawn_lookup(request)
                }
                _ => return,
            }
        };

        if let Err(e) = task.await {
            tracing::error!("Retry task failed: {}", e);
        }
    }
}
