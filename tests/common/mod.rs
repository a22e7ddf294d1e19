#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use yorival::backend::{MemoryProfileStore, MemorySessionService};
use yorival::session::{AuthController, ControllerConfig, RetryPolicy};
use yorival::types::{AuthSnapshot, AuthStatus, Profile};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub sessions: Arc<MemorySessionService>,
    pub profiles: Arc<MemoryProfileStore>,
    pub controller: Arc<AuthController>,
}

/// Millisecond retries so failure paths finish quickly
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

pub fn profile(id: &str, handle: &str) -> Profile {
    Profile {
        id: id.to_string(),
        handle: handle.to_string(),
    }
}

/// Build a controller over the given fakes without starting it
pub fn build(sessions: MemorySessionService, profiles: MemoryProfileStore) -> Harness {
    let sessions = Arc::new(sessions);
    let profiles = Arc::new(profiles);
    let controller = Arc::new(AuthController::new(
        sessions.clone(),
        profiles.clone(),
        fast_config(),
    ));
    Harness {
        sessions,
        profiles,
        controller,
    }
}

/// Build and start
pub async fn start(sessions: MemorySessionService, profiles: MemoryProfileStore) -> Harness {
    let harness = build(sessions, profiles);
    harness
        .controller
        .start()
        .await
        .expect("controller should start");
    harness
}

/// Wait until a published snapshot satisfies `predicate`
pub async fn wait_for(
    controller: &AuthController,
    predicate: impl FnMut(&AuthSnapshot) -> bool,
) -> AuthSnapshot {
    let mut rx = controller.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for auth snapshot")
        .expect("controller dropped")
        .clone();
    snapshot
}

pub async fn wait_for_status(controller: &AuthController, status: AuthStatus) -> AuthSnapshot {
    wait_for(controller, |s| s.status == status).await
}

pub async fn wait_idle(controller: &AuthController) {
    tokio::time::timeout(WAIT, controller.wait_idle())
        .await
        .expect("timed out waiting for pending lookups");
}

/// Wait until the store has seen at least `count` lookups
pub async fn wait_for_lookups(profiles: &MemoryProfileStore, count: usize) {
    tokio::time::timeout(WAIT, async {
        while profiles.lookup_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for profile lookups");
}
