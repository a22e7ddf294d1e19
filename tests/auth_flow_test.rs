mod common;

use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use yorival::backend::{MemoryProfileStore, MemorySessionService};
use yorival::session::AuthError;
use yorival::types::{AuthFailure, AuthStatus};

#[tokio::test]
async fn test_initial_session_without_profile_needs_profile() {
    let h = start(
        MemorySessionService::with_session("u1"),
        MemoryProfileStore::new(),
    )
    .await;

    let snapshot = wait_for(&h.controller, |s| s.status.is_settled()).await;
    assert_eq!(snapshot.status, AuthStatus::NeedsProfile);
    assert_eq!(h.controller.current_user().unwrap().id, "u1");
    assert!(h.controller.current_profile().is_none());
}

#[tokio::test]
async fn test_initial_session_with_profile_is_ready() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;

    let snapshot = h.controller.wait_until_settled().await;
    assert_eq!(snapshot.status, AuthStatus::Ready);
    assert_eq!(snapshot.profile.unwrap().handle, "abc");
}

#[tokio::test]
async fn test_no_session_is_unauthenticated() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;

    let snapshot = h.controller.wait_until_settled().await;
    assert_eq!(snapshot.status, AuthStatus::Unauthenticated);
    assert!(snapshot.user.is_none());
    assert_eq!(h.profiles.lookup_count(), 0);
}

#[tokio::test]
async fn test_refresh_after_profile_created_becomes_ready() {
    let h = start(
        MemorySessionService::with_session("u1"),
        MemoryProfileStore::new(),
    )
    .await;
    wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;

    h.profiles.put(profile("u1", "abc")).await;
    h.controller.refresh_profile().await;

    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
    assert_eq!(h.controller.current_profile().unwrap().handle, "abc");
}

#[tokio::test]
async fn test_refresh_never_regresses_to_initializing() {
    let h = start(
        MemorySessionService::with_session("u1"),
        MemoryProfileStore::new(),
    )
    .await;
    wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;
    h.profiles.put(profile("u1", "abc")).await;

    let gate = h.profiles.hold("u1").await;
    let lookups_before = h.profiles.lookup_count();
    let controller = h.controller.clone();
    let refresh = tokio::spawn(async move { controller.refresh_profile().await });

    // Refresh lookup is in flight and held
    wait_for_lookups(&h.profiles, lookups_before + 1).await;
    assert_eq!(h.controller.current_status(), AuthStatus::NeedsProfile);
    assert_eq!(h.controller.current_user().unwrap().id, "u1");

    gate.release();
    refresh.await.unwrap();
    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
}

#[tokio::test]
async fn test_refresh_while_unauthenticated_is_noop() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;

    h.controller.refresh_profile().await;

    assert_eq!(h.controller.current_status(), AuthStatus::Unauthenticated);
    assert!(h.controller.current_profile().is_none());
    assert_eq!(h.profiles.lookup_count(), 0);
}

#[tokio::test]
async fn test_sign_out_clears_user_and_profile_together() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;

    h.controller.sign_out().await.unwrap();

    let snapshot = wait_for(&h.controller, |s| s.status != AuthStatus::Ready).await;
    assert_eq!(snapshot.status, AuthStatus::Unauthenticated);
    assert!(snapshot.user.is_none());
    assert!(snapshot.profile.is_none());
}

#[tokio::test]
async fn test_session_loss_returns_to_unauthenticated() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;

    h.sessions.revoke().await;

    let snapshot = wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;
    assert!(snapshot.profile.is_none());
}

#[tokio::test]
async fn test_failed_sign_out_keeps_state() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;

    h.sessions.set_sign_out_failure(true);
    let result = h.controller.sign_out().await;

    assert!(matches!(result, Err(AuthError::SignOut(_))));
    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
    assert_eq!(h.controller.current_profile().unwrap().handle, "abc");
}

#[tokio::test]
async fn test_sign_in_is_hidden_until_lookup_resolves() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;

    let gate = h.profiles.hold("u1").await;
    h.sessions.sign_in("u1").await;

    let pending = wait_for_status(&h.controller, AuthStatus::Initializing).await;
    assert!(pending.user.is_none());
    assert!(pending.profile.is_none());

    gate.release();
    let settled = wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;
    assert_eq!(settled.user.unwrap().id, "u1");
}

#[tokio::test]
async fn test_stale_lookup_is_discarded() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "first")).await;
    profiles.put(profile("u2", "second")).await;
    let h = start(MemorySessionService::new(), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;

    let gate_a = h.profiles.hold("u1").await;
    let gate_b = h.profiles.hold("u2").await;
    h.sessions.sign_in("u1").await;
    h.sessions.sign_in("u2").await;

    // B resolves first
    gate_b.release();
    let snapshot = wait_for_status(&h.controller, AuthStatus::Ready).await;
    assert_eq!(snapshot.user.unwrap().id, "u2");

    // A resolves late and must not overwrite B
    gate_a.release();
    wait_idle(&h.controller).await;

    assert_eq!(h.controller.current_user().unwrap().id, "u2");
    assert_eq!(h.controller.current_profile().unwrap().handle, "second");
}

#[tokio::test]
async fn test_account_switch_never_shows_previous_profile() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "first")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;

    let gate = h.profiles.hold("u2").await;
    h.sessions.sign_in("u2").await;

    let pending = wait_for_status(&h.controller, AuthStatus::Initializing).await;
    assert!(pending.profile.is_none());

    gate.release();
    let settled = wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;
    assert_eq!(settled.user.unwrap().id, "u2");
}

#[tokio::test]
async fn test_token_refresh_keeps_settled_status() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;
    let lookups = h.profiles.lookup_count();

    let mut rx = h.controller.subscribe();
    rx.borrow_and_update();
    h.sessions.refresh_token().await;
    tokio::time::timeout(WAIT, rx.changed())
        .await
        .expect("token refresh not applied")
        .unwrap();

    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
    assert_eq!(h.profiles.lookup_count(), lookups);
}

#[tokio::test]
async fn test_service_error_after_verdict_is_ignored() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    wait_for_status(&h.controller, AuthStatus::Ready).await;

    let mut rx = h.controller.subscribe();
    rx.borrow_and_update();
    h.sessions.emit_outage("connection reset").await;
    // Events are handled in order, so once this lands the outage was seen
    h.sessions.refresh_token().await;
    tokio::time::timeout(WAIT, rx.changed())
        .await
        .expect("token refresh not applied")
        .unwrap();

    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
}

#[tokio::test]
async fn test_transient_lookup_failure_is_retried() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    profiles.fail_lookups("u1", 2).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;

    let snapshot = h.controller.wait_until_settled().await;
    assert_eq!(snapshot.status, AuthStatus::Ready);
    assert_eq!(h.profiles.lookup_count(), 3);
}

#[tokio::test]
async fn test_lookup_failure_is_not_needs_profile() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    profiles.fail_lookups("u1", 10).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;

    let snapshot = h.controller.wait_until_settled().await;
    match snapshot.status {
        AuthStatus::Error(AuthFailure::ProfileUnavailable { user_id, .. }) => {
            assert_eq!(user_id, "u1")
        }
        other => panic!("Expected ProfileUnavailable, got {:?}", other),
    }
    assert!(snapshot.user.is_none());

    // Store recovers; retry reaches the real answer
    h.profiles.fail_lookups("u1", 0).await;
    h.controller.retry().await;
    assert_eq!(h.controller.current_status(), AuthStatus::Ready);
}

#[tokio::test]
async fn test_failed_refresh_keeps_settled_status() {
    let h = start(
        MemorySessionService::with_session("u1"),
        MemoryProfileStore::new(),
    )
    .await;
    wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;

    h.profiles.fail_lookups("u1", 10).await;
    h.controller.refresh_profile().await;

    assert_eq!(h.controller.current_status(), AuthStatus::NeedsProfile);
}

#[tokio::test]
async fn test_cancelled_retry_still_settles() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "abc")).await;
    profiles.fail_lookups("u1", 10).await;
    let h = start(MemorySessionService::with_session("u1"), profiles).await;
    let snapshot = h.controller.wait_until_settled().await;
    assert!(matches!(
        snapshot.status,
        AuthStatus::Error(AuthFailure::ProfileUnavailable { .. })
    ));

    h.profiles.fail_lookups("u1", 0).await;
    let gate = h.profiles.hold("u1").await;
    let cancelled = tokio::time::timeout(Duration::from_millis(50), h.controller.retry()).await;
    assert!(cancelled.is_err());
    assert_eq!(h.controller.current_status(), AuthStatus::Initializing);

    // The retry lookup outlives the dropped call and a same-user event does not wedge it
    gate.release();
    h.sessions.refresh_token().await;
    let snapshot = wait_for_status(&h.controller, AuthStatus::Ready).await;
    assert_eq!(snapshot.profile.unwrap().handle, "abc");
    wait_idle(&h.controller).await;
    assert_eq!(h.controller.pending_work(), 0);
}

#[tokio::test]
async fn test_same_user_change_during_first_lookup() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;

    let gate = h.profiles.hold("u1").await;
    h.sessions.sign_in("u1").await;
    wait_for_status(&h.controller, AuthStatus::Initializing).await;
    wait_for_lookups(&h.profiles, 1).await;

    h.sessions.refresh_token().await;
    h.sessions.update_email("u1@yorival.app").await;
    gate.release();

    let settled = wait_for(&h.controller, |s| {
        s.status == AuthStatus::NeedsProfile
            && s.user.as_ref().and_then(|u| u.email.as_deref()) == Some("u1@yorival.app")
    })
    .await;
    assert_eq!(settled.user.unwrap().id, "u1");
    assert!(settled.profile.is_none());

    wait_idle(&h.controller).await;
    assert_eq!(h.profiles.lookup_count(), 1);
}

#[tokio::test]
async fn test_startup_outage_recovers_within_retries() {
    let sessions = MemorySessionService::with_session("u1");
    // One for the subscription, one for the first direct check
    sessions.set_unreachable(2).await;
    let h = start(sessions, MemoryProfileStore::new()).await;

    let snapshot = h.controller.wait_until_settled().await;
    assert_eq!(snapshot.status, AuthStatus::NeedsProfile);
    assert_eq!(snapshot.user.unwrap().id, "u1");
}

#[tokio::test]
async fn test_startup_outage_surfaces_error_then_retry() {
    let sessions = MemorySessionService::with_session("u1");
    sessions.set_unreachable(10).await;
    let h = start(sessions, MemoryProfileStore::new()).await;

    let snapshot = h.controller.wait_until_settled().await;
    assert!(matches!(
        snapshot.status,
        AuthStatus::Error(AuthFailure::SessionUnavailable { .. })
    ));
    assert!(snapshot.user.is_none());

    h.sessions.set_unreachable(0).await;
    h.controller.retry().await;
    let snapshot = wait_for_status(&h.controller, AuthStatus::NeedsProfile).await;
    assert_eq!(snapshot.user.unwrap().id, "u1");
}

#[tokio::test]
async fn test_retry_is_noop_when_healthy() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;

    h.controller.retry().await;
    assert_eq!(h.controller.current_status(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    assert!(matches!(
        h.controller.start().await,
        Err(AuthError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn test_not_started_controller_stays_initializing() {
    let h = build(
        MemorySessionService::with_session("u1"),
        MemoryProfileStore::new(),
    );
    h.sessions.sign_in("u1").await;

    assert_eq!(h.controller.current_status(), AuthStatus::Initializing);
    assert_eq!(h.sessions.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_unsubscribes() {
    let h = start(MemorySessionService::new(), MemoryProfileStore::new()).await;
    wait_for_status(&h.controller, AuthStatus::Unauthenticated).await;
    assert_eq!(h.sessions.subscriber_count().await, 1);

    h.controller.shutdown().await;
    // The aborted listener drops its stream; the next event prunes it
    tokio::time::timeout(WAIT, async {
        loop {
            h.sessions.sign_in("u1").await;
            if h.sessions.subscriber_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("listener still subscribed after shutdown");

    assert_eq!(h.controller.current_status(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn test_published_snapshots_are_never_torn() {
    let profiles = MemoryProfileStore::new();
    profiles.put(profile("u1", "one")).await;
    profiles.put(profile("u3", "three")).await;
    let h = start(MemorySessionService::new(), profiles).await;

    let torn = Arc::new(AtomicBool::new(false));
    let mut rx = h.controller.subscribe();
    let observer = {
        let torn = torn.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let s = rx.borrow_and_update().clone();
                let consistent = match s.status {
                    AuthStatus::Ready => s.user.is_some() && s.profile.is_some(),
                    AuthStatus::NeedsProfile => s.user.is_some() && s.profile.is_none(),
                    _ => s.user.is_none() && s.profile.is_none(),
                };
                let matching = match (&s.user, &s.profile) {
                    (Some(u), Some(p)) => u.id == p.id,
                    _ => true,
                };
                if !consistent || !matching {
                    torn.store(true, Ordering::SeqCst);
                }
            }
        })
    };

    for _ in 0..3 {
        h.sessions.sign_in("u1").await;
        h.sessions.sign_in("u2").await;
        h.sessions.revoke().await;
    }
    // Only the last event can produce u3, so every earlier one has been applied
    h.sessions.sign_in("u3").await;
    wait_for(&h.controller, |s| {
        s.status == AuthStatus::Ready && s.user.as_ref().is_some_and(|u| u.id == "u3")
    })
    .await;
    wait_idle(&h.controller).await;

    observer.abort();
    assert!(!torn.load(Ordering::SeqCst));
    assert_eq!(h.controller.current_user().unwrap().id, "u3");
    assert_eq!(h.controller.current_profile().unwrap().handle, "three");
}
