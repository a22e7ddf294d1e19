use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type UserId = String;
pub type Handle = String;

/// Identity of the signed-in user as reported by the auth service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }
}

/// Proof of authentication. Owned by the auth service; the controller only observes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: UserIdentity,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// Whether the access token has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_within(now, chrono::Duration::zero())
    }

    /// Whether the access token expires before `now + margin`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

/// Application-level user record, created once by the setup step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    /// Unique public handle (stored in the `username` column)
    #[serde(rename = "username")]
    pub handle: Handle,
}

/// Why the auth service emitted a session change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A single notification from the auth service's subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Unrecoverable condition surfaced to dependents after bounded retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthFailure {
    /// The auth service could not report whether a session exists
    SessionUnavailable { message: String },
    /// The profile record for a signed-in user could not be read
    ProfileUnavailable { user_id: UserId, message: String },
}

/// Derived status exposed to the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Initializing,
    Unauthenticated,
    #[serde(rename = "authenticated_needs_profile")]
    NeedsProfile,
    #[serde(rename = "authenticated_ready")]
    Ready,
    Error(AuthFailure),
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::NeedsProfile | AuthStatus::Ready)
    }

    /// Whether a verdict has been reached (anything but `Initializing`)
    pub fn is_settled(&self) -> bool {
        !matches!(self, AuthStatus::Initializing)
    }
}

/// Consistent view of status, user and profile, published as one value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub user: Option<UserIdentity>,
    pub profile: Option<Profile>,
}

impl AuthSnapshot {
    pub fn initializing() -> Self {
        Self {
            status: AuthStatus::Initializing,
            user: None,
            profile: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            user: None,
            profile: None,
        }
    }

    pub fn needs_profile(user: UserIdentity) -> Self {
        Self {
            status: AuthStatus::NeedsProfile,
            user: Some(user),
            profile: None,
        }
    }

    pub fn ready(user: UserIdentity, profile: Profile) -> Self {
        Self {
            status: AuthStatus::Ready,
            user: Some(user),
            profile: Some(profile),
        }
    }

    pub fn failed(failure: AuthFailure) -> Self {
        Self {
            status: AuthStatus::Error(failure),
            user: None,
            profile: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_like_the_ui_expects() {
        let json = serde_json::to_string(&AuthStatus::NeedsProfile).unwrap();
        assert_eq!(json, "\"authenticated_needs_profile\"");

        let json = serde_json::to_string(&AuthStatus::Ready).unwrap();
        assert_eq!(json, "\"authenticated_ready\"");
    }

    #[test]
    fn test_profile_handle_maps_to_username_column() {
        let profile: Profile = serde_json::from_str(r#"{"id":"u1","username":"abc"}"#).unwrap();
        assert_eq!(profile.handle, "abc");
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let mut session = Session {
            user: UserIdentity::new("u1"),
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!session.is_expired(now));

        session.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(session.is_expired(now));

        session.expires_at = Some(now + chrono::Duration::seconds(30));
        assert!(!session.is_expired(now));
        assert!(session.expires_within(now, chrono::Duration::seconds(90)));
        assert!(!session.expires_within(now, chrono::Duration::seconds(10)));
    }
}
