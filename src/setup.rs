//! One-time profile setup: pick a handle, create the record, refresh the controller.

use crate::backend::{BackendError, ProfileStore};
use crate::session::AuthController;
use crate::types::*;

pub const MAX_HANDLE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Handle '{0}' is already taken")]
    HandleTaken(String),

    #[error("Profile setup requires a signed-in user")]
    NotSignedIn,

    #[error("Profile already exists")]
    AlreadyComplete,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Trim and validate a requested handle
pub fn normalize_handle(raw: &str) -> Result<Handle, SetupError> {
    let handle = raw.trim();

    if handle.is_empty() {
        return Err(SetupError::InvalidHandle("handle cannot be empty".to_string()));
    }
    if handle.chars().count() > MAX_HANDLE_LEN {
        return Err(SetupError::InvalidHandle(format!(
            "handle must be at most {} characters",
            MAX_HANDLE_LEN
        )));
    }
    if let Some(c) = handle
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(SetupError::InvalidHandle(format!(
            "'{}' is not allowed in a handle",
            c
        )));
    }

    Ok(handle.to_string())
}

/// Create the signed-in user's profile and let the controller pick it up.
///
/// Only valid while the controller reports `NeedsProfile`.
pub async fn complete_profile(
    controller: &AuthController,
    store: &dyn ProfileStore,
    raw_handle: &str,
) -> Result<Profile, SetupError> {
    let handle = normalize_handle(raw_handle)?;

    let snapshot = controller.snapshot();
    let user = match (&snapshot.status, snapshot.user) {
        (AuthStatus::NeedsProfile, Some(user)) => user,
        (AuthStatus::Ready, _) => return Err(SetupError::AlreadyComplete),
        _ => return Err(SetupError::NotSignedIn),
    };

    if store.find_profile_by_handle(&handle).await?.is_some() {
        return Err(SetupError::HandleTaken(handle));
    }

    let profile = Profile {
        id: user.id.clone(),
        handle: handle.clone(),
    };
    match store.insert_profile(profile.clone()).await {
        Ok(()) => {}
        // Lost a race with another sign-up for the same handle
        Err(BackendError::Conflict(_)) => return Err(SetupError::HandleTaken(handle)),
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Profile {} created for {}", profile.handle, user.id);
    controller.refresh_profile().await;
    Ok(profile)
}
