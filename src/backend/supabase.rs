//! Hosted backend over REST: GoTrue-style auth endpoints and a PostgREST profile table.

use super::*;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PROFILES_TABLE: &str = "profiles";

/// Sessions expiring within this window are refreshed ahead of time
const REFRESH_MARGIN_SECS: i64 = 90;

/// Connection settings for the hosted backend
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    pub timeout: Duration,
    /// How often the background task checks whether the token is due for refresh
    pub auto_refresh_tick: Duration,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            timeout: Duration::from_secs(10),
            auto_refresh_tick: Duration::from_secs(30),
        }
    }

    /// Load from SUPABASE_URL / SUPABASE_ANON_KEY. Returns None unless both are set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match (url, anon_key) {
            (Some(url), Some(anon_key)) => {
                let mut config = Self::new(url, anon_key);
                if let Some(secs) = std::env::var("SUPABASE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                {
                    config.timeout = Duration::from_secs(secs);
                }
                Some(config)
            }
            (url, key) => {
                if url.is_some() || key.is_some() {
                    tracing::warn!(
                        "SUPABASE_URL and SUPABASE_ANON_KEY must both be set to use the hosted backend"
                    );
                }
                None
            }
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    fn build_client(&self) -> BackendResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            user: UserIdentity {
                id: self.user.id,
                email: self.user.email,
            },
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        }
    }
}

/// Map a non-success HTTP status to a backend error
fn status_error(status: StatusCode, body: String) -> BackendError {
    if status == StatusCode::CONFLICT {
        BackendError::Conflict(body)
    } else if status.is_server_error() {
        BackendError::Unavailable(format!("{}: {}", status, body))
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

async fn send(request: RequestBuilder) -> BackendResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }
}

/// Auth service client. Keeps the session locally and announces every change.
pub struct SupabaseAuth {
    config: SupabaseConfig,
    client: reqwest::Client,
    feed: SessionFeed,
    /// Serializes token exchanges; a refresh token is single-use
    refreshing: Mutex<()>,
}

impl SupabaseAuth {
    pub fn new(config: SupabaseConfig) -> BackendResult<Self> {
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            feed: SessionFeed::default(),
            refreshing: Mutex::new(()),
        })
    }

    /// Resume from a previously persisted session
    pub fn with_session(config: SupabaseConfig, session: Session) -> BackendResult<Self> {
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            feed: SessionFeed::new(Some(session)),
            refreshing: Mutex::new(()),
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.config.auth_url(path))
            .header("apikey", &self.config.anon_key)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let response = send(
            self.post("token")
                .query(&[("grant_type", "password")])
                .json(&PasswordCredentials {
                    email: email.trim(),
                    password,
                }),
        )
        .await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = token.into_session();

        tracing::info!("Signed in as {}", session.user.id);
        self.feed
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        Ok(session)
    }

    /// Create an account. Returns None when the service requires email confirmation first.
    pub async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>> {
        let response = send(self.post("signup").json(&PasswordCredentials {
            email: email.trim(),
            password,
        }))
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        if body.get("access_token").is_none() {
            tracing::info!("Sign-up accepted, waiting for email confirmation");
            return Ok(None);
        }

        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = token.into_session();
        self.feed
            .set(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        Ok(Some(session))
    }

    /// Exchange the refresh token for a new session.
    /// A rejected refresh token means the session is gone and is announced as sign-out.
    pub async fn refresh_session(&self) -> BackendResult<Option<Session>> {
        let _exchange = self.refreshing.lock().await;
        self.exchange_refresh_token().await
    }

    /// Refresh only if the current token expires within the margin
    pub async fn refresh_if_due(&self) -> BackendResult<Option<Session>> {
        let _exchange = self.refreshing.lock().await;
        let margin = chrono::Duration::seconds(REFRESH_MARGIN_SECS);
        match self.feed.current().await {
            Some(session) if session.expires_within(chrono::Utc::now(), margin) => {
                tracing::debug!("Access token for {} is due for refresh", session.user.id);
                self.exchange_refresh_token().await
            }
            other => Ok(other),
        }
    }

    /// Keep the access token fresh in the background.
    ///
    /// The task holds a weak reference and ends once the client is dropped.
    pub fn start_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let auth = Arc::downgrade(self);
        let tick = self.config.auto_refresh_tick;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(auth) = auth.upgrade() else {
                    break;
                };
                if let Err(e) = auth.refresh_if_due().await {
                    tracing::warn!("Background token refresh failed: {}", e);
                }
            }
        })
    }

    async fn exchange_refresh_token(&self) -> BackendResult<Option<Session>> {
        let Some(current) = self.feed.current().await else {
            return Ok(None);
        };
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Ok(Some(current));
        };

        let result = send(
            self.post("token")
                .query(&[("grant_type", "refresh_token")])
                .json(&RefreshGrant { refresh_token }),
        )
        .await;

        match result {
            Ok(response) => {
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| BackendError::Decode(e.to_string()))?;
                let session = token.into_session();
                self.feed
                    .set(AuthEventKind::TokenRefreshed, Some(session.clone()))
                    .await;
                Ok(Some(session))
            }
            Err(BackendError::Rejected { status, message }) => {
                tracing::warn!("Refresh token rejected ({}): {}", status, message);
                self.feed.set(AuthEventKind::SignedOut, None).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bearer token for REST calls on behalf of the signed-in user
    pub async fn access_token(&self) -> Option<String> {
        self.feed.current().await.map(|s| s.access_token)
    }
}

#[async_trait]
impl SessionService for SupabaseAuth {
    async fn current_session(&self) -> BackendResult<Option<Session>> {
        self.refresh_if_due().await
    }

    async fn subscribe(&self) -> SessionStream {
        // A persisted session may be stale; deliver a usable token first
        match self.refresh_if_due().await {
            Ok(_) => self.feed.subscribe().await,
            Err(e) => {
                tracing::warn!("Could not refresh stored session: {}", e);
                let stream = self.feed.subscribe().await;
                stream::once(async move { Err(e) })
                    .chain(stream.skip(1))
                    .boxed()
            }
        }
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(token) = self.access_token().await else {
            return Err(BackendError::NoSession);
        };

        send(self.post("logout").bearer_auth(token)).await?;

        tracing::info!("Signed out");
        self.feed.set(AuthEventKind::SignedOut, None).await;
        Ok(())
    }
}

/// Profile table client
pub struct SupabaseProfiles {
    config: SupabaseConfig,
    client: reqwest::Client,
    /// When set, requests carry the signed-in user's token instead of the anon key
    auth: Option<Arc<SupabaseAuth>>,
}

impl SupabaseProfiles {
    pub fn new(config: SupabaseConfig) -> BackendResult<Self> {
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            auth: None,
        })
    }

    pub fn with_auth(mut self, auth: Arc<SupabaseAuth>) -> Self {
        self.auth = Some(auth);
        self
    }

    async fn bearer(&self) -> String {
        match &self.auth {
            Some(auth) => auth
                .access_token()
                .await
                .unwrap_or_else(|| self.config.anon_key.clone()),
            None => self.config.anon_key.clone(),
        }
    }

    /// Read one row; an unauthorized read refreshes the session and tries once more
    async fn select_one(&self, column: &str, value: &str) -> BackendResult<Option<Profile>> {
        let result = self.try_select_one(column, value).await;
        let Some(auth) = &self.auth else {
            return result;
        };

        match result {
            Err(BackendError::Rejected { status: 401, message }) => {
                tracing::info!("Profile read unauthorized ({}), refreshing session", message);
                if auth.refresh_session().await?.is_none() {
                    return Err(BackendError::NoSession);
                }
                self.try_select_one(column, value).await
            }
            other => other,
        }
    }

    async fn try_select_one(&self, column: &str, value: &str) -> BackendResult<Option<Profile>> {
        let filter = format!("eq.{}", value);
        let response = send(
            self.client
                .get(self.config.rest_url(PROFILES_TABLE))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(self.bearer().await)
                .query(&[(column, filter.as_str()), ("select", "id,username")]),
        )
        .await?;

        let rows: Vec<Profile> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfiles {
    async fn find_profile(&self, user_id: &UserId) -> BackendResult<Option<Profile>> {
        self.select_one("id", user_id).await
    }

    async fn find_profile_by_handle(&self, handle: &str) -> BackendResult<Option<Profile>> {
        self.select_one("username", handle).await
    }

    async fn insert_profile(&self, profile: Profile) -> BackendResult<()> {
        send(
            self.client
                .post(self.config.rest_url(PROFILES_TABLE))
                .header("apikey", &self.config.anon_key)
                .header("Prefer", "return=minimal")
                .bearer_auth(self.bearer().await)
                .json(&profile),
        )
        .await?;

        tracing::info!("Created profile {} for {}", profile.handle, profile.id);
        Ok(())
    }
}
