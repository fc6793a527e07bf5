//! Supabase auth client and the shared signed-in state.
//!
//! [`SupabaseAuthClient`] talks to `/auth/v1`; [`AuthState`] holds the current
//! session for everything that needs a user id or bearer token.

use std::fmt;
use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::config::SupabaseEndpoint;
use crate::util::{compact_text, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("Email and password are required")]
    MissingCredentials,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Session storage error: {0}")]
    Storage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where a signed-in session survives restarts
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Current session shared by services and the sync orchestrator
///
/// Cloning shares the same state. Subscribers see every sign-in and sign-out.
#[derive(Clone)]
pub struct AuthState {
    sender: Arc<watch::Sender<Option<AuthSession>>>,
}

impl AuthState {
    /// Signed-out state
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_session(session: AuthSession) -> Self {
        let state = Self::new();
        state.sign_in_with(session);
        state
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.sender.borrow().clone()
    }

    /// Remote user id of the signed-in user
    pub fn current_user_id(&self) -> Option<String> {
        self.sender
            .borrow()
            .as_ref()
            .map(|session| session.user.id.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.sender
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn sign_in_with(&self, session: AuthSession) {
        tracing::debug!("Signed in as {}", session.user.id);
        self.sender.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        if self.sender.send_replace(None).is_some() {
            tracing::info!("Signed out");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.sender.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthState")
            .field("user_id", &self.current_user_id())
            .finish()
    }
}

#[derive(Clone)]
pub struct SupabaseAuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> SupabaseAuthClient<S> {
    pub fn new(endpoint: &SupabaseEndpoint, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(&endpoint.url)?;
        let anon_key = endpoint.anon_key.trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
        })
    }

    /// Load the persisted session into `state`, refreshing it when expired
    ///
    /// A rejected refresh clears the stored session and leaves `state` signed
    /// out rather than failing startup. A network failure keeps the stale
    /// session so local work stays attributed to the same user.
    pub async fn restore_into(&self, state: &AuthState) -> AuthResult<Option<AuthUser>> {
        let Some(stored) = self.store.load_session()? else {
            return Ok(None);
        };

        let session = if stored.is_expired() {
            match self.refresh_session(&stored.refresh_token).await {
                Ok(refreshed) => refreshed,
                // Unreachable server: keep working offline as the stored user
                Err(AuthError::Http(error)) => {
                    tracing::warn!("Could not refresh persisted session: {error}");
                    stored
                }
                Err(error) => {
                    tracing::warn!("Failed to refresh persisted session: {error}");
                    self.store.clear_session()?;
                    state.sign_out();
                    return Ok(None);
                }
            }
        } else {
            stored
        };

        let user = session.user.clone();
        state.sign_in_with(session);
        Ok(Some(user))
    }

    /// Password sign-in; persists the session and publishes it to `state`
    pub async fn sign_in(
        &self,
        state: &AuthState,
        email: &str,
        password: &str,
    ) -> AuthResult<AuthUser> {
        if email.trim().is_empty() || password.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let payload = serde_json::json!({
            "email": email.trim(),
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );
        let session = self.send_token_request(request).await?;

        self.store.save_session(&session)?;
        let user = session.user.clone();
        state.sign_in_with(session);
        Ok(user)
    }

    /// Exchange a refresh token for a new session and persist it
    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({ "refresh_token": refresh_token });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        let session = self.send_token_request(request).await?;
        self.store.save_session(&session)?;
        Ok(session)
    }

    /// Revoke the current session remotely, then forget it locally
    ///
    /// An already-expired token (401) still counts as signed out.
    pub async fn sign_out(&self, state: &AuthState) -> AuthResult<()> {
        if let Some(access_token) = state.access_token() {
            let response = self
                .client
                .post(format!("{}/logout", self.auth_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(access_token)
                .send()
                .await?;

            let status = response.status();
            if !(status.is_success() || status == StatusCode::UNAUTHORIZED) {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Api(parse_api_error(status, &body)));
            }
        }

        self.store.clear_session()?;
        state.sign_out();
        Ok(())
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn send_token_request(&self, request: RequestBuilder) -> AuthResult<AuthSession> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        response.json::<TokenResponse>().await?.into_session()
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<AuthUser>,
}

impl TokenResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
        });

        match (self.access_token, self.refresh_token, expires_at, self.user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                })
            }
            _ => Err(AuthError::Api(
                "Token response did not include an active session".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

/// Best human-readable message from a GoTrue/PostgREST error body
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| {
            payload
                .message
                .or(payload.msg)
                .or(payload.error_description)
                .or(payload.error)
        });

    match message {
        Some(message) => format!("{} ({})", message.trim(), status.as_u16()),
        None if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        None => format!("{} ({})", compact_text(body), status.as_u16()),
    }
}
