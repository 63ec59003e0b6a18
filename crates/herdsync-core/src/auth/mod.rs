//! Supabase session handling and tenant resolution.

mod tenant;

use std::fmt;
use std::sync::{Arc, Mutex};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::unix_timestamp_now;

pub use tenant::{FixedIdentity, IdentityProvider, SupabaseIdentity};

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
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("No farm membership found for user {0}")]
    NoFarm(String),
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Durable home of the signed-in session (keychain, file, memory).
pub trait SessionPersistence: Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Session persistence that lives only as long as the process.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<Mutex<Option<AuthSession>>>,
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        self.session
            .lock()
            .map(|session| session.clone())
            .map_err(|_| AuthError::SecureStorage("session lock poisoned".to_string()))
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let mut slot = self
            .session
            .lock()
            .map_err(|_| AuthError::SecureStorage("session lock poisoned".to_string()))?;
        *slot = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        let mut slot = self
            .session
            .lock()
            .map_err(|_| AuthError::SecureStorage("session lock poisoned".to_string()))?;
        *slot = None;
        Ok(())
    }
}

/// Password-grant client for Supabase GoTrue.
pub struct SupabaseAuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: Arc<S>,
}

impl<S: SessionPersistence> Clone for SupabaseAuthClient<S> {
    fn clone(&self) -> Self {
        Self {
            auth_url: self.auth_url.clone(),
            anon_key: self.anon_key.clone(),
            client: self.client.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SessionPersistence> SupabaseAuthClient<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store: Arc::new(store),
        })
    }

    /// Load the persisted session, refreshing it when expired.
    ///
    /// A session whose refresh fails is cleared.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            return Ok(Some(stored_session));
        }

        match self.refresh_session(&stored_session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        if email.trim().is_empty() {
            return Err(AuthError::Api("Email is required".to_string()));
        }
        if password.trim().is_empty() {
            return Err(AuthError::Api("Password is required".to_string()));
        }

        let payload = serde_json::json!({
            "email": email,
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
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
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

    /// Revoke the session remotely (best effort) and clear it locally.
    pub async fn sign_out(&self) -> AuthResult<()> {
        if let Some(session) = self.store.load_session()? {
            let response = self
                .client
                .post(format!("{}/logout", self.auth_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            let status = response.status();
            if !(status.is_success() || status == StatusCode::UNAUTHORIZED) {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Api(parse_api_error(status, &body)));
            }
        }

        self.store.clear_session()
    }

    /// Session currently persisted, without refreshing.
    pub fn stored_session(&self) -> AuthResult<Option<AuthSession>> {
        self.store.load_session()
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn send_token_request(&self, request: RequestBuilder) -> AuthResult<AuthSession> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
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
    if !crate::util::is_http_url(trimmed) {
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
    user: Option<TokenUser>,
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
                    user: AuthUser {
                        id: user.id,
                        email: user.email,
                    },
                })
            }
            _ => Err(AuthError::Api(
                "Token response did not include an active session".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", crate::util::compact_text(trimmed), status.as_u16())
    }
}
