//! Tenant (farm) resolution for the signed-in user.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AuthError, SessionPersistence, SupabaseAuthClient};
use crate::config::BackendConfig;
use crate::error::Result;

/// Source of the current tenant and credentials for remote calls.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Farm every query and subscription is scoped to.
    ///
    /// Fails with [`AuthError::NotAuthenticated`] when no session exists.
    async fn farm_id(&self) -> Result<String>;

    /// Bearer token for remote calls; `None` falls back to the anon key.
    async fn access_token(&self) -> Result<Option<String>>;
}

/// Identity with a tenant known up front (tests, service accounts).
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity {
    farm_id: Option<String>,
    access_token: Option<String>,
}

impl FixedIdentity {
    pub fn new(farm_id: impl Into<String>) -> Self {
        Self {
            farm_id: Some(farm_id.into()),
            access_token: None,
        }
    }

    /// Identity with no session at all.
    pub fn signed_out() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn farm_id(&self) -> Result<String> {
        self.farm_id
            .clone()
            .ok_or_else(|| AuthError::NotAuthenticated.into())
    }

    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.access_token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct FarmMembership {
    farm_id: String,
}

/// Identity backed by a persisted Supabase session.
///
/// The farm comes from the user's `farm_members` row unless an override is set.
pub struct SupabaseIdentity<S: SessionPersistence> {
    auth: SupabaseAuthClient<S>,
    http: Client,
    rest_url: String,
    anon_key: String,
    farm_override: Option<String>,
    /// (user id, farm id) of the last successful lookup
    cached_farm: Mutex<Option<(String, String)>>,
}

impl<S: SessionPersistence> SupabaseIdentity<S> {
    pub fn new(
        auth: SupabaseAuthClient<S>,
        backend: &BackendConfig,
        farm_override: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder().build().map_err(AuthError::from)?;
        Ok(Self {
            auth,
            http,
            rest_url: backend.rest_url(),
            anon_key: backend.supabase_anon_key.clone(),
            farm_override,
            cached_farm: Mutex::new(None),
        })
    }

    async fn lookup_farm(&self, user_id: &str, access_token: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/farm_members", self.rest_url))
            .query(&[
                ("select", "farm_id".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("limit", "1".to_string()),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(AuthError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(super::parse_api_error(status, &body)).into());
        }

        let memberships: Vec<FarmMembership> = response.json().await.map_err(AuthError::from)?;
        memberships
            .into_iter()
            .next()
            .map(|membership| membership.farm_id)
            .ok_or_else(|| AuthError::NoFarm(user_id.to_string()).into())
    }
}

#[async_trait]
impl<S: SessionPersistence> IdentityProvider for SupabaseIdentity<S> {
    async fn farm_id(&self) -> Result<String> {
        let session = self
            .auth
            .restore_session()
            .await?
            .ok_or(AuthError::NotAuthenticated)?;
        if let Some(farm_id) = &self.farm_override {
            return Ok(farm_id.clone());
        }

        let mut cached = self.cached_farm.lock().await;
        if let Some((user_id, farm_id)) = cached.as_ref() {
            if *user_id == session.user.id {
                return Ok(farm_id.clone());
            }
        }

        let farm_id = self
            .lookup_farm(&session.user.id, &session.access_token)
            .await?;
        tracing::debug!(user = %session.user.id, farm = %farm_id, "Resolved farm membership");
        *cached = Some((session.user.id.clone(), farm_id.clone()));
        Ok(farm_id)
    }

    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .auth
            .restore_session()
            .await?
            .map(|session| session.access_token))
    }
}
