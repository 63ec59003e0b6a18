//! Supabase PostgREST adapter

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::realtime::RealtimeClient;
use super::{ChangeStream, Query, RemoteResult, RemoteStore};
use crate::auth::IdentityProvider;
use crate::config::BackendConfig;
use crate::error::{RemoteError, RemoteErrorKind};
use crate::util::compact_text;

/// [`RemoteStore`] over Supabase REST + Realtime.
pub struct SupabaseRemote {
    http: Client,
    rest_url: String,
    anon_key: String,
    identity: Arc<dyn IdentityProvider>,
    realtime: RealtimeClient,
}

impl SupabaseRemote {
    pub fn new(backend: &BackendConfig, identity: Arc<dyn IdentityProvider>) -> RemoteResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|error| {
                RemoteError::transient(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            rest_url: backend.rest_url(),
            anon_key: backend.supabase_anon_key.clone(),
            identity,
            realtime: RealtimeClient::new(backend.realtime_endpoint()),
        })
    }

    async fn bearer(&self) -> RemoteResult<String> {
        match self.identity.access_token().await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Ok(self.anon_key.clone()),
            Err(error) if error.is_auth() => Err(RemoteError::unauthorized(error.to_string())),
            Err(error) => Err(RemoteError::transient(error.to_string())),
        }
    }

    async fn authorized(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let token = self.bearer().await?;
        Ok(request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, urlencoding::encode(table))
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Value> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_response(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|error| RemoteError::decode(error.to_string()))
    }

    /// First row of a `return=representation` response.
    async fn send_single(&self, request: RequestBuilder, table: &str) -> RemoteResult<Value> {
        match self.send(request).await? {
            Value::Array(rows) => rows.into_iter().next().ok_or_else(|| {
                RemoteError::new(RemoteErrorKind::NotFound, format!("no {table} row matched"))
            }),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    async fn select(&self, table: &str, query: &Query) -> RemoteResult<Vec<Value>> {
        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        for (column, value) in &query.filters {
            params.push((column.clone(), format!("eq.{value}")));
        }
        if let Some((column, ascending)) = &query.order {
            let direction = if *ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{column}.{direction}")));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let request = self.http.get(self.table_url(table)).query(&params);
        match self.send(request).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(RemoteError::decode(format!(
                "expected an array of {table} rows, got {}",
                compact_text(&other.to_string())
            ))),
        }
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        let request = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        self.send_single(request, table).await
    }

    async fn upsert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        let request = self
            .http
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        self.send_single(request, table).await
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> RemoteResult<Value> {
        let request = self
            .http
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        self.send_single(request, table).await
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        let request = self
            .http
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))]);
        self.send(request).await.map(|_| ())
    }

    async fn subscribe(&self, table: &str, farm_id: &str) -> RemoteResult<ChangeStream> {
        let token = self.bearer().await?;
        self.realtime.subscribe(table, farm_id, &token).await
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Map a failed PostgREST response onto a [`RemoteErrorKind`].
pub fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<PostgrestError>(body).ok();
    let code = parsed.as_ref().and_then(|error| error.code.clone());
    let message = parsed
        .as_ref()
        .and_then(|error| {
            let message = error.message.clone()?;
            Some(match &error.details {
                Some(details) if !details.trim().is_empty() => format!("{message} ({details})"),
                _ => message,
            })
        })
        .unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

    let kind = match code.as_deref() {
        Some("23503") => RemoteErrorKind::ForeignKeyViolation,
        Some("23505") => RemoteErrorKind::Duplicate,
        Some("PGRST301" | "PGRST302") => RemoteErrorKind::Unauthorized,
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            RemoteErrorKind::Unauthorized
        }
        _ if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS =>
        {
            RemoteErrorKind::Transient
        }
        _ if status == StatusCode::NOT_FOUND => RemoteErrorKind::NotFound,
        _ => RemoteErrorKind::Rejected,
    };

    let error = RemoteError::new(kind, message);
    match code {
        Some(code) => error.with_code(code),
        None => error.with_code(status.as_u16().to_string()),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::decode(error.to_string())
    } else {
        RemoteError::transient(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_code_wins_over_status() {
        let error = classify_response(
            StatusCode::CONFLICT,
            r#"{"code":"23503","message":"insert or update on table \"health_records\" violates foreign key constraint","details":"Key (cattle_id)=(x) is not present"}"#,
        );
        assert!(error.is_foreign_key_violation());
        assert_eq!(error.code.as_deref(), Some("23503"));
        assert!(error.message.contains("is not present"));
    }

    #[test]
    fn duplicate_key_is_classified() {
        let error = classify_response(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value"}"#,
        );
        assert!(error.is_duplicate());
    }

    #[test]
    fn expired_jwt_is_unauthorized() {
        let error = classify_response(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"PGRST301","message":"JWT expired"}"#,
        );
        assert_eq!(error.kind, RemoteErrorKind::Unauthorized);
        let forbidden = classify_response(StatusCode::FORBIDDEN, "");
        assert_eq!(forbidden.kind, RemoteErrorKind::Unauthorized);
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert_eq!(classify_response(status, "").kind, RemoteErrorKind::Transient);
        }
    }

    #[test]
    fn other_client_errors_are_rejected() {
        let error = classify_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":"22P02","message":"invalid input syntax for type uuid"}"#,
        );
        assert_eq!(error.kind, RemoteErrorKind::Rejected);
        assert_eq!(
            classify_response(StatusCode::NOT_FOUND, "").kind,
            RemoteErrorKind::NotFound
        );
        assert_eq!(classify_response(StatusCode::BAD_REQUEST, "").message, "HTTP 400");
    }
}
