//! Runtime configuration for the sync engine.
//!
//! `BackendConfig` locates the Supabase project; `SyncSettings` holds the
//! tuning knobs. Both resolve from an environment-style lookup so callers can
//! feed them from `std::env`, a `.env` file, or a test map.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::models::BackoffPolicy;
use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Supabase project endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Realtime websocket URL; derived from `supabase_url` when unset
    pub realtime_url: Option<String>,
}

impl BackendConfig {
    pub fn new(
        supabase_url: impl Into<String>,
        supabase_anon_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let supabase_url = supabase_url.into();
        let supabase_anon_key = supabase_anon_key.into();
        Self::from_lookup(|name| match name {
            "SUPABASE_URL" => Some(supabase_url.clone()),
            "SUPABASE_ANON_KEY" => Some(supabase_anon_key.clone()),
            _ => None,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let supabase_url = required_trimmed(&lookup, "SUPABASE_URL")?;
        if !is_http_url(&supabase_url) {
            return Err(ConfigError::Invalid(
                "SUPABASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let supabase_anon_key = required_trimmed(&lookup, "SUPABASE_ANON_KEY")?;

        let realtime_url = optional_trimmed(&lookup, "HERDSYNC_REALTIME_URL");
        if let Some(url) = &realtime_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::Invalid(
                    "HERDSYNC_REALTIME_URL must start with ws:// or wss://".to_string(),
                ));
            }
        }

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            realtime_url,
        })
    }

    /// PostgREST base URL
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    /// Endpoint probed for reachability
    pub fn health_url(&self) -> String {
        format!("{}/auth/v1/health", self.supabase_url)
    }

    /// Realtime websocket endpoint, including the API key and protocol version.
    pub fn realtime_endpoint(&self) -> String {
        let base = self.realtime_url.clone().unwrap_or_else(|| {
            let host = self
                .supabase_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{host}/realtime/v1/websocket")
        });
        format!(
            "{base}?apikey={}&vsn=1.0.0",
            urlencoding::encode(&self.supabase_anon_key)
        )
    }
}

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Replays before an operation is reported as permanently failed
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Lookup tables pulled within this window are skipped by full sync
    pub reference_ttl: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub commit_capacity: usize,
    /// Fixed tenant instead of the signed-in user's membership
    pub farm_id: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            reference_ttl: Duration::from_secs(24 * 60 * 60),
            probe_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(4),
            commit_capacity: 256,
            farm_id: None,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_retries = parse_or(&lookup, "HERDSYNC_MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid(
                "HERDSYNC_MAX_RETRIES must be >= 1".to_string(),
            ));
        }

        let backoff_base = Duration::from_millis(parse_or(
            &lookup,
            "HERDSYNC_BACKOFF_BASE_MS",
            millis(defaults.backoff_base),
        )?);
        let backoff_cap = Duration::from_secs(parse_or(
            &lookup,
            "HERDSYNC_BACKOFF_CAP_SECS",
            defaults.backoff_cap.as_secs(),
        )?);
        if backoff_cap < backoff_base {
            return Err(ConfigError::Invalid(
                "HERDSYNC_BACKOFF_CAP_SECS must not be below the backoff base".to_string(),
            ));
        }

        let reference_ttl = Duration::from_secs(parse_or(
            &lookup,
            "HERDSYNC_REFERENCE_TTL_SECS",
            defaults.reference_ttl.as_secs(),
        )?);
        let probe_interval = Duration::from_secs(parse_or(
            &lookup,
            "HERDSYNC_PROBE_INTERVAL_SECS",
            defaults.probe_interval.as_secs(),
        )?);
        if probe_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "HERDSYNC_PROBE_INTERVAL_SECS must be >= 1".to_string(),
            ));
        }
        let probe_timeout = Duration::from_millis(parse_or(
            &lookup,
            "HERDSYNC_PROBE_TIMEOUT_MS",
            millis(defaults.probe_timeout),
        )?);
        let commit_capacity = parse_or(
            &lookup,
            "HERDSYNC_COMMIT_CAPACITY",
            defaults.commit_capacity,
        )?;

        Ok(Self {
            max_retries,
            backoff_base,
            backoff_cap,
            reference_ttl,
            probe_interval,
            probe_timeout,
            commit_capacity: commit_capacity.max(1),
            farm_id: optional_trimmed(&lookup, "HERDSYNC_FARM_ID"),
        })
    }

    pub const fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.backoff_base,
            cap: self.backoff_cap,
            max_retries: self.max_retries,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match optional_trimmed(lookup, name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer"))),
        None => Ok(default),
    }
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
