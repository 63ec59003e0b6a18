use std::io;

use herdsync_core::auth::AuthError;
use herdsync_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] herdsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Another {0} is already running")]
    AlreadyRunning(&'static str),
    #[error(
        "Backend is not configured. Run `herdsync config init` or set SUPABASE_URL and SUPABASE_ANON_KEY."
    )]
    BackendNotConfigured,
}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::MissingVar(_) => Self::BackendNotConfigured,
            ConfigError::Invalid(message) => Self::Config(message),
        }
    }
}

impl From<AuthError> for CliError {
    fn from(error: AuthError) -> Self {
        Self::Auth(error.to_string())
    }
}
