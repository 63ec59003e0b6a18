//! Supabase session persistence in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use herdsync_core::auth::{AuthResult, SessionPersistence, SupabaseAuthClient};
pub use herdsync_core::auth::{AuthError, AuthSession};
use herdsync_core::config::BackendConfig;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "herdsync-cli";

pub type CliAuthClient = SupabaseAuthClient<SessionStore>;

/// Keychain slot holding one profile's session.
#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("supabase_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard
            .get(&self.username)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(AuthError::from)
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> AuthResult<()> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

pub fn auth_client(profile_name: &str, backend: &BackendConfig) -> AuthResult<CliAuthClient> {
    SupabaseAuthClient::new(
        &backend.supabase_url,
        backend.supabase_anon_key.clone(),
        SessionStore::new(profile_name),
    )
}

pub fn load_stored_session(profile_name: &str) -> AuthResult<Option<AuthSession>> {
    SessionStore::new(profile_name).load_session()
}

pub fn clear_stored_session(profile_name: &str) -> AuthResult<()> {
    SessionStore::new(profile_name).clear_session()
}

#[cfg(test)]
mod tests {
    use herdsync_core::auth::AuthUser;

    use super::*;

    fn session(token: &str) -> AuthSession {
        AuthSession {
            access_token: token.to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 1_700_000_000,
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some("rancher@example.com".to_string()),
            },
        }
    }

    #[test]
    fn sessions_are_kept_per_profile() {
        let north = SessionStore::new("test-north");
        let south = SessionStore::new("test-south");
        north.save_session(&session("north-token")).unwrap();

        assert_eq!(
            load_stored_session("test-north")
                .unwrap()
                .map(|stored| stored.access_token),
            Some("north-token".to_string())
        );
        assert!(south.load_session().unwrap().is_none());

        clear_stored_session("test-north").unwrap();
        assert!(north.load_session().unwrap().is_none());
    }

    #[test]
    fn auth_client_uses_backend_url() {
        let backend = BackendConfig::new("https://ranch.supabase.co", "anon").unwrap();
        assert!(auth_client("test-client", &backend).is_ok());
    }
}
