use std::sync::Arc;

use social_core::{SocialError, User};
use tracing::{debug, warn};

use crate::{CredentialStore, CredentialStoreError, ScopedCredentialStore};

const SESSION_TOKEN_ACCOUNT: &str = "session-token";
const CURRENT_USER_ACCOUNT: &str = "current-user";

/// Session token and current user as restored at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub session_token: String,
    pub user: User,
}

/// Persists the authenticated session of one client context.
#[derive(Clone)]
pub struct SessionPersistence {
    store: ScopedCredentialStore<Arc<dyn CredentialStore>>,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn CredentialStore>, service: impl Into<String>) -> Self {
        Self {
            store: ScopedCredentialStore::new(store, service),
        }
    }

    /// Store the token and current user. The password is never persisted.
    pub fn save(&self, session_token: &str, user: &User) -> Result<(), SocialError> {
        let encoded = serde_json::to_string(&user.without_password())
            .map_err(|err| SocialError::serialization(err.to_string()))?;
        self.store
            .set(SESSION_TOKEN_ACCOUNT, session_token)
            .map_err(map_store_error)?;
        self.store
            .set(CURRENT_USER_ACCOUNT, &encoded)
            .map_err(map_store_error)?;
        debug!(service = self.store.service(), "persisted session");
        Ok(())
    }

    /// Load a complete persisted session, or `None` when nothing usable is stored.
    pub fn load(&self) -> Result<Option<PersistedSession>, SocialError> {
        let session_token = match self.store.get(SESSION_TOKEN_ACCOUNT) {
            Ok(token) => token,
            Err(CredentialStoreError::NotFound) => return Ok(None),
            Err(err) => return Err(map_store_error(err)),
        };
        let encoded = match self.store.get(CURRENT_USER_ACCOUNT) {
            Ok(encoded) => encoded,
            Err(CredentialStoreError::NotFound) => {
                warn!(
                    service = self.store.service(),
                    "session token persisted without current user; ignoring"
                );
                return Ok(None);
            }
            Err(err) => return Err(map_store_error(err)),
        };

        let user = serde_json::from_str::<User>(&encoded)
            .map_err(|err| SocialError::serialization(format!("persisted user: {err}")))?;
        Ok(Some(PersistedSession {
            session_token,
            user,
        }))
    }

    /// Remove everything persisted for the session; absent entries are fine.
    pub fn clear(&self) -> Result<(), SocialError> {
        for account in [SESSION_TOKEN_ACCOUNT, CURRENT_USER_ACCOUNT] {
            match self.store.delete(account) {
                Ok(()) | Err(CredentialStoreError::NotFound) => {}
                Err(err) => return Err(map_store_error(err)),
            }
        }
        Ok(())
    }
}

fn map_store_error(err: CredentialStoreError) -> SocialError {
    SocialError::storage(err.to_string())
}
