//! Persistence backends for session credentials.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;

pub mod file;
pub mod session;

pub use file::FileCredentialStore;
pub use session::{PersistedSession, SessionPersistence};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    #[error("credential not found")]
    NotFound,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Key/value credential storage addressed by `(service, account)`.
pub trait CredentialStore: Send + Sync {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError>;

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError>;

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        (**self).set_credential(service, account, value)
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        (**self).get_credential(service, account)
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        (**self).delete_credential(service, account)
    }
}

/// Process-local store, shared between clones. Used by tests and by hosts
/// that do not want sessions to outlive the process.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    services: Arc<RwLock<BTreeMap<String, BTreeMap<String, String>>>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(service.to_owned())
            .or_default()
            .insert(account.to_owned(), value.to_owned());
        Ok(())
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let accounts = services
            .get_mut(service)
            .ok_or(CredentialStoreError::NotFound)?;
        accounts
            .remove(account)
            .ok_or(CredentialStoreError::NotFound)?;
        if accounts.is_empty() {
            services.remove(service);
        }
        Ok(())
    }
}

/// Platform keychain backend (macOS Keychain, Windows Credential Manager,
/// Secret Service).
#[cfg(feature = "os-keyring")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl OsKeyringCredentialStore {
    fn entry(service: &str, account: &str) -> Result<keyring::Entry, CredentialStoreError> {
        keyring::Entry::new(service, account).map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialStore for OsKeyringCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        Self::entry(service, account)?
            .set_password(value)
            .map_err(map_keyring_error)
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        Self::entry(service, account)?
            .get_password()
            .map_err(map_keyring_error)
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        Self::entry(service, account)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> CredentialStoreError {
    match err {
        keyring::Error::NoEntry => CredentialStoreError::NotFound,
        keyring::Error::NoStorageAccess(inner) => {
            CredentialStoreError::Unavailable(inner.to_string())
        }
        other => CredentialStoreError::Backend(other.to_string()),
    }
}

/// Store view pinned to one service name, so several app tokens or
/// environments can share one backend.
#[derive(Clone)]
pub struct ScopedCredentialStore<S: CredentialStore> {
    inner: S,
    service: String,
}

impl<S: CredentialStore> ScopedCredentialStore<S> {
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn set(&self, account: &str, value: &str) -> Result<(), CredentialStoreError> {
        self.inner.set_credential(&self.service, account, value)
    }

    pub fn get(&self, account: &str) -> Result<String, CredentialStoreError> {
        self.inner.get_credential(&self.service, account)
    }

    pub fn delete(&self, account: &str) -> Result<(), CredentialStoreError> {
        self.inner.delete_credential(&self.service, account)
    }
}
