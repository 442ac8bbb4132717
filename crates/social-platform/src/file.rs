//! JSON file credential backend for hosts without a platform keychain.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::debug;

use crate::{CredentialStore, CredentialStoreError};

type CredentialMap = BTreeMap<String, BTreeMap<String, String>>;

/// Credentials kept in one JSON document keyed by service, then account.
///
/// Writes go through a temp file and a rename so a crash never leaves a
/// truncated document behind.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CredentialMap, CredentialStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(CredentialMap::new()),
            Err(err) => {
                return Err(CredentialStoreError::Unavailable(format!(
                    "failed reading credential file {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&raw).map_err(|err| {
            CredentialStoreError::Backend(format!(
                "failed parsing credential file {}: {err}",
                self.path.display()
            ))
        })
    }

    fn save(&self, map: &CredentialMap) -> Result<(), CredentialStoreError> {
        if map.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(CredentialStoreError::Backend(format!(
                    "failed deleting credential file {}: {err}",
                    self.path.display()
                ))),
            };
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                CredentialStoreError::Unavailable(format!(
                    "failed creating credential directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec_pretty(map)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            CredentialStoreError::Backend(format!(
                "failed writing temp credential file {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(CredentialStoreError::Backend(format!(
                        "failed replacing credential file {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                CredentialStoreError::Backend(format!(
                    "failed writing credential file {}: {err}",
                    self.path.display()
                ))
            })?;
        }

        debug!(path = %self.path.display(), "credential file updated");
        Ok(())
    }

    fn update<T>(
        &self,
        apply: impl FnOnce(&mut CredentialMap) -> Result<T, CredentialStoreError>,
    ) -> Result<T, CredentialStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        let mut map = self.load()?;
        let result = apply(&mut map)?;
        self.save(&map)?;
        Ok(result)
    }
}

impl CredentialStore for FileCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        self.update(|map| {
            map.entry(service.to_owned())
                .or_default()
                .insert(account.to_owned(), value.to_owned());
            Ok(())
        })
    }

    fn get_credential(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        self.load()?
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        self.update(|map| {
            let accounts = map
                .get_mut(service)
                .ok_or(CredentialStoreError::NotFound)?;
            accounts
                .remove(account)
                .ok_or(CredentialStoreError::NotFound)?;
            if accounts.is_empty() {
                map.remove(service);
            }
            Ok(())
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("credentials.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir().join(format!("social-client-{label}-{now_nanos}.json"))
    }

    #[test]
    fn file_store_round_trip() {
        let path = unique_temp_path("credentials");
        let store = FileCredentialStore::new(&path);

        store
            .set_credential("svc", "session-token", "tok-1")
            .expect("set should work");
        store
            .set_credential("svc", "current-user", "{}")
            .expect("set should work");

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(
            reopened
                .get_credential("svc", "session-token")
                .expect("get should work"),
            "tok-1"
        );

        reopened
            .delete_credential("svc", "session-token")
            .expect("delete should work");
        reopened
            .delete_credential("svc", "current-user")
            .expect("delete should work");
        assert_eq!(
            reopened.get_credential("svc", "session-token"),
            Err(CredentialStoreError::NotFound)
        );
        assert!(!path.exists(), "empty store removes its file");
    }

    #[test]
    fn missing_file_reads_as_not_found() {
        let store = FileCredentialStore::new(unique_temp_path("missing"));
        assert_eq!(
            store.get_credential("svc", "session-token"),
            Err(CredentialStoreError::NotFound)
        );
        assert_eq!(
            store.delete_credential("svc", "session-token"),
            Err(CredentialStoreError::NotFound)
        );
    }

    #[test]
    fn corrupt_file_is_a_backend_error() {
        let path = unique_temp_path("corrupt");
        fs::write(&path, "not json").expect("write fixture");
        let store = FileCredentialStore::new(&path);

        let err = store
            .get_credential("svc", "session-token")
            .expect_err("corrupt file must fail");
        assert!(matches!(err, CredentialStoreError::Backend(_)));
        let _ = fs::remove_file(&path);
    }
}
