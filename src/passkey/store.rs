//! Credential persistence
//!
//! [`CredentialStore`] enforces the credential invariants (unique ids per
//! principal, counter never regressing once non-zero) on top of a
//! [`BlobStore`], which only knows how to keep opaque text values. Each
//! principal's credentials are one JSON array under the `credentials` key.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use ring::digest;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use super::session::Principal;
use crate::error::{ErrorKind, PasskeyError, Result};
use crate::utils::crypto;
use crate::webauthn::encoding;

const CREDENTIALS_KEY: &str = "credentials";
const USER_HANDLE_KEY: &str = "user_handle";
const ACTIVATE_KEY: &str = "activate";
const INDEX_NAMESPACE: &str = "_index";
const USER_HANDLE_LEN: usize = 16;

/// Key/value persistence for opaque per-principal blobs
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// # Errors
    /// Returns `StorageUnavailable` if the backend cannot be read
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// # Errors
    /// Returns `StorageUnavailable` if the backend cannot be written
    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Remove a value; absence is not an error
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend cannot be written
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
}

/// In-process blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.values
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Blob store keeping one JSON file per value under a root directory
///
/// Layout: `<root>/<base64url(sha256(namespace))>/<base64url(sha256(key))>.json`,
/// so path components stay 43 characters whatever the principal's length.
/// Writes go to a temporary file first and are renamed into place.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, namespace: &str) -> PathBuf {
        self.root.join(path_component(namespace))
    }

    fn file_name(key: &str) -> String {
        format!("{}.json", path_component(key))
    }
}

fn path_component(name: &str) -> String {
    encoding::encode(digest::digest(&digest::SHA256, name.as_bytes()).as_ref())
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let path = self.dir(namespace).join(Self::file_name(key));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(PasskeyError::storage(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let dir = self.dir(namespace);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            PasskeyError::storage(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let file_name = Self::file_name(key);
        let target = dir.join(&file_name);
        let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&temp, value).await.map_err(|e| {
            PasskeyError::storage(format!("Failed to write {}: {e}", temp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PasskeyError::storage(format!(
                "Failed to replace {}: {e}",
                target.display()
            )));
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.dir(namespace).join(Self::file_name(key));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(PasskeyError::storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

/// A registered passkey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(rename = "id", with = "encoding::bytes")]
    pub credential_id: Vec<u8>,
    pub name: String,
    /// COSE-encoded public key
    #[serde(with = "encoding::bytes")]
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    #[serde(
        default,
        with = "encoding::optional_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_handle: Option<Vec<u8>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_format: Option<String>,
}

/// Credential fields that may leave the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub created: i64,
    pub last_used: Option<i64>,
}

impl From<&CredentialRecord> for CredentialSummary {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            id: encoding::encode(&record.credential_id),
            name: record.name.clone(),
            created: record.created.timestamp(),
            last_used: record.last_used.map(|at| at.timestamp()),
        }
    }
}

/// Per-principal credential sets over a [`BlobStore`]
///
/// Every read-modify-write for a principal runs under that principal's lock,
/// so saves and counter updates are atomic with respect to each other.
pub struct CredentialStore {
    backend: Arc<dyn BlobStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, principal: &Principal) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds an idle lock
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(principal.as_str().to_string()).or_default())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn load(&self, principal: &Principal) -> Result<Vec<CredentialRecord>> {
        match self.backend.get(principal.as_str(), CREDENTIALS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).map_err(|e| {
                error!("Corrupt credential data for {principal}: {e}");
                PasskeyError::storage(format!("Corrupt credential data for {principal}: {e}"))
            }),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                error!("Credential storage read failed for {principal}: {e}");
                Err(e)
            }
        }
    }

    async fn persist(&self, principal: &Principal, records: &[CredentialRecord]) -> Result<()> {
        let json = serde_json::to_string(records)
            .map_err(|e| PasskeyError::storage(format!("Failed to serialize credentials: {e}")))?;
        self.backend
            .put(principal.as_str(), CREDENTIALS_KEY, &json)
            .await
            .inspect_err(|e| error!("Credential storage write failed for {principal}: {e}"))
    }

    /// Look up a credential by its raw id (exact byte match)
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn find_by_credential_id(
        &self,
        principal: &Principal,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>> {
        Ok(self
            .load(principal)
            .await?
            .into_iter()
            .find(|record| record.credential_id == credential_id))
    }

    /// All credentials of a principal, in registration order
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn list_for_principal(&self, principal: &Principal) -> Result<Vec<CredentialRecord>> {
        self.load(principal).await
    }

    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn has_credentials(&self, principal: &Principal) -> Result<bool> {
        Ok(!self.load(principal).await?.is_empty())
    }

    /// Insert a new credential
    ///
    /// # Errors
    /// - `Conflict` if the principal already has a credential with this id
    /// - `StorageUnavailable` if the backend fails
    pub async fn save(&self, principal: &Principal, record: CredentialRecord) -> Result<()> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        let mut records = self.load(principal).await?;
        if records
            .iter()
            .any(|existing| existing.credential_id == record.credential_id)
        {
            return Err(PasskeyError::new(
                ErrorKind::Conflict,
                format!(
                    "Credential {} already registered for {principal}",
                    encoding::encode(&record.credential_id)
                ),
            ));
        }
        records.push(record);
        self.persist(principal, &records).await
    }

    /// Store a new signature counter and last-used time
    ///
    /// # Errors
    /// - `NotFound` if the credential does not exist
    /// - `ReplayDetected` if the counter would go down from a non-zero value
    /// - `StorageUnavailable` if the backend fails
    pub async fn update_counter(
        &self,
        principal: &Principal,
        credential_id: &[u8],
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        self.apply_counter(principal, credential_id, None, new_counter, used_at)
            .await
    }

    /// Like [`Self::update_counter`], but only if the stored counter still
    /// equals `expected`
    ///
    /// # Errors
    /// Same as [`Self::update_counter`]; a stored counter other than
    /// `expected` is reported as `ReplayDetected`
    pub async fn update_counter_from(
        &self,
        principal: &Principal,
        credential_id: &[u8],
        expected: u32,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        self.apply_counter(principal, credential_id, Some(expected), new_counter, used_at)
            .await
    }

    async fn apply_counter(
        &self,
        principal: &Principal,
        credential_id: &[u8],
        expected: Option<u32>,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        let mut records = self.load(principal).await?;
        let record = records
            .iter_mut()
            .find(|record| record.credential_id == credential_id)
            .ok_or_else(|| {
                PasskeyError::new(
                    ErrorKind::NotFound,
                    format!("Unknown credential {}", encoding::encode(credential_id)),
                )
            })?;

        if let Some(expected) = expected {
            if record.sign_count != expected {
                warn!(
                    "Counter for credential {} changed concurrently ({} != {expected})",
                    encoding::encode(credential_id),
                    record.sign_count
                );
                return Err(PasskeyError::new(
                    ErrorKind::ReplayDetected,
                    format!(
                        "Stored counter {} no longer matches {expected}",
                        record.sign_count
                    ),
                ));
            }
        }

        if record.sign_count != 0 && new_counter < record.sign_count {
            return Err(PasskeyError::new(
                ErrorKind::ReplayDetected,
                format!(
                    "Counter would decrease from {} to {new_counter}",
                    record.sign_count
                ),
            ));
        }

        record.sign_count = new_counter;
        record.last_used = Some(used_at);
        self.persist(principal, &records).await
    }

    /// Remove a credential; returns whether it existed
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn remove(&self, principal: &Principal, credential_id: &[u8]) -> Result<bool> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        let mut records = self.load(principal).await?;
        let before = records.len();
        records.retain(|record| record.credential_id != credential_id);
        if records.len() == before {
            debug!(
                "Credential {} not present for {principal}",
                encoding::encode(credential_id)
            );
            return Ok(false);
        }
        self.persist(principal, &records).await?;
        info!(
            "Removed credential {} for {principal}",
            encoding::encode(credential_id)
        );
        Ok(true)
    }

    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails or the value is corrupt
    pub async fn user_handle(&self, principal: &Principal) -> Result<Option<Vec<u8>>> {
        match self.backend.get(principal.as_str(), USER_HANDLE_KEY).await? {
            Some(text) => encoding::decode("user_handle", &text)
                .map(Some)
                .map_err(|e| PasskeyError::storage(format!("Corrupt user handle: {e}"))),
            None => Ok(None),
        }
    }

    /// Return the principal's user handle, creating and indexing one if needed
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend or the random source fails
    pub async fn get_or_create_user_handle(&self, principal: &Principal) -> Result<Vec<u8>> {
        let lock = self.lock_for(principal);
        let _guard = lock.lock().await;

        if let Some(handle) = self.user_handle(principal).await? {
            return Ok(handle);
        }

        let handle = crypto::random_bytes(USER_HANDLE_LEN)
            .map_err(|e| PasskeyError::storage(e.to_string()))?;
        let encoded = encoding::encode(&handle);
        self.backend
            .put(INDEX_NAMESPACE, &index_key(&encoded), principal.as_str())
            .await?;
        self.backend
            .put(principal.as_str(), USER_HANDLE_KEY, &encoded)
            .await?;
        debug!("Created user handle for {principal}");
        Ok(handle)
    }

    /// Find the principal owning a user handle
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn resolve_user_handle(&self, user_handle: &[u8]) -> Result<Option<Principal>> {
        let key = index_key(&encoding::encode(user_handle));
        match self.backend.get(INDEX_NAMESPACE, &key).await? {
            Some(name) => Principal::new(name)
                .map(Some)
                .map_err(|e| PasskeyError::storage(format!("Corrupt user handle index: {e}"))),
            None => Ok(None),
        }
    }

    /// The principal's stored activation flag, if it was ever set
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn activation(&self, principal: &Principal) -> Result<Option<bool>> {
        Ok(self
            .backend
            .get(principal.as_str(), ACTIVATE_KEY)
            .await?
            .map(|value| value.trim() == "true"))
    }

    /// # Errors
    /// Returns `StorageUnavailable` if the backend fails
    pub async fn set_activation(&self, principal: &Principal, active: bool) -> Result<()> {
        self.backend
            .put(principal.as_str(), ACTIVATE_KEY, if active { "true" } else { "false" })
            .await
    }
}

fn index_key(encoded_handle: &str) -> String {
    format!("user_handle:{encoded_handle}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, FailingBlobStore};

    fn alice() -> Principal {
        Principal::new("alice").unwrap()
    }

    fn memory_store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryBlobStore::new()))
    }

    #[tokio::test]
    async fn test_save_find_list() {
        let store = memory_store();
        store.save(&alice(), sample_record(b"cred-1", 0)).await.unwrap();
        store.save(&alice(), sample_record(b"cred-2", 0)).await.unwrap();

        let found = store.find_by_credential_id(&alice(), b"cred-2").await.unwrap();
        assert_eq!(found.unwrap().credential_id, b"cred-2");
        assert!(store
            .find_by_credential_id(&alice(), b"cred-3")
            .await
            .unwrap()
            .is_none());

        let ids: Vec<_> = store
            .list_for_principal(&alice())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.credential_id)
            .collect();
        assert_eq!(ids, vec![b"cred-1".to_vec(), b"cred-2".to_vec()]);
    }

    #[tokio::test]
    async fn test_duplicate_save_conflicts() {
        let store = memory_store();
        store.save(&alice(), sample_record(b"cred-1", 0)).await.unwrap();
        let err = store
            .save(&alice(), sample_record(b"cred-1", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Same id under another principal is a separate credential set
        let bob = Principal::new("bob").unwrap();
        assert!(store.save(&bob, sample_record(b"cred-1", 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_counter_rules() {
        let store = memory_store();
        let now = Utc::now();
        store.save(&alice(), sample_record(b"cred-1", 0)).await.unwrap();

        let err = store
            .update_counter(&alice(), b"missing", 1, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        store.update_counter(&alice(), b"cred-1", 5, now).await.unwrap();
        let err = store
            .update_counter(&alice(), b"cred-1", 4, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayDetected);

        let record = store
            .find_by_credential_id(&alice(), b"cred-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.sign_count, 5);
        assert_eq!(record.last_used.map(|t| t.timestamp()), Some(now.timestamp()));
    }

    #[tokio::test]
    async fn test_update_counter_from_detects_concurrent_change() {
        let store = memory_store();
        let now = Utc::now();
        store.save(&alice(), sample_record(b"cred-1", 3)).await.unwrap();

        store
            .update_counter_from(&alice(), b"cred-1", 3, 4, now)
            .await
            .unwrap();
        let err = store
            .update_counter_from(&alice(), b"cred-1", 3, 4, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayDetected);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = memory_store();
        store.save(&alice(), sample_record(b"cred-1", 0)).await.unwrap();
        assert!(store.remove(&alice(), b"cred-1").await.unwrap());
        assert!(!store.remove(&alice(), b"cred-1").await.unwrap());
        assert!(!store.has_credentials(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn test_user_handle_is_stable_and_indexed() {
        let store = memory_store();
        let first = store.get_or_create_user_handle(&alice()).await.unwrap();
        let second = store.get_or_create_user_handle(&alice()).await.unwrap();
        assert_eq!(first.len(), USER_HANDLE_LEN);
        assert_eq!(first, second);
        assert_eq!(
            store.resolve_user_handle(&first).await.unwrap(),
            Some(alice())
        );
        assert_eq!(store.resolve_user_handle(b"unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activation_flag() {
        let store = memory_store();
        assert_eq!(store.activation(&alice()).await.unwrap(), None);
        store.set_activation(&alice(), true).await.unwrap();
        assert_eq!(store.activation(&alice()).await.unwrap(), Some(true));
        store.set_activation(&alice(), false).await.unwrap();
        assert_eq!(store.activation(&alice()).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CredentialStore::new(Arc::new(FileBlobStore::new(dir.path())));
            store.save(&alice(), sample_record(b"cred-1", 7)).await.unwrap();
        }
        let store = CredentialStore::new(Arc::new(FileBlobStore::new(dir.path())));
        let record = store
            .find_by_credential_id(&alice(), b"cred-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.sign_count, 7);
        assert!(store.remove(&alice(), b"cred-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backend_accepts_longest_principal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(Arc::new(FileBlobStore::new(dir.path())));
        let long = Principal::new("a".repeat(256)).unwrap();

        store.save(&long, sample_record(b"cred-1", 0)).await.unwrap();
        store.set_activation(&long, true).await.unwrap();
        let handle = store.get_or_create_user_handle(&long).await.unwrap();

        assert!(store.has_credentials(&long).await.unwrap());
        assert_eq!(store.activation(&long).await.unwrap(), Some(true));
        assert_eq!(store.resolve_user_handle(&handle).await.unwrap(), Some(long));
    }

    #[tokio::test]
    async fn test_idle_principal_locks_are_pruned() {
        let store = memory_store();
        for n in 0..50 {
            let principal = Principal::new(format!("user-{n}")).unwrap();
            store.save(&principal, sample_record(b"cred-1", 0)).await.unwrap();
        }
        assert_eq!(store.tracked_locks(), 1);

        let lock = store.lock_for(&alice());
        let _held = lock.lock().await;
        let bob = Principal::new("bob").unwrap();
        let _bob_lock = store.lock_for(&bob);
        assert_eq!(store.tracked_locks(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let store = CredentialStore::new(Arc::new(FailingBlobStore));
        let err = store.list_for_principal(&alice()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn test_record_json_layout() {
        let record = sample_record(b"cred-1", 2);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], encoding::encode(b"cred-1"));
        assert_eq!(value["signCount"], 2);
        assert!(value.get("publicKey").is_some());
        assert!(value["created"].is_i64());

        let summary = serde_json::to_value(CredentialSummary::from(&record)).unwrap();
        assert!(summary.get("publicKey").is_none());
        assert!(summary.get("userHandle").is_none());
        assert!(summary.get("lastUsed").is_some());
    }
}
