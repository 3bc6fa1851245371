// Credential resolution and secret storage
// Keeps passwords out of persisted connection profiles

mod store;

pub use store::{get_default_store_path, SqlitePasswordStore};

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Secret store errors. Kept separate from connectivity errors; drivers
/// translate them at their boundary without the secret content.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to get app data directory")]
    AppDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Background(String),
}

pub type SecretResult<T> = Result<T, SecretStoreError>;

/// Resolves a stored secret by opaque identifier.
///
/// A `None` identifier and a missing record both resolve to `Ok(None)`:
/// absence of a password is a valid state for some engines.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, identifier: Option<&str>) -> SecretResult<Option<String>>;
}

/// Persists secrets keyed by caller-chosen identifiers.
///
/// `store` has upsert semantics; `delete` is idempotent and succeeds
/// silently for unknown identifiers.
#[async_trait::async_trait]
pub trait PasswordStore: CredentialResolver {
    async fn store(&self, identifier: &str, secret: &str) -> SecretResult<()>;
    async fn delete(&self, identifier: &str) -> SecretResult<()>;
}

/// HashMap-backed store for tests and embedded use.
#[derive(Default)]
pub struct MemoryPasswordStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryPasswordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded store, handy in driver tests.
    pub fn with_secret(identifier: &str, secret: &str) -> Self {
        let store = Self::new();
        store
            .secrets
            .lock()
            .unwrap()
            .insert(identifier.to_string(), secret.to_string());
        store
    }
}

#[async_trait::async_trait]
impl CredentialResolver for MemoryPasswordStore {
    async fn resolve(&self, identifier: Option<&str>) -> SecretResult<Option<String>> {
        let Some(id) = identifier else {
            return Ok(None);
        };
        Ok(self.secrets.lock().unwrap().get(id).cloned())
    }
}

#[async_trait::async_trait]
impl PasswordStore for MemoryPasswordStore {
    async fn store(&self, identifier: &str, secret: &str) -> SecretResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(identifier.to_string(), secret.to_string());
        Ok(())
    }

    async fn delete(&self, identifier: &str) -> SecretResult<()> {
        self.secrets.lock().unwrap().remove(identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_none_identifier_resolves_to_no_secret() {
        let store = MemoryPasswordStore::new();
        assert!(store.resolve(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_record_resolves_to_no_secret() {
        let store = MemoryPasswordStore::new();
        assert!(store.resolve(Some("unknown")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_is_upsert() {
        let store = MemoryPasswordStore::new();
        store.store("conn-1", "first").await.unwrap();
        store.store("conn-1", "second").await.unwrap();

        let secret = store.resolve(Some("conn-1")).await.unwrap();
        assert_eq!(secret.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryPasswordStore::new();
        store.store("conn-1", "secret").await.unwrap();

        store.delete("conn-1").await.unwrap();
        store.delete("conn-1").await.unwrap();
        store.delete("never-existed").await.unwrap();

        assert!(store.resolve(Some("conn-1")).await.unwrap().is_none());
    }
}
