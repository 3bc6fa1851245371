// SQLite-backed password store
// One table, upsert writes, idempotent deletes

use super::{CredentialResolver, PasswordStore, SecretResult, SecretStoreError};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Secret store persisted in a local SQLite database.
///
/// rusqlite is synchronous, so every operation runs on the blocking pool to
/// stay off the caller's async path.
pub struct SqlitePasswordStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqlitePasswordStore {
    /// Open (or create) the store at the given path.
    pub fn open(db_path: impl AsRef<Path>) -> SecretResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(db_path)?;
        Self::init_schema(&connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Open the store at the default app-data location.
    pub fn open_default() -> SecretResult<Self> {
        Self::open(get_default_store_path()?)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> SecretResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::init_schema(&connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    fn init_schema(connection: &Connection) -> SecretResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                identifier TEXT PRIMARY KEY,
                secret TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    async fn run_blocking<T, F>(&self, f: F) -> SecretResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let conn = connection.lock().unwrap();
            f(&conn).map_err(SecretStoreError::from)
        })
        .await
        .map_err(|e| SecretStoreError::Background(e.to_string()))?
    }
}

#[async_trait::async_trait]
impl CredentialResolver for SqlitePasswordStore {
    async fn resolve(&self, identifier: Option<&str>) -> SecretResult<Option<String>> {
        let Some(identifier) = identifier else {
            return Ok(None);
        };
        let identifier = identifier.to_string();

        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare("SELECT secret FROM secrets WHERE identifier = ?1")?;
            match stmt.query_row(params![identifier], |row| row.get(0)) {
                Ok(secret) => Ok(Some(secret)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl PasswordStore for SqlitePasswordStore {
    async fn store(&self, identifier: &str, secret: &str) -> SecretResult<()> {
        let identifier = identifier.to_string();
        let secret = secret.to_string();

        self.run_blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO secrets (identifier, secret, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(identifier) DO UPDATE SET
                    secret = excluded.secret,
                    updated_at = datetime('now')
                "#,
                params![identifier, secret],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, identifier: &str) -> SecretResult<()> {
        let identifier = identifier.to_string();

        // Deleting an unknown identifier is a silent success.
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM secrets WHERE identifier = ?1", params![identifier])?;
            Ok(())
        })
        .await
    }
}

/// Default store location in the app data directory.
pub fn get_default_store_path() -> SecretResult<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "sqlbridge", "sqlbridge")
        .ok_or(SecretStoreError::AppDataDir)?;

    Ok(proj_dirs.data_dir().join("secrets.db"))
}
