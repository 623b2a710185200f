// Credential persistence
// A single opaque bearer token under a well-known key

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};

use super::types::TOKEN_KEY;

/// Synchronous storage for the one credential the client holds.
///
/// Implementations never validate the token; failures are handled inside the
/// store so callers always see a value or its absence.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str);
    fn clear(&self);
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set(&self, token: &str) {
        *self.token.write() = Some(token.to_string());
    }

    fn clear(&self) {
        *self.token.write() = None;
    }
}

/// Credential store backed by a key/value table in a local SQLite file
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    path: PathBuf,
}

impl SqliteCredentialStore {
    /// Open (and create if needed) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let store = Self { path };
        store.connect()?;
        tracing::debug!("Credential store ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(&self.path).with_context(|| {
            format!("Failed to open SQLite database: {}", self.path.display())
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(conn)
    }

    fn load(&self) -> Result<Option<String>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT value FROM auth_kv WHERE key = ?",
            [TOKEN_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to load token from SQLite")
    }

    fn save(&self, token: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [TOKEN_KEY, token],
        )
        .context("Failed to save token to SQLite")?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM auth_kv WHERE key = ?", [TOKEN_KEY])
            .context("Failed to delete token from SQLite")?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self) -> Option<String> {
        match self.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Credential read failed, treating as absent: {:#}", e);
                None
            }
        }
    }

    fn set(&self, token: &str) {
        if let Err(e) = self.save(token) {
            tracing::error!("Credential write failed: {:#}", e);
        }
    }

    fn clear(&self) {
        if let Err(e) = self.delete() {
            tracing::error!("Credential removal failed: {:#}", e);
        }
    }
}
