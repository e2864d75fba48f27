//! Token Storage
//!
//! Storage port for the durable copy of the token record, with in-memory,
//! file-backed and mock implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::StorageError;
use crate::types::TokenRecord;

/// Token storage interface.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Persist a record under `key`, replacing any previous record.
    async fn save(&self, record: &TokenRecord, key: &str) -> Result<(), StorageError>;

    /// Load the record stored under `key`; [`StorageError::NotFound`] when absent.
    async fn load(&self, key: &str) -> Result<TokenRecord, StorageError>;

    /// Delete the record stored under `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory token storage implementation.
pub struct InMemoryTokenStorage {
    tokens: Mutex<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenStorage {
    /// Create new in-memory token storage.
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn tokens(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TokenRecord>>, StorageError> {
        self.tokens.lock().map_err(|e| StorageError::ReadFailed {
            message: e.to_string(),
        })
    }
}

impl Default for InMemoryTokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn save(&self, record: &TokenRecord, key: &str) -> Result<(), StorageError> {
        self.tokens()?.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<TokenRecord, StorageError> {
        self.tokens()?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.tokens()?.remove(key);
        Ok(())
    }
}

/// File-backed token storage: one JSON document per key inside a directory.
///
/// Writes go to an owner-only temp file in the same directory which is then
/// renamed over the target, so readers never observe a partially written
/// record. An abandoned temp file is removed when its handle drops.
pub struct FileTokenStorage {
    dir: PathBuf,
}

impl FileTokenStorage {
    /// Store records under `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn io_error(path: &Path, error: std::io::Error, wrap: fn(String) -> StorageError) -> StorageError {
    match error.kind() {
        ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            path: path.display().to_string(),
        },
        _ => wrap(format!("{}: {}", path.display(), error)),
    }
}

fn write_failed(message: String) -> StorageError {
    StorageError::WriteFailed { message }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e, write_failed))?;

    // Created with mode 0600 on unix and unlinked on drop unless persisted.
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e, write_failed))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| io_error(tmp.path(), e, write_failed))?;
    tmp.persist(path)
        .map_err(|e| io_error(path, e.error, write_failed))?;

    Ok(())
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn save(&self, record: &TokenRecord, key: &str) -> Result<(), StorageError> {
        let bytes = record.encode().map_err(|e| StorageError::WriteFailed {
            message: e.to_string(),
        })?;

        let dir = self.dir.clone();
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?
    }

    async fn load(&self, key: &str) -> Result<TokenRecord, StorageError> {
        let path = self.path_for(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => {
                return Err(io_error(&path, e, |message| StorageError::ReadFailed {
                    message,
                }))
            }
        };

        TokenRecord::decode(&bytes).map_err(|e| StorageError::Corrupted {
            message: e.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e, |message| StorageError::DeleteFailed {
                message,
            })),
        }
    }
}

/// Mock token storage for testing.
#[derive(Default)]
pub struct MockTokenStorage {
    tokens: Mutex<HashMap<String, TokenRecord>>,
    save_history: Mutex<Vec<(String, TokenRecord)>>,
    load_history: Mutex<Vec<String>>,
    delete_history: Mutex<Vec<String>>,
    save_error: Mutex<Option<StorageError>>,
    load_error: Mutex<Option<StorageError>>,
    delete_error: Mutex<Option<StorageError>>,
    save_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockTokenStorage {
    /// Create new mock token storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record.
    pub fn add_tokens(&self, key: &str, record: TokenRecord) -> &Self {
        self.tokens.lock().unwrap().insert(key.to_string(), record);
        self
    }

    /// Fail every save with `error` (or stop failing with `None`).
    pub fn set_save_error(&self, error: Option<StorageError>) -> &Self {
        *self.save_error.lock().unwrap() = error;
        self
    }

    /// Fail every load with `error` (or stop failing with `None`).
    pub fn set_load_error(&self, error: Option<StorageError>) -> &Self {
        *self.load_error.lock().unwrap() = error;
        self
    }

    /// Fail every delete with `error` (or stop failing with `None`).
    pub fn set_delete_error(&self, error: Option<StorageError>) -> &Self {
        *self.delete_error.lock().unwrap() = error;
        self
    }

    /// Make each save wait for a notification on `gate` before completing.
    pub fn set_save_gate(&self, gate: Option<Arc<Notify>>) -> &Self {
        *self.save_gate.lock().unwrap() = gate;
        self
    }

    /// Stored record for `key`, bypassing history and failure switches.
    pub fn stored(&self, key: &str) -> Option<TokenRecord> {
        self.tokens.lock().unwrap().get(key).cloned()
    }

    /// Get save history.
    pub fn get_save_history(&self) -> Vec<(String, TokenRecord)> {
        self.save_history.lock().unwrap().clone()
    }

    /// Get load history.
    pub fn get_load_history(&self) -> Vec<String> {
        self.load_history.lock().unwrap().clone()
    }

    /// Get delete history.
    pub fn get_delete_history(&self) -> Vec<String> {
        self.delete_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenStorage for MockTokenStorage {
    async fn save(&self, record: &TokenRecord, key: &str) -> Result<(), StorageError> {
        self.save_history
            .lock()
            .unwrap()
            .push((key.to_string(), record.clone()));

        let gate = self.save_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.save_error.lock().unwrap().clone() {
            return Err(error);
        }

        self.tokens
            .lock()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<TokenRecord, StorageError> {
        self.load_history.lock().unwrap().push(key.to_string());

        if let Some(error) = self.load_error.lock().unwrap().clone() {
            return Err(error);
        }

        self.tokens
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_history.lock().unwrap().push(key.to_string());

        if let Some(error) = self.delete_error.lock().unwrap().clone() {
            return Err(error);
        }

        self.tokens.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Create in-memory token storage.
pub fn create_in_memory_token_storage() -> InMemoryTokenStorage {
    InMemoryTokenStorage::new()
}

/// Create mock token storage for testing.
pub fn create_mock_token_storage() -> MockTokenStorage {
    MockTokenStorage::new()
}
