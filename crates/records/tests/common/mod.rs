//! Record store test utilities.

use barge_records::{RecordStore, RecordsResult, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A test record store wrapper that cleans up on drop.
pub struct TestRecords {
    pub store: Arc<dyn RecordStore>,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestRecords {
    /// Create a new test record store backed by a SQLite file.
    pub async fn new() -> RecordsResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path).await?;

        Ok(Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        })
    }

    /// Create a new in-memory SQLite store (faster for tests).
    pub async fn in_memory() -> RecordsResult<Self> {
        let store = SqliteStore::in_memory().await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: None,
        })
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }
}
