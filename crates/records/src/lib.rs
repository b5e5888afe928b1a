//! Record tables for the barge aggregation pipeline.
//!
//! This crate provides the control-plane data model:
//! - Piece queue and pending inclusions
//! - Aggregates and their lifecycle states
//! - Deal records keyed by piece and deal id
//!
//! All state lives in the database; every mutation is a conditional write
//! or a transaction, so concurrent workers stay consistent without any
//! in-process locking.

pub mod error;
mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{RecordsError, RecordsResult};
pub use postgres::PostgresStore;
pub use repos::{AggregateRepo, DealRepo, PieceQueueRepo};
pub use store::{RecordStore, SqliteStore};

use barge_core::RecordsConfig;
use std::sync::Arc;

/// Create a record store from configuration.
pub async fn from_config(config: &RecordsConfig) -> RecordsResult<Arc<dyn RecordStore>> {
    match config {
        RecordsConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn RecordStore>)
        }
        RecordsConfig::Postgres {
            url,
            max_connections,
        } => {
            tracing::info!("connecting to PostgreSQL record store");
            let store = PostgresStore::new(url, *max_connections).await?;
            Ok(Arc::new(store) as Arc<dyn RecordStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("records.db");
        let config = RecordsConfig::Sqlite {
            path: db_path.clone(),
        };
        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
