//! Typed buffer access over the content store.

use crate::error::{PipelineError, PipelineResult};
use barge_core::{Buffer, ContentHash};
use barge_store::{ObjectStore, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::instrument;

/// Stores and fetches buffers as content-addressed blobs under a fixed
/// key prefix.
#[derive(Clone)]
pub struct BufferStore {
    store: Arc<dyn ObjectStore>,
}

impl BufferStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Object key for a buffer's content address.
    pub fn key(hash: &ContentHash) -> String {
        format!("buffers/{}", hash.to_hex())
    }

    /// Store a buffer under its content address. Idempotent: the same
    /// buffer stored twice writes once.
    #[instrument(skip(self, buffer), fields(group = %buffer.group, pieces = buffer.pieces.len()))]
    pub async fn store(&self, buffer: &Buffer) -> PipelineResult<ContentHash> {
        let bytes = buffer
            .encode()
            .map_err(|e| PipelineError::OperationFailed(e.to_string()))?;
        let hash = ContentHash::compute(&bytes);
        self.store
            .put_if_not_exists(&Self::key(&hash), Bytes::from(bytes))
            .await?;
        Ok(hash)
    }

    /// Fetch and decode a buffer by content address.
    #[instrument(skip(self))]
    pub async fn fetch(&self, hash: &ContentHash) -> PipelineResult<Buffer> {
        let bytes = match self.store.get(&Self::key(hash)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(PipelineError::NotFound(format!("buffer {hash}")));
            }
            Err(other) => return Err(other.into()),
        };
        Buffer::decode(&bytes)
            .map_err(|e| PipelineError::StoreFailed(format!("corrupt buffer {hash}: {e}")))
    }

    /// Check whether a buffer is already stored.
    pub async fn exists(&self, hash: &ContentHash) -> PipelineResult<bool> {
        Ok(self.store.exists(&Self::key(hash)).await?)
    }
}
