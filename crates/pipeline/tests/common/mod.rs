//! Pipeline test utilities: temp-backed stores and collaborator fakes.

use async_trait::async_trait;
use barge_pipeline::{Broker, BufferStore, DealOffer, DurableQueue, PipelineError, PipelineResult};
use barge_records::{RecordStore, SqliteStore};
use barge_store::FilesystemBackend;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// Records plus content store over temp directories, dropped together.
#[allow(dead_code)]
pub struct TestEnv {
    pub records: Arc<dyn RecordStore>,
    pub buffers: BufferStore,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let records = SqliteStore::new(temp_dir.path().join("records.db"))
            .await
            .expect("Failed to create record store");
        let backend = FilesystemBackend::new(temp_dir.path().join("objects"))
            .await
            .expect("Failed to create object store");

        Self {
            records: Arc::new(records),
            buffers: BufferStore::new(Arc::new(backend)),
            _temp_dir: temp_dir,
        }
    }
}

/// Broker fake that records offers and can be switched to fail.
#[derive(Default)]
pub struct MockBroker {
    pub offers: Mutex<Vec<DealOffer>>,
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn offer_count(&self) -> usize {
        self.offers.lock().unwrap().len()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn send_offer(&self, offer: &DealOffer) -> PipelineResult<u32> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::OperationFailed(
                "broker unavailable".to_string(),
            ));
        }
        let mut offers = self.offers.lock().unwrap();
        offers.push(offer.clone());
        Ok(offer.pieces.len() as u32)
    }
}

/// Queue fake that rejects every send.
pub struct FailingQueue;

#[async_trait]
impl DurableQueue for FailingQueue {
    async fn send(&self, _body: Bytes, _group: Option<&str>) -> PipelineResult<()> {
        Err(PipelineError::QueueFailed("queue unavailable".to_string()))
    }
}
