//! Store wrappers for failure injection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use helios_odm::backends::memory::MemoryStore;
use helios_odm::error::{BackendError, StorageError, StorageResult};
use helios_odm::{Document, DocumentStore, DocumentUpdate, Filter};

/// Wraps a [`MemoryStore`] and fails or delays selected calls.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    fail_inserts_into: Option<String>,
    fail_reads_from: Option<String>,
    delay_reads_from: Option<(String, Duration)>,
    transient_conflicts: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert into `collection` fails with an unavailable backend.
    pub fn fail_inserts_into(mut self, collection: &str) -> Self {
        self.fail_inserts_into = Some(collection.to_string());
        self
    }

    /// Every read from `collection` fails with an unavailable backend.
    pub fn fail_reads_from(mut self, collection: &str) -> Self {
        self.fail_reads_from = Some(collection.to_string());
        self
    }

    /// Every read from `collection` sleeps first.
    pub fn delay_reads_from(mut self, collection: &str, delay: Duration) -> Self {
        self.delay_reads_from = Some((collection.to_string(), delay));
        self
    }

    /// The next `count` inserts fail with a transient conflict.
    pub fn transient_conflicts(self, count: u32) -> Self {
        self.transient_conflicts.store(count, Ordering::SeqCst);
        self
    }

    fn unavailable(collection: &str) -> StorageError {
        StorageError::Backend(BackendError::Unavailable {
            backend_name: "faulty".to_string(),
            message: format!("collection {collection} is down"),
        })
    }

    async fn before_read(&self, collection: &str) -> StorageResult<()> {
        if let Some((slow, delay)) = &self.delay_reads_from {
            if slow == collection {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.fail_reads_from.as_deref() == Some(collection) {
            return Err(Self::unavailable(collection));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<String> {
        if self.fail_inserts_into.as_deref() == Some(collection) {
            return Err(Self::unavailable(collection));
        }
        let remaining = self.transient_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Backend(BackendError::TransientConflict {
                message: "write conflict".to_string(),
            }));
        }
        self.inner.insert_one(collection, document).await
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StorageResult<Option<Document>> {
        self.before_read(collection).await?;
        self.inner.find_one(collection, filter).await
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        self.before_read(collection).await?;
        self.inner.find_many(collection, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> StorageResult<()> {
        self.inner.update_one(collection, id, update).await
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        self.inner.delete_one(collection, id).await
    }

    async fn ensure_capped_collection(
        &self,
        collection: &str,
        size_bytes: u64,
        max_docs: Option<u64>,
    ) -> StorageResult<()> {
        self.inner
            .ensure_capped_collection(collection, size_bytes, max_docs)
            .await
    }
}
