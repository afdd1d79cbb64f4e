//! In-process document store.
//!
//! Keeps collections in memory behind a single lock. Intended for tests and
//! for embedding callers that do not need durability. Every operation is
//! counted so callers can assert how many store round-trips an operation
//! issued.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::core::{Document, DocumentStore, DocumentUpdate, Filter};
use crate::error::{BackendError, StorageResult};
use crate::metadata::{CappedSpec, ID_KEY};

const BACKEND_NAME: &str = "memory";

#[derive(Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    capped: Option<CappedSpec>,
}

impl MemoryCollection {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|doc| doc.get(ID_KEY).and_then(Value::as_str) == Some(id))
    }

    /// Drops the oldest documents until the capped limits hold.
    fn evict(&mut self) {
        let Some(capped) = self.capped else {
            return;
        };
        if let Some(max_docs) = capped.max_docs {
            while self.documents.len() as u64 > max_docs {
                self.documents.remove(0);
            }
        }
        while self.documents.len() > 1 && self.size_bytes() > capped.size_bytes {
            self.documents.remove(0);
        }
    }

    fn size_bytes(&self) -> u64 {
        self.documents
            .iter()
            .map(|doc| serde_json::to_vec(doc).map(|v| v.len() as u64).unwrap_or(0))
            .sum()
    }
}

/// Snapshot of the operations a [`MemoryStore`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    /// `insert_one` calls.
    pub inserts: u64,
    /// `find_one` and `find_many` calls.
    pub reads: u64,
    /// `update_one` calls.
    pub updates: u64,
    /// `delete_one` calls.
    pub deletes: u64,
    /// `ensure_capped_collection` calls.
    pub capped_ensures: u64,
}

#[derive(Default)]
struct Counters {
    inserts: AtomicU64,
    reads: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    capped_ensures: AtomicU64,
}

/// An in-memory [`DocumentStore`].
///
/// # Example
///
/// ```
/// use helios_odm::backends::memory::MemoryStore;
/// use helios_odm::core::{DocumentStore, Filter};
/// use serde_json::json;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let doc = json!({"username": "ada"}).as_object().unwrap().clone();
/// let id = store.insert_one("users", doc).await.unwrap();
///
/// let found = store.find_by_id("users", &id).await.unwrap().unwrap();
/// assert_eq!(found["username"], "ada");
/// assert_eq!(store.counts().inserts, 1);
/// # });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    counters: Counters,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("collections", &self.collection_names())
            .field("counts", &self.counts())
            .finish()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operation counts served so far.
    pub fn counts(&self) -> OperationCounts {
        OperationCounts {
            inserts: self.counters.inserts.load(Ordering::SeqCst),
            reads: self.counters.reads.load(Ordering::SeqCst),
            updates: self.counters.updates.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            capped_ensures: self.counters.capped_ensures.load(Ordering::SeqCst),
        }
    }

    /// Returns the names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns a copy of every document in a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    /// Returns the capped limits of a collection, if it is capped.
    pub fn capped_spec(&self, collection: &str) -> Option<CappedSpec> {
        self.collections.read().get(collection).and_then(|c| c.capped)
    }

    /// Removes every collection. Counters are kept.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> StorageResult<String> {
        self.counters.inserts.fetch_add(1, Ordering::SeqCst);

        let id = match document.get(ID_KEY) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => {
                return Err(BackendError::SerializationError {
                    message: format!("{ID_KEY} must be a string, got {other}"),
                }
                .into());
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                document.insert(ID_KEY.to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if target.position(&id).is_some() {
            return Err(BackendError::DuplicateKey {
                collection: collection.to_string(),
                id,
            }
            .into());
        }
        target.documents.push(document);
        target.evict();
        Ok(id)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StorageResult<Option<Document>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.collections.read().get(collection).and_then(|c| {
            c.documents.iter().find(|doc| filter.matches(doc)).cloned()
        }))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> StorageResult<()> {
        self.counters.updates.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.write();
        let not_found = || BackendError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let target = collections.get_mut(collection).ok_or_else(not_found)?;
        let index = target.position(id).ok_or_else(not_found)?;
        update.apply_to(&mut target.documents[index]);
        Ok(())
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.write();
        let not_found = || BackendError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let target = collections.get_mut(collection).ok_or_else(not_found)?;
        let index = target.position(id).ok_or_else(not_found)?;
        target.documents.remove(index);
        Ok(())
    }

    async fn ensure_capped_collection(
        &self,
        collection: &str,
        size_bytes: u64,
        max_docs: Option<u64>,
    ) -> StorageResult<()> {
        self.counters.capped_ensures.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if target.capped.is_none() {
            debug!(collection, size_bytes, ?max_docs, "Created capped collection");
            target.capped = Some(CappedSpec {
                size_bytes,
                max_docs,
            });
            target.evict();
        }
        Ok(())
    }
}
