//! Document store gateway.
//!
//! This module defines the [`DocumentStore`] trait, the narrow boundary to the
//! document database driver. The gateway makes no cascading or routing
//! decisions: it receives a physical collection name and a serialized
//! document and performs the raw operation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StorageResult;
use crate::metadata::ID_KEY;

/// A serialized document: an ordered field-value mapping.
pub type Document = Map<String, Value>;

/// A dynamically typed document store.
pub type DynStore = Arc<dyn DocumentStore>;

/// An equality filter. All conditions must hold.
///
/// A condition on a key holding an array matches when the array contains
/// the value, mirroring document database semantics.
///
/// # Example
///
/// ```
/// use helios_odm::core::Filter;
/// use serde_json::json;
///
/// let filter = Filter::new().eq("username", "ada").eq("active", true);
///
/// let doc = json!({"username": "ada", "active": true}).as_object().unwrap().clone();
/// assert!(filter.matches(&doc));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Creates a filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching the document with the given identifier.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_KEY, Value::String(id.into()))
    }

    /// Adds an equality condition.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Returns the conditions in insertion order.
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Returns `true` if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| match document.get(key) {
                Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
                Some(actual) => actual == expected,
                None => expected.is_null(),
            })
    }
}

/// Changes applied to one stored document by [`DocumentStore::update_one`].
///
/// Keys in `set` are written, keys in `unset` are removed. The identifier is
/// never touched, and keys named in neither are left as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    /// Keys to write.
    pub set: Document,
    /// Keys to remove.
    pub unset: Vec<String>,
}

impl DocumentUpdate {
    /// Creates an update writing the keys of `set`.
    pub fn set(set: Document) -> Self {
        Self {
            set,
            unset: Vec::new(),
        }
    }

    /// Adds a key to remove.
    pub fn unsetting(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    /// Applies the update to a document in place.
    pub fn apply_to(self, document: &mut Document) {
        for (key, value) in self.set {
            if key != ID_KEY {
                document.insert(key, value);
            }
        }
        for key in self.unset {
            if key != ID_KEY {
                document.remove(&key);
            }
        }
    }
}

/// Raw document operations against named physical collections.
///
/// Implementations wrap a document database driver. Every method takes the
/// already-routed physical collection name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns a human-readable name for this store.
    fn backend_name(&self) -> &'static str;

    /// Inserts a document and returns its identifier.
    ///
    /// If the document carries no `_id`, the store assigns one.
    ///
    /// # Errors
    ///
    /// * `BackendError::DuplicateKey` - If the identifier is already taken
    async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<String>;

    /// Returns the first document matching the filter.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StorageResult<Option<Document>>;

    /// Returns every document matching the filter, in insertion order.
    async fn find_many(&self, collection: &str, filter: &Filter) -> StorageResult<Vec<Document>>;

    /// Applies an update to the document with the given identifier.
    ///
    /// # Errors
    ///
    /// * `BackendError::NotFound` - If no such document exists
    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> StorageResult<()>;

    /// Deletes the document with the given identifier.
    ///
    /// # Errors
    ///
    /// * `BackendError::NotFound` - If no such document exists
    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()>;

    /// Creates a capped collection if it does not exist yet. Idempotent.
    async fn ensure_capped_collection(
        &self,
        collection: &str,
        size_bytes: u64,
        max_docs: Option<u64>,
    ) -> StorageResult<()>;

    /// Returns the document with the given identifier.
    async fn find_by_id(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        self.find_one(collection, &Filter::by_id(id)).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&doc(json!({"a": 1}))));
        assert!(Filter::new().is_empty());
    }

    #[test]
    fn test_conditions_are_anded() {
        let filter = Filter::new().eq("a", 1).eq("b", "x");
        assert!(filter.matches(&doc(json!({"a": 1, "b": "x"}))));
        assert!(!filter.matches(&doc(json!({"a": 1, "b": "y"}))));
        assert_eq!(filter.conditions().len(), 2);
    }

    #[test]
    fn test_array_membership() {
        let filter = Filter::new().eq("tags", "red");
        assert!(filter.matches(&doc(json!({"tags": ["blue", "red"]}))));
        assert!(!filter.matches(&doc(json!({"tags": ["blue"]}))));
    }

    #[test]
    fn test_missing_key_matches_null_only() {
        assert!(Filter::new().eq("a", Value::Null).matches(&doc(json!({}))));
        assert!(!Filter::new().eq("a", 1).matches(&doc(json!({}))));
    }

    #[test]
    fn test_update_sets_and_unsets_but_keeps_id() {
        let mut stored = doc(json!({"_id": "a", "note": "old", "extra": 1}));
        let update = DocumentUpdate::set(doc(json!({"_id": "b", "name": "Ada"})))
            .unsetting("note")
            .unsetting("_id");
        update.apply_to(&mut stored);
        assert_eq!(stored, doc(json!({"_id": "a", "extra": 1, "name": "Ada"})));
    }

    #[test]
    fn test_by_id() {
        let filter = Filter::by_id("abc");
        assert!(filter.matches(&doc(json!({"_id": "abc"}))));
        assert!(!filter.matches(&doc(json!({"_id": "abd"}))));
    }
}
