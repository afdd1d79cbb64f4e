//! Cascade resolution across object graphs.
//!
//! The [`CascadeResolver`] propagates save, fetch and delete operations from
//! a root instance to the entities it references, gated per field by the
//! field's [`CascadePermissions`](crate::metadata::CascadePermissions).
//!
//! # Operations
//!
//! | Operation | Traversal | Identity |
//! |-----------|-----------|----------|
//! | [`cascade_save`](CascadeResolver::cascade_save) | depth-first, targets before owners | visited set keyed by (entity, id) |
//! | [`cascade_fetch`](CascadeResolver::cascade_fetch) | worklist over a [`FetchPath`] | per-call cache keyed by (entity, key) |
//! | [`cascade_delete`](CascadeResolver::cascade_delete) | depth-first, targets before owners | visited set keyed by (entity, key) |
//! | [`resolve_lazy`](CascadeResolver::resolve_lazy) | one field, no further cascade | none |
//!
//! Sibling fields are processed sequentially in declaration order. A store
//! failure aborts the operation with `CascadeError::Io`; writes already made
//! are not rolled back. Wrap the call in
//! [`with_session`](crate::core::with_session) when atomicity is needed.

mod delete;
mod fetch;
mod path;
mod save;

use std::sync::Arc;

use crate::core::DynStore;
use crate::entity::{EntityInstance, EntityKey, codec};
use crate::error::{CascadeError, CascadeStep, StorageError, StorageResult};
use crate::metadata::{EntityDescriptor, MetadataRegistry};
use crate::routing::CollectionRouter;

pub use fetch::FetchStats;
pub use path::FetchPath;
pub use save::{SaveOperation, SaveStats};

/// Walks object graphs and issues the store calls a cascade requires.
pub struct CascadeResolver {
    registry: Arc<MetadataRegistry>,
    router: Arc<CollectionRouter>,
    store: DynStore,
}

impl CascadeResolver {
    /// Creates a resolver.
    pub fn new(
        registry: Arc<MetadataRegistry>,
        router: Arc<CollectionRouter>,
        store: DynStore,
    ) -> Self {
        Self {
            registry,
            router,
            store,
        }
    }

    /// Loads one entity by key, without resolving its references.
    pub(crate) async fn load(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        key: &EntityKey,
    ) -> StorageResult<Option<EntityInstance>> {
        let collection = self
            .router
            .route(descriptor, key.split_key.as_deref())
            .await?;
        let document = self
            .store
            .find_by_id(&collection, &key.id)
            .await
            .map_err(|source| io_error(descriptor, &key.id, CascadeStep::Fetch, &collection, source))?;
        document
            .map(|document| codec::decode(descriptor, &document, key.split_key.as_deref()))
            .transpose()
    }
}

impl std::fmt::Debug for CascadeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeResolver")
            .field("router", &self.router)
            .finish()
    }
}

fn io_error(
    descriptor: &EntityDescriptor,
    id: &str,
    step: CascadeStep,
    collection: &str,
    source: StorageError,
) -> StorageError {
    CascadeError::Io {
        entity: descriptor.name().to_string(),
        id: id.to_string(),
        step,
        collection: collection.to_string(),
        source: Box::new(source),
    }
    .into()
}
