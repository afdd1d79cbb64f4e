//! Cascade delete.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::entity::{EntityKey, EntityRef, Reference};
use crate::error::{BackendError, CascadeStep, StorageError, StorageResult};
use crate::metadata::CascadeOperation;

use super::{CascadeResolver, io_error};

type Visited = HashSet<(String, EntityKey)>;

impl CascadeResolver {
    /// Deletes `root` and every entity reachable through fields that cascade
    /// `delete`. Returns the number of documents deleted.
    ///
    /// Targets are deleted before their owners and each entity at most once.
    /// Unresolved targets are loaded first so their own references can be
    /// followed. Missing targets are skipped. Instances without an
    /// identifier were never stored and are ignored.
    pub async fn cascade_delete(&self, root: &EntityRef) -> StorageResult<usize> {
        let mut visited = Visited::new();
        let mut deleted = 0;
        self.delete_node(Arc::clone(root), &mut visited, &mut deleted)
            .await?;
        Ok(deleted)
    }

    fn delete_node<'a>(
        &'a self,
        node: EntityRef,
        visited: &'a mut Visited,
        deleted: &'a mut usize,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let (descriptor, key) = {
                let instance = node.read();
                (Arc::clone(instance.descriptor()), instance.key())
            };
            let Some(key) = key else {
                debug!(entity = descriptor.name(), "Skipping delete of unsaved entity");
                return Ok(());
            };
            if !visited.insert((descriptor.name().to_string(), key.clone())) {
                return Ok(());
            }

            let mut loaded = Vec::new();
            let mut unresolved = Vec::new();
            {
                let instance = node.read();
                for field in descriptor.reference_fields() {
                    let Some(mapping) = field.reference() else {
                        continue;
                    };
                    if !mapping.allows(CascadeOperation::Delete) {
                        continue;
                    }
                    for reference in instance.references(field.name()) {
                        match reference {
                            Reference::Resolved(target) => loaded.push(Arc::clone(target)),
                            Reference::Unresolved(target_key) => {
                                unresolved.push((field.name().to_string(), target_key.clone()));
                            }
                            Reference::Absent(_) => {}
                        }
                    }
                }
            }

            for (field, target_key) in unresolved {
                let (_, mapping) = descriptor.require_reference(&field)?;
                let target = mapping.target(&self.registry)?;
                if visited.contains(&(target.name().to_string(), target_key.clone())) {
                    continue;
                }
                match self.load(&target, &target_key).await? {
                    Some(instance) => loaded.push(instance.into_ref()),
                    None => {
                        debug!(entity = target.name(), id = %target_key.id, "Skipping dangling reference");
                    }
                }
            }

            for target in loaded {
                self.delete_node(target, visited, deleted).await?;
            }

            let collection = self
                .router
                .route(&descriptor, key.split_key.as_deref())
                .await?;
            match self.store.delete_one(&collection, &key.id).await {
                Ok(()) => {
                    *deleted += 1;
                    debug!(entity = descriptor.name(), id = %key.id, collection = %collection, "Deleted entity");
                }
                Err(StorageError::Backend(BackendError::NotFound { .. })) => {
                    warn!(entity = descriptor.name(), id = %key.id, collection = %collection, "Entity already deleted");
                }
                Err(source) => {
                    return Err(io_error(&descriptor, &key.id, CascadeStep::Delete, &collection, source));
                }
            }
            node.write().set_persisted(false);
            Ok(())
        })
    }
}
