//! Cascade save.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::entity::{EntityRef, Reference, codec};
use crate::error::{CascadeError, CascadeStep, StorageResult};
use crate::metadata::CascadeOperation;

use super::{CascadeResolver, io_error};

/// The kind of save being cascaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOperation {
    /// Follows fields that cascade `create`.
    Create,
    /// Follows fields that cascade `update`.
    Update,
}

impl From<SaveOperation> for CascadeOperation {
    fn from(operation: SaveOperation) -> Self {
        match operation {
            SaveOperation::Create => CascadeOperation::Create,
            SaveOperation::Update => CascadeOperation::Update,
        }
    }
}

/// Store writes issued by one cascade save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Entities inserted.
    pub inserted: usize,
    /// Entities updated in place.
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

#[derive(Default)]
struct SaveState {
    visited: HashMap<(String, String), Visit>,
    stats: SaveStats,
}

impl CascadeResolver {
    /// Saves `root` and every entity reachable through fields that cascade
    /// the operation.
    ///
    /// Targets are saved before their owners so that owners store valid
    /// identifiers. Unsaved instances get a fresh identifier on entry, which
    /// lets a reference cycle store the identifier of an entity whose save is
    /// still in progress. Each entity is written at most once per call.
    /// Entities never persisted are inserted, others are updated.
    ///
    /// # Errors
    ///
    /// * `CascadeError::UnsavedReference` - A non-cascading field points at an
    ///   instance that has no identifier
    /// * `CascadeError::Io` - A store write failed
    pub async fn cascade_save(
        &self,
        root: &EntityRef,
        operation: SaveOperation,
    ) -> StorageResult<SaveStats> {
        let mut state = SaveState::default();
        self.save_node(Arc::clone(root), operation, &mut state)
            .await?;
        Ok(state.stats)
    }

    fn save_node<'a>(
        &'a self,
        node: EntityRef,
        operation: SaveOperation,
        state: &'a mut SaveState,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let (descriptor, id) = {
                let mut instance = node.write();
                if instance.id().is_none() {
                    instance.set_id(uuid::Uuid::new_v4().to_string());
                }
                let id = instance.id().unwrap_or_default().to_string();
                (Arc::clone(instance.descriptor()), id)
            };

            let visit_key = (descriptor.name().to_string(), id.clone());
            if let Some(visit) = state.visited.get(&visit_key) {
                if *visit == Visit::InProgress {
                    debug!(entity = descriptor.name(), id = %id, "Reference cycle, storing identifier only");
                }
                return Ok(());
            }
            state.visited.insert(visit_key.clone(), Visit::InProgress);

            let permission = CascadeOperation::from(operation);
            let mut cascaded = Vec::new();
            let mut stored_only = Vec::new();
            {
                let instance = node.read();
                for field in descriptor.reference_fields() {
                    let allows = field.reference().is_some_and(|m| m.allows(permission));
                    for reference in instance.references(field.name()) {
                        if let Reference::Resolved(target) = reference {
                            if allows {
                                cascaded.push(Arc::clone(target));
                            } else {
                                stored_only.push((field.name().to_string(), Arc::clone(target)));
                            }
                        }
                    }
                }
            }

            for target in cascaded {
                self.save_node(target, operation, state).await?;
            }

            for (field, target) in stored_only {
                let target = target.read_recursive();
                if target.id().is_none() {
                    return Err(CascadeError::UnsavedReference {
                        entity: descriptor.name().to_string(),
                        field,
                        target: target.descriptor().name().to_string(),
                        operation: permission.to_string(),
                    }
                    .into());
                }
            }

            let (document, split_key, persisted) = {
                let instance = node.read();
                (
                    codec::encode(&instance, &self.registry)?,
                    instance.split_key(),
                    instance.is_persisted(),
                )
            };
            let collection = self
                .router
                .route(&descriptor, split_key.as_deref())
                .await?;

            let step = if persisted {
                self.store
                    .update_one(&collection, &id, codec::update_for(&descriptor, document))
                    .await
                    .map_err(|e| io_error(&descriptor, &id, CascadeStep::Update, &collection, e))?;
                state.stats.updated += 1;
                CascadeStep::Update
            } else {
                self.store
                    .insert_one(&collection, document)
                    .await
                    .map_err(|e| io_error(&descriptor, &id, CascadeStep::Insert, &collection, e))?;
                state.stats.inserted += 1;
                CascadeStep::Insert
            };

            node.write().set_persisted(true);
            state.visited.insert(visit_key, Visit::Done);
            debug!(entity = descriptor.name(), id = %id, collection = %collection, %step, "Saved entity");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::config::RoutingConfig;
    use crate::entity::EntityInstance;
    use crate::error::StorageError;
    use crate::metadata::{CascadePermissions, Entity, EntityDeclaration, MetadataRegistry};
    use crate::routing::CollectionRouter;

    struct Author;
    impl Entity for Author {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Author").scalar("name")
        }
    }

    struct Book;
    impl Entity for Book {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Book")
                .scalar("title")
                .reference::<Author>("author", CascadePermissions::all())
                .reference::<Author>("editor", CascadePermissions::none())
        }
    }

    fn create_resolver() -> (CascadeResolver, Arc<MetadataRegistry>, Arc<MemoryStore>) {
        let registry = Arc::new(MetadataRegistry::new());
        registry.register::<Book>().register::<Author>();
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(CollectionRouter::new(RoutingConfig::default(), store.clone()).unwrap());
        let resolver = CascadeResolver::new(Arc::clone(&registry), router, store.clone());
        (resolver, registry, store)
    }

    #[tokio::test]
    async fn test_target_saved_before_owner() {
        let (resolver, registry, store) = create_resolver();
        let author = EntityInstance::new(registry.describe::<Author>().unwrap())
            .with("name", json!("Le Guin"))
            .unwrap()
            .into_ref();
        let mut book = EntityInstance::new(registry.describe::<Book>().unwrap());
        book.set_reference("author", &author).unwrap();
        let book = book.into_ref();

        let stats = resolver.cascade_save(&book, SaveOperation::Create).await.unwrap();
        assert_eq!(stats, SaveStats { inserted: 2, updated: 0 });

        let author_id = author.read().id().unwrap().to_string();
        let stored = store.documents("Book");
        assert_eq!(stored[0]["author"]["$id"], json!(author_id));
        assert!(book.read().is_persisted());
    }

    #[tokio::test]
    async fn test_second_save_updates() {
        let (resolver, registry, store) = create_resolver();
        let book = EntityInstance::new(registry.describe::<Book>().unwrap()).into_ref();
        resolver.cascade_save(&book, SaveOperation::Create).await.unwrap();
        book.write().set("title", json!("Changed")).unwrap();

        let stats = resolver.cascade_save(&book, SaveOperation::Update).await.unwrap();
        assert_eq!(stats, SaveStats { inserted: 0, updated: 1 });
        assert_eq!(store.documents("Book")[0]["title"], "Changed");
        assert_eq!(store.len("Book"), 1);
    }

    #[tokio::test]
    async fn test_non_cascading_unsaved_target_fails() {
        let (resolver, registry, store) = create_resolver();
        let editor = EntityInstance::new(registry.describe::<Author>().unwrap()).into_ref();
        let mut book = EntityInstance::new(registry.describe::<Book>().unwrap());
        book.set_reference("editor", &editor).unwrap();

        let err = resolver
            .cascade_save(&book.into_ref(), SaveOperation::Create)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Cascade(CascadeError::UnsavedReference { ref field, .. }) if field == "editor"
        ));
        assert_eq!(store.counts().inserts, 0);
    }

    #[tokio::test]
    async fn test_non_cascading_saved_target_is_not_written() {
        let (resolver, registry, store) = create_resolver();
        let editor = EntityInstance::new(registry.describe::<Author>().unwrap())
            .with_id("a-9")
            .into_ref();
        let mut book = EntityInstance::new(registry.describe::<Book>().unwrap());
        book.set_reference("editor", &editor).unwrap();

        resolver
            .cascade_save(&book.into_ref(), SaveOperation::Create)
            .await
            .unwrap();
        assert_eq!(store.len("Author"), 0);
        assert_eq!(store.documents("Book")[0]["editor"]["$id"], "a-9");
    }
}
