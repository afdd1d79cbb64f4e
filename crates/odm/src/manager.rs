//! Entity manager.
//!
//! [`EntityManager`] ties the registry, router, store, cascade resolver,
//! parallel coordinator and join assembler together behind one handle.

use std::future::Future;
use std::sync::Arc;

use tracing::instrument;

use crate::cascade::{CascadeResolver, FetchPath, FetchStats, SaveOperation, SaveStats};
use crate::config::OdmConfig;
use crate::core::{DynStore, Filter};
use crate::entity::{EntityInstance, EntityKey, EntityRef, FieldValue, codec};
use crate::error::StorageResult;
use crate::join::{JoinAssembler, JoinResult, KeyMapping};
use crate::metadata::{Entity, EntityDescriptor, FetchPolicy, MetadataRegistry};
use crate::parallel::{BatchResults, ParallelExecutor, ParallelTask};
use crate::routing::CollectionRouter;

/// Entry point for mapping operations.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use helios_odm::backends::memory::MemoryStore;
/// use helios_odm::cascade::SaveOperation;
/// use helios_odm::config::OdmConfig;
/// use helios_odm::manager::EntityManager;
/// use helios_odm::metadata::{Entity, EntityDeclaration, MetadataRegistry};
/// use serde_json::json;
///
/// struct Customer;
/// impl Entity for Customer {
///     fn declaration() -> EntityDeclaration {
///         EntityDeclaration::new("Customer").collection("customers").scalar("username")
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let manager = EntityManager::with_registry(
///     Arc::new(MetadataRegistry::new()),
///     Arc::new(MemoryStore::new()),
///     OdmConfig::default(),
/// )
/// .unwrap();
/// manager.register::<Customer>();
///
/// let customer = manager
///     .create::<Customer>()
///     .unwrap()
///     .with("username", json!("ada"))
///     .unwrap()
///     .into_ref();
/// manager.cascade_save(&customer, SaveOperation::Create).await.unwrap();
///
/// let id = customer.read().id().unwrap().to_string();
/// let loaded = manager.find_by_id::<Customer>(&id, None).await.unwrap().unwrap();
/// assert_eq!(loaded.read().get("username"), Some(&json!("ada")));
/// # });
/// ```
pub struct EntityManager {
    registry: Arc<MetadataRegistry>,
    router: Arc<CollectionRouter>,
    store: DynStore,
    resolver: CascadeResolver,
    executor: ParallelExecutor,
    joiner: JoinAssembler,
    config: OdmConfig,
}

impl EntityManager {
    /// Creates a manager backed by the process-wide registry.
    pub fn new(store: DynStore, config: OdmConfig) -> StorageResult<Self> {
        Self::with_registry(MetadataRegistry::global(), store, config)
    }

    /// Creates a manager with its own registry.
    ///
    /// # Errors
    ///
    /// * `RoutingError::InvalidPattern` - If the routing configuration is invalid
    pub fn with_registry(
        registry: Arc<MetadataRegistry>,
        store: DynStore,
        config: OdmConfig,
    ) -> StorageResult<Self> {
        let router = Arc::new(CollectionRouter::new(config.routing.clone(), Arc::clone(&store))?);
        Ok(Self {
            resolver: CascadeResolver::new(
                Arc::clone(&registry),
                Arc::clone(&router),
                Arc::clone(&store),
            ),
            executor: ParallelExecutor::new(&config.parallel),
            joiner: JoinAssembler::new(Arc::clone(&router), Arc::clone(&store)),
            registry,
            router,
            store,
            config,
        })
    }

    /// Returns the metadata registry.
    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Returns the collection router.
    pub fn router(&self) -> &Arc<CollectionRouter> {
        &self.router
    }

    /// Returns the document store.
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    /// Registers an entity type.
    pub fn register<T: Entity>(&self) -> &Self {
        self.registry.register::<T>();
        self
    }

    /// Describes an entity type.
    pub fn describe<T: 'static>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        self.registry.describe::<T>()
    }

    /// Creates an empty, unsaved instance of an entity type.
    pub fn create<T: 'static>(&self) -> StorageResult<EntityInstance> {
        Ok(EntityInstance::new(self.describe::<T>()?))
    }

    /// Computes the physical collection name of an entity. Performs no I/O.
    pub fn resolve_collection_name(
        &self,
        descriptor: &EntityDescriptor,
        split_key: Option<&str>,
    ) -> StorageResult<String> {
        Ok(self.router.resolve_collection_name(descriptor, split_key)?)
    }

    /// Saves an object graph. See [`CascadeResolver::cascade_save`].
    #[instrument(skip(self, root))]
    pub async fn cascade_save(
        &self,
        root: &EntityRef,
        operation: SaveOperation,
    ) -> StorageResult<SaveStats> {
        self.resolver.cascade_save(root, operation).await
    }

    /// Resolves the reference fields named by `path`, e.g. `"x.target,y.target"`.
    /// See [`CascadeResolver::cascade_fetch`].
    #[instrument(skip(self, root, path))]
    pub async fn cascade_fetch(
        &self,
        root: &EntityRef,
        path: impl Into<FetchPath>,
    ) -> StorageResult<FetchStats> {
        self.resolver.cascade_fetch(root, &path.into()).await
    }

    /// Deletes an object graph. See [`CascadeResolver::cascade_delete`].
    #[instrument(skip(self, root))]
    pub async fn cascade_delete(&self, root: &EntityRef) -> StorageResult<usize> {
        self.resolver.cascade_delete(root).await
    }

    /// Loads one reference field on demand. See [`CascadeResolver::resolve_lazy`].
    pub async fn resolve_lazy(
        &self,
        instance: &EntityRef,
        field: &str,
    ) -> StorageResult<Option<FieldValue>> {
        self.resolver.resolve_lazy(instance, field).await
    }

    /// Loads an entity by identifier, resolving its eager references.
    #[instrument(skip(self))]
    pub async fn find_by_id<T: 'static>(
        &self,
        id: &str,
        split_key: Option<&str>,
    ) -> StorageResult<Option<EntityRef>> {
        let descriptor = self.describe::<T>()?;
        let key = EntityKey {
            id: id.to_string(),
            split_key: split_key.map(str::to_string),
        };
        let Some(instance) = self.resolver.load(&descriptor, &key).await? else {
            return Ok(None);
        };
        let instance = instance.into_ref();
        if has_eager_fields(&descriptor) {
            self.resolver
                .cascade_fetch(&instance, &FetchPath::empty())
                .await?;
        }
        Ok(Some(instance))
    }

    /// Loads every entity matching the filter, resolving eager references.
    #[instrument(skip(self, filter))]
    pub async fn find<T: 'static>(
        &self,
        filter: &Filter,
        split_key: Option<&str>,
    ) -> StorageResult<Vec<EntityRef>> {
        let descriptor = self.describe::<T>()?;
        let instances = find_many(&self.router, &self.store, &descriptor, filter, split_key).await?;
        if has_eager_fields(&descriptor) {
            for instance in &instances {
                self.resolver
                    .cascade_fetch(instance, &FetchPath::empty())
                    .await?;
            }
        }
        Ok(instances)
    }

    /// Builds a task that runs [`find`](Self::find) without eager resolution,
    /// for submission to [`execute_all`](Self::execute_all).
    pub fn find_task<T: 'static>(
        &self,
        label: impl Into<String>,
        filter: Filter,
        split_key: Option<String>,
    ) -> StorageResult<ParallelTask<Vec<EntityRef>>> {
        let descriptor = self.describe::<T>()?;
        let router = Arc::clone(&self.router);
        let store = Arc::clone(&self.store);
        Ok(ParallelTask::new(label, async move {
            find_many(&router, &store, &descriptor, &filter, split_key.as_deref()).await
        }))
    }

    /// Runs independent tasks concurrently. See [`ParallelExecutor::execute_all`].
    pub async fn execute_all<T: Send + 'static>(
        &self,
        tasks: Vec<ParallelTask<T>>,
    ) -> BatchResults<T> {
        self.executor.execute_all(tasks).await
    }

    /// Runs independent tasks until they finish or `cancel` resolves.
    pub async fn execute_all_until<T, C>(
        &self,
        tasks: Vec<ParallelTask<T>>,
        cancel: C,
    ) -> BatchResults<T>
    where
        T: Send + 'static,
        C: Future<Output = ()>,
    {
        self.executor.execute_all_until(tasks, cancel).await
    }

    /// Joins `left` rows against entities of type `R`. See [`JoinAssembler::join`].
    #[instrument(skip(self, left, mapping), fields(rows = left.len()))]
    pub async fn join<R: 'static>(
        &self,
        left: &[EntityRef],
        mapping: &KeyMapping,
        split_key: Option<&str>,
    ) -> StorageResult<Vec<JoinResult>> {
        let right = self.describe::<R>()?;
        self.joiner.join(left, &right, mapping, split_key).await
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

fn has_eager_fields(descriptor: &EntityDescriptor) -> bool {
    descriptor
        .reference_fields()
        .filter_map(|field| field.reference())
        .any(|mapping| mapping.fetch() == FetchPolicy::Eager)
}

async fn find_many(
    router: &CollectionRouter,
    store: &DynStore,
    descriptor: &Arc<EntityDescriptor>,
    filter: &Filter,
    split_key: Option<&str>,
) -> StorageResult<Vec<EntityRef>> {
    let collection = router.route(descriptor, split_key).await?;
    store
        .find_many(&collection, filter)
        .await?
        .iter()
        .map(|document| codec::decode(descriptor, document, split_key).map(EntityInstance::into_ref))
        .collect()
}
