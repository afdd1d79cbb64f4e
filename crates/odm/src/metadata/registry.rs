//! Entity metadata registry.
//!
//! The registry maps entity types to their [`EntityDescriptor`]. Descriptors
//! are built lazily on first lookup, exactly once per type even when several
//! threads race on that first lookup, and are shared read-only afterwards.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{MetadataError, StorageResult};

use super::descriptor::{Entity, EntityDeclaration, EntityDescriptor, TargetType};

/// One registered type and its lazily built descriptor.
struct RegistryEntry {
    type_id: TypeId,
    type_name: &'static str,
    declare: fn() -> EntityDeclaration,
    descriptor: OnceLock<Arc<EntityDescriptor>>,
    init: Mutex<()>,
}

impl RegistryEntry {
    fn new(type_id: TypeId, type_name: &'static str, declare: fn() -> EntityDeclaration) -> Self {
        Self {
            type_id,
            type_name,
            declare,
            descriptor: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    fn descriptor(&self) -> StorageResult<Arc<EntityDescriptor>> {
        if let Some(descriptor) = self.descriptor.get() {
            return Ok(Arc::clone(descriptor));
        }

        // Per-type lock: a failed build is not cached, a successful one is
        // built by exactly one caller.
        let _guard = self.init.lock();
        if let Some(descriptor) = self.descriptor.get() {
            return Ok(Arc::clone(descriptor));
        }

        let descriptor = Arc::new((self.declare)().build(self.type_id, self.type_name)?);
        debug!(
            entity = descriptor.name(),
            collection = descriptor.collection(),
            fields = descriptor.fields().len(),
            "Built entity descriptor"
        );
        Ok(Arc::clone(self.descriptor.get_or_init(|| descriptor)))
    }
}

/// Process-scoped registry of entity metadata.
///
/// Types are registered with [`register`](Self::register) (cheap, nothing is
/// built) and described with [`describe`](Self::describe). Types reachable
/// through a declared reference are registered implicitly the first time the
/// reference target is resolved.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use helios_odm::metadata::{Entity, EntityDeclaration, MetadataRegistry};
///
/// struct Customer;
/// impl Entity for Customer {
///     fn declaration() -> EntityDeclaration {
///         EntityDeclaration::new("Customer").scalar("username")
///     }
/// }
///
/// struct NotAnEntity;
///
/// let registry = MetadataRegistry::new();
/// registry.register::<Customer>();
///
/// let first = registry.describe::<Customer>().unwrap();
/// let second = registry.describe::<Customer>().unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
///
/// assert!(registry.describe::<NotAnEntity>().is_err());
/// ```
#[derive(Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<TypeId, Arc<RegistryEntry>>>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<MetadataRegistry> {
        static GLOBAL: OnceLock<Arc<MetadataRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MetadataRegistry::new())))
    }

    /// Registers an entity type. Registering twice is a no-op.
    pub fn register<T: Entity>(&self) -> &Self {
        self.entry_for(&TargetType::of::<T>());
        self
    }

    /// Returns `true` if the type is registered.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Describes a type.
    ///
    /// # Errors
    ///
    /// * `MetadataError::UnmappedType` - If the type was never registered
    /// * `MetadataError::InvalidDeclaration` - If its declaration is inconsistent
    pub fn describe<T: 'static>(&self) -> StorageResult<Arc<EntityDescriptor>> {
        let entry = self.entries.read().get(&TypeId::of::<T>()).cloned();
        match entry {
            Some(entry) => entry.descriptor(),
            None => Err(MetadataError::UnmappedType {
                type_name: std::any::type_name::<T>().to_string(),
            }
            .into()),
        }
    }

    /// Describes a reference target, registering it if needed.
    pub fn describe_target(&self, target: &TargetType) -> StorageResult<Arc<EntityDescriptor>> {
        self.entry_for(target).descriptor()
    }

    /// Returns the registered descriptors that have been built so far.
    pub fn described(&self) -> Vec<Arc<EntityDescriptor>> {
        self.entries
            .read()
            .values()
            .filter_map(|entry| entry.descriptor.get().cloned())
            .collect()
    }

    fn entry_for(&self, target: &TargetType) -> Arc<RegistryEntry> {
        if let Some(entry) = self.entries.read().get(&target.type_id()) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(target.type_id()).or_insert_with(|| {
            Arc::new(RegistryEntry::new(
                target.type_id(),
                target.type_name(),
                target.declare(),
            ))
        }))
    }
}
