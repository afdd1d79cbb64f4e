//! Cascade fetch and on-demand resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::entity::{EntityKey, EntityRef, FieldValue, Reference};
use crate::error::StorageResult;
use crate::metadata::{CascadeOperation, EntityDescriptor, FetchPolicy};

use super::CascadeResolver;
use super::path::{EMPTY_PATH, FetchPath};

/// Counters for one cascade fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Entities read from the store.
    pub fetched: usize,
    /// Unresolved references satisfied by an entity already loaded in this call.
    pub reused: usize,
    /// References whose target does not exist.
    pub dangling: usize,
}

type CacheKey = (String, EntityKey);

struct PlannedField<'p> {
    field: String,
    target: Arc<EntityDescriptor>,
    path: &'p FetchPath,
    references: Vec<Reference>,
}

impl CascadeResolver {
    /// Resolves the reference fields named by `path`, recursively.
    ///
    /// Fields declared eager are resolved at every level in addition to the
    /// named ones. Each distinct entity is read at most once per call, and
    /// every reference to it receives the same [`EntityRef`]. References that
    /// are already resolved are traversed without store reads, so repeating
    /// a fetch on a resolved graph issues none. A missing target becomes
    /// [`Reference::Absent`]. A named field that does not cascade `read` is
    /// left unresolved.
    ///
    /// # Errors
    ///
    /// * `MetadataError::UnknownField` / `NotAReference` - A path segment does
    ///   not name a reference field
    /// * `CascadeError::Io` - A store read failed
    pub async fn cascade_fetch(
        &self,
        root: &EntityRef,
        path: &FetchPath,
    ) -> StorageResult<FetchStats> {
        let mut stats = FetchStats::default();
        let mut cache: HashMap<CacheKey, EntityRef> = HashMap::new();
        let mut expanded: HashSet<(usize, usize)> = HashSet::new();
        let mut work: VecDeque<(EntityRef, &FetchPath)> = VecDeque::new();

        seed_cache(root, &mut cache);
        work.push_back((Arc::clone(root), path));

        while let Some((node, node_path)) = work.pop_front() {
            let marker = (
                Arc::as_ptr(&node) as usize,
                node_path as *const FetchPath as usize,
            );
            if !expanded.insert(marker) {
                continue;
            }

            for planned in self.plan(&node, node_path)? {
                let mut changed = false;
                let mut resolved = Vec::with_capacity(planned.references.len());

                for reference in planned.references {
                    let next = match reference {
                        Reference::Resolved(target) => {
                            let key = target.read().key();
                            if let Some(key) = key {
                                cache
                                    .entry((planned.target.name().to_string(), key))
                                    .or_insert_with(|| Arc::clone(&target));
                            }
                            Reference::Resolved(target)
                        }
                        Reference::Absent(key) => Reference::Absent(key),
                        Reference::Unresolved(key) => {
                            changed = true;
                            let cache_key = (planned.target.name().to_string(), key);
                            if let Some(hit) = cache.get(&cache_key) {
                                stats.reused += 1;
                                Reference::Resolved(Arc::clone(hit))
                            } else {
                                let (_, key) = cache_key;
                                match self.load(&planned.target, &key).await? {
                                    Some(instance) => {
                                        stats.fetched += 1;
                                        let target = instance.into_ref();
                                        cache.insert(
                                            (planned.target.name().to_string(), key),
                                            Arc::clone(&target),
                                        );
                                        Reference::Resolved(target)
                                    }
                                    None => {
                                        stats.dangling += 1;
                                        warn!(
                                            entity = planned.target.name(),
                                            id = %key.id,
                                            field = %planned.field,
                                            "Dangling reference"
                                        );
                                        Reference::Absent(key)
                                    }
                                }
                            }
                        }
                    };

                    if let Reference::Resolved(target) = &next {
                        work.push_back((Arc::clone(target), planned.path));
                    }
                    resolved.push(next);
                }

                if changed {
                    node.write().replace_references(&planned.field, resolved);
                }
            }
        }

        debug!(
            fetched = stats.fetched,
            reused = stats.reused,
            dangling = stats.dangling,
            "Cascade fetch complete"
        );
        Ok(stats)
    }

    /// Lists the fields of `node` to resolve under `path`: the named ones,
    /// then eager ones not already named.
    fn plan<'p>(
        &self,
        node: &EntityRef,
        path: &'p FetchPath,
    ) -> StorageResult<Vec<PlannedField<'p>>> {
        let instance = node.read();
        let descriptor = Arc::clone(instance.descriptor());
        let mut planned = Vec::new();

        for (name, sub_path) in path.children() {
            let (field, mapping) = descriptor.require_reference(name)?;
            if !mapping.allows(CascadeOperation::Read) {
                debug!(
                    entity = descriptor.name(),
                    field = name,
                    "Field does not cascade read, leaving unresolved"
                );
                continue;
            }
            planned.push(PlannedField {
                field: field.name().to_string(),
                target: mapping.target(&self.registry)?,
                path: sub_path,
                references: instance.references(name).to_vec(),
            });
        }

        for field in descriptor.reference_fields() {
            let Some(mapping) = field.reference() else {
                continue;
            };
            if mapping.fetch() != FetchPolicy::Eager
                || !mapping.allows(CascadeOperation::Read)
                || path.child(field.name()).is_some()
            {
                continue;
            }
            planned.push(PlannedField {
                field: field.name().to_string(),
                target: mapping.target(&self.registry)?,
                path: &EMPTY_PATH,
                references: instance.references(field.name()).to_vec(),
            });
        }

        Ok(planned)
    }

    /// Resolves one reference field on demand.
    ///
    /// Unresolved slots are loaded with a single read each. Loaded targets
    /// keep their own references unresolved. Already resolved or absent
    /// slots are left alone. Returns the field value after resolution.
    pub async fn resolve_lazy(
        &self,
        instance: &EntityRef,
        field: &str,
    ) -> StorageResult<Option<FieldValue>> {
        let (descriptor, references) = {
            let instance = instance.read();
            (
                Arc::clone(instance.descriptor()),
                instance.references(field).to_vec(),
            )
        };
        let (_, mapping) = descriptor.require_reference(field)?;
        let target = mapping.target(&self.registry)?;

        if references
            .iter()
            .any(|r| matches!(r, Reference::Unresolved(_)))
        {
            let mut resolved = Vec::with_capacity(references.len());
            for reference in references {
                resolved.push(match reference {
                    Reference::Unresolved(key) => match self.load(&target, &key).await? {
                        Some(loaded) => Reference::Resolved(loaded.into_ref()),
                        None => {
                            warn!(entity = target.name(), id = %key.id, field, "Dangling reference");
                            Reference::Absent(key)
                        }
                    },
                    other => other,
                });
            }
            instance.write().replace_references(field, resolved);
        }

        Ok(instance.read().field(field).cloned())
    }
}

/// Registers every instance already reachable through resolved slots, so
/// an unresolved slot never loads a second copy of an entity the graph
/// already holds.
fn seed_cache(root: &EntityRef, cache: &mut HashMap<CacheKey, EntityRef>) {
    let mut seen = HashSet::new();
    let mut stack = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        if !seen.insert(Arc::as_ptr(&node) as usize) {
            continue;
        }
        let instance = node.read();
        if let Some(key) = instance.key() {
            cache
                .entry((instance.descriptor().name().to_string(), key))
                .or_insert_with(|| Arc::clone(&node));
        }
        for field in instance.descriptor().reference_fields() {
            stack.extend(
                instance
                    .references(field.name())
                    .iter()
                    .filter_map(Reference::get)
                    .cloned(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::cascade::SaveOperation;
    use crate::config::RoutingConfig;
    use crate::entity::EntityInstance;
    use crate::error::{MetadataError, StorageError};
    use crate::metadata::{CascadePermissions, Entity, EntityDeclaration, FieldDeclaration, MetadataRegistry};
    use crate::routing::CollectionRouter;

    struct Country;
    impl Entity for Country {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Country").scalar("code")
        }
    }

    struct City;
    impl Entity for City {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("City")
                .scalar("name")
                .field(
                    FieldDeclaration::reference::<Country>("country")
                        .cascade(CascadePermissions::all())
                        .eager(),
                )
                .reference::<City>("twin", CascadePermissions::all())
                .reference::<City>("rival", CascadePermissions::none())
        }
    }

    fn create_resolver() -> (CascadeResolver, Arc<MetadataRegistry>, Arc<MemoryStore>) {
        let registry = Arc::new(MetadataRegistry::new());
        registry.register::<City>().register::<Country>();
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(CollectionRouter::new(RoutingConfig::default(), store.clone()).unwrap());
        let resolver = CascadeResolver::new(Arc::clone(&registry), router, store.clone());
        (resolver, registry, store)
    }

    async fn seed(resolver: &CascadeResolver, registry: &MetadataRegistry) -> String {
        let country = EntityInstance::new(registry.describe::<Country>().unwrap())
            .with("code", json!("PT"))
            .unwrap()
            .into_ref();
        let porto = EntityInstance::new(registry.describe::<City>().unwrap())
            .with("name", json!("Porto"))
            .unwrap()
            .into_ref();
        let lisbon = EntityInstance::new(registry.describe::<City>().unwrap())
            .with("name", json!("Lisbon"))
            .unwrap()
            .into_ref();
        porto.write().set_reference("country", &country).unwrap();
        lisbon.write().set_reference("country", &country).unwrap();
        porto.write().set_reference("twin", &lisbon).unwrap();
        resolver.cascade_save(&porto, SaveOperation::Create).await.unwrap();
        porto.read().id().unwrap().to_string()
    }

    async fn load(resolver: &CascadeResolver, registry: &MetadataRegistry, id: &str) -> EntityRef {
        let descriptor = registry.describe::<City>().unwrap();
        resolver
            .load(&descriptor, &EntityKey::new(id))
            .await
            .unwrap()
            .unwrap()
            .into_ref()
    }

    #[tokio::test]
    async fn test_eager_fields_resolved_at_every_level() {
        let (resolver, registry, _) = create_resolver();
        let id = seed(&resolver, &registry).await;
        let porto = load(&resolver, &registry, &id).await;

        let stats = resolver
            .cascade_fetch(&porto, &FetchPath::parse("twin"))
            .await
            .unwrap();
        // twin + one shared country
        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.reused, 1);

        let lisbon = porto.read().resolved("twin").unwrap();
        let via_porto = porto.read().resolved("country").unwrap();
        let via_lisbon = lisbon.read().resolved("country").unwrap();
        assert!(Arc::ptr_eq(&via_porto, &via_lisbon));
    }

    #[tokio::test]
    async fn test_unnamed_lazy_field_stays_unresolved() {
        let (resolver, registry, _) = create_resolver();
        let id = seed(&resolver, &registry).await;
        let porto = load(&resolver, &registry, &id).await;

        resolver.cascade_fetch(&porto, &FetchPath::empty()).await.unwrap();
        assert!(porto.read().reference("country").unwrap().is_resolved());
        assert!(matches!(porto.read().reference("twin"), Some(Reference::Unresolved(_))));
    }

    #[tokio::test]
    async fn test_field_without_read_permission_is_skipped() {
        let (resolver, registry, store) = create_resolver();
        let porto = EntityInstance::new(registry.describe::<City>().unwrap())
            .with_id("c-1")
            .into_ref();
        porto
            .write()
            .set_reference_key("rival", EntityKey::new("c-2"))
            .unwrap();

        let stats = resolver
            .cascade_fetch(&porto, &FetchPath::parse("rival"))
            .await
            .unwrap();
        assert_eq!(stats, FetchStats::default());
        assert_eq!(store.counts().reads, 0);
    }

    #[tokio::test]
    async fn test_unknown_path_segment_fails() {
        let (resolver, registry, _) = create_resolver();
        let porto = EntityInstance::new(registry.describe::<City>().unwrap()).into_ref();
        let err = resolver
            .cascade_fetch(&porto, &FetchPath::parse("mayor"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Metadata(MetadataError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn test_dangling_reference_becomes_absent() {
        let (resolver, registry, store) = create_resolver();
        let porto = EntityInstance::new(registry.describe::<City>().unwrap())
            .with_id("c-1")
            .into_ref();
        porto
            .write()
            .set_reference_key("twin", EntityKey::new("missing"))
            .unwrap();

        let stats = resolver
            .cascade_fetch(&porto, &FetchPath::parse("twin"))
            .await
            .unwrap();
        assert_eq!(stats.dangling, 1);
        assert!(porto.read().reference("twin").unwrap().is_absent());

        // Absent slots are not probed again.
        let reads = store.counts().reads;
        resolver
            .cascade_fetch(&porto, &FetchPath::parse("twin"))
            .await
            .unwrap();
        assert_eq!(store.counts().reads, reads);
    }

    #[tokio::test]
    async fn test_resolve_lazy_loads_one_level() {
        let (resolver, registry, store) = create_resolver();
        let id = seed(&resolver, &registry).await;
        let porto = load(&resolver, &registry, &id).await;
        let reads = store.counts().reads;

        let value = resolver.resolve_lazy(&porto, "twin").await.unwrap().unwrap();
        let lisbon = value.as_reference().and_then(Reference::get).cloned().unwrap();
        assert_eq!(lisbon.read().get("name"), Some(&json!("Lisbon")));
        assert!(matches!(lisbon.read().reference("country"), Some(Reference::Unresolved(_))));
        assert_eq!(store.counts().reads, reads + 1);

        // Already resolved: no read.
        resolver.resolve_lazy(&porto, "twin").await.unwrap();
        assert_eq!(store.counts().reads, reads + 1);
    }
}
