//! Collection routing.
//!
//! The router maps an entity descriptor and an optional split key to the
//! name of a physical collection.
//!
//! # Routing Rules
//!
//! - Unsplit entity, no key → base collection
//! - Unsplit entity, key → base collection, or `UnexpectedSplitKey` when
//!   configured to reject
//! - Split entity, key → `{base}{separator}{normalized key}`
//! - Split entity, no key → `MissingSplitKey`
//! - Capped entity → the resolved collection is created as capped once per
//!   process before its first use

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{RoutingConfig, UnexpectedSplitKey};
use crate::core::DynStore;
use crate::error::{RoutingError, StorageResult};
use crate::metadata::{CappedSpec, EntityDescriptor};

use super::split_key::normalize;

/// Routes entities to physical collections.
pub struct CollectionRouter {
    config: RoutingConfig,
    key_pattern: Regex,
    store: DynStore,
    capped: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl CollectionRouter {
    /// Creates a router over the given store.
    ///
    /// # Errors
    ///
    /// * `RoutingError::InvalidPattern` - If the configured split key pattern
    ///   does not compile
    pub fn new(config: RoutingConfig, store: DynStore) -> StorageResult<Self> {
        let key_pattern =
            Regex::new(&config.split_key_pattern).map_err(|e| RoutingError::InvalidPattern {
                pattern: config.split_key_pattern.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            config,
            key_pattern,
            store,
            capped: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the routing configuration.
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Computes the physical collection name. Performs no I/O.
    ///
    /// # Errors
    ///
    /// * `RoutingError::MissingSplitKey` - Split entity without a key
    /// * `RoutingError::UnexpectedSplitKey` - Key on an unsplit entity, when rejected
    /// * `RoutingError::InvalidSplitKey` - Key that normalizes to an unusable suffix
    /// * `RoutingError::InvalidCollectionName` - Name the store would not accept
    pub fn resolve_collection_name(
        &self,
        descriptor: &EntityDescriptor,
        split_key: Option<&str>,
    ) -> Result<String, RoutingError> {
        let name = match (descriptor.is_split(), split_key) {
            (true, Some(raw)) => {
                let suffix = normalize(raw);
                if suffix.is_empty() || !self.key_pattern.is_match(&suffix) {
                    return Err(RoutingError::InvalidSplitKey {
                        entity: descriptor.name().to_string(),
                        split_key: raw.to_string(),
                    });
                }
                format!("{}{}{}", descriptor.collection(), self.config.separator, suffix)
            }
            (true, None) => {
                return Err(RoutingError::MissingSplitKey {
                    entity: descriptor.name().to_string(),
                });
            }
            (false, Some(raw)) => match self.config.unexpected_split_key {
                UnexpectedSplitKey::Ignore => {
                    debug!(entity = descriptor.name(), split_key = raw, "Ignoring split key for unsplit entity");
                    descriptor.collection().to_string()
                }
                UnexpectedSplitKey::Reject => {
                    return Err(RoutingError::UnexpectedSplitKey {
                        entity: descriptor.name().to_string(),
                        split_key: raw.to_string(),
                    });
                }
            },
            (false, None) => descriptor.collection().to_string(),
        };

        self.validate_name(&name)?;
        Ok(name)
    }

    fn validate_name(&self, name: &str) -> Result<(), RoutingError> {
        let invalid = |reason: &str| RoutingError::InvalidCollectionName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > self.config.max_collection_name_length {
            return Err(invalid(&format!(
                "longer than {} characters",
                self.config.max_collection_name_length
            )));
        }
        if name.contains('$') || name.contains('\0') {
            return Err(invalid("contains '$' or a null character"));
        }
        if name.starts_with("system.") {
            return Err(invalid("'system.' prefix is reserved"));
        }
        Ok(())
    }

    /// Resolves the collection name and, for capped entities, makes sure the
    /// capped collection exists.
    pub async fn route(
        &self,
        descriptor: &EntityDescriptor,
        split_key: Option<&str>,
    ) -> StorageResult<String> {
        let name = self.resolve_collection_name(descriptor, split_key)?;
        if let Some(capped) = descriptor.capped() {
            if self.config.ensure_capped {
                self.ensure_capped(&name, capped).await?;
            }
        }
        Ok(name)
    }

    /// Creates a capped collection at most once per name.
    ///
    /// Concurrent first callers for the same name wait on a single creation.
    /// A failed creation is not remembered and is attempted again by the
    /// next caller.
    async fn ensure_capped(&self, name: &str, capped: CappedSpec) -> StorageResult<()> {
        let cell = Arc::clone(
            self.capped
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );
        cell.get_or_try_init(|| async {
            debug!(collection = name, size_bytes = capped.size_bytes, "Ensuring capped collection");
            self.store
                .ensure_capped_collection(name, capped.size_bytes, capped.max_docs)
                .await
        })
        .await?;
        Ok(())
    }

    /// Returns the capped collections ensured so far, sorted.
    pub fn ensured_capped_collections(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .capped
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for CollectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRouter")
            .field("config", &self.config)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::error::StorageError;
    use crate::metadata::{Entity, EntityDeclaration, MetadataRegistry};

    struct Order;
    impl Entity for Order {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Order")
                .collection("orders")
                .split_by_key()
                .scalar("total")
        }
    }

    struct Customer;
    impl Entity for Customer {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Customer").collection("customers")
        }
    }

    struct AuditEvent;
    impl Entity for AuditEvent {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("AuditEvent")
                .collection("audit")
                .capped(4096, Some(100))
                .split_by_key()
        }
    }

    fn create_router(config: RoutingConfig) -> (CollectionRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let router = CollectionRouter::new(config, store.clone()).unwrap();
        (router, store)
    }

    fn describe<T: Entity>() -> Arc<EntityDescriptor> {
        let registry = MetadataRegistry::new();
        registry.register::<T>();
        registry.describe::<T>().unwrap()
    }

    // ========================================================================
    // Name Resolution Tests
    // ========================================================================

    #[test]
    fn test_split_entity_appends_key() {
        let (router, _) = create_router(RoutingConfig::default());
        let orders = describe::<Order>();
        assert_eq!(
            router.resolve_collection_name(&orders, Some("east")).unwrap(),
            "orders_east"
        );
        assert_eq!(
            router.resolve_collection_name(&orders, Some("2024Q1")).unwrap(),
            "orders_2024Q1"
        );
    }

    #[test]
    fn test_split_entity_requires_key() {
        let (router, _) = create_router(RoutingConfig::default());
        let err = router.resolve_collection_name(&describe::<Order>(), None).unwrap_err();
        assert!(matches!(err, RoutingError::MissingSplitKey { entity } if entity == "Order"));
    }

    #[test]
    fn test_custom_separator() {
        let (router, _) = create_router(RoutingConfig::default().with_separator("-"));
        assert_eq!(
            router
                .resolve_collection_name(&describe::<Order>(), Some("west"))
                .unwrap(),
            "orders-west"
        );
    }

    #[test]
    fn test_invalid_split_key() {
        let (router, _) = create_router(RoutingConfig::default());
        let err = router
            .resolve_collection_name(&describe::<Order>(), Some("%%"))
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidSplitKey { .. }));
    }

    #[test]
    fn test_unexpected_key_policy() {
        let customers = describe::<Customer>();
        let (ignoring, _) = create_router(RoutingConfig::default());
        assert_eq!(
            ignoring.resolve_collection_name(&customers, Some("east")).unwrap(),
            "customers"
        );

        let (rejecting, _) = create_router(RoutingConfig::default().rejecting_unexpected_keys());
        assert!(matches!(
            rejecting.resolve_collection_name(&customers, Some("east")),
            Err(RoutingError::UnexpectedSplitKey { .. })
        ));
    }

    #[test]
    fn test_name_length_limit() {
        let config = RoutingConfig {
            max_collection_name_length: 10,
            ..RoutingConfig::default()
        };
        let (router, _) = create_router(config);
        assert!(matches!(
            router.resolve_collection_name(&describe::<Order>(), Some("a-very-long-key")),
            Err(RoutingError::InvalidCollectionName { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = RoutingConfig {
            split_key_pattern: "([".to_string(),
            ..RoutingConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(
            CollectionRouter::new(config, store),
            Err(StorageError::Routing(RoutingError::InvalidPattern { .. }))
        ));
    }

    // ========================================================================
    // Capped Collection Tests
    // ========================================================================

    #[tokio::test]
    async fn test_capped_collection_ensured_once_per_name() {
        let (router, store) = create_router(RoutingConfig::default());
        let audit = describe::<AuditEvent>();

        for _ in 0..3 {
            router.route(&audit, Some("2024Q1")).await.unwrap();
        }
        router.route(&audit, Some("2024Q2")).await.unwrap();

        assert_eq!(store.counts().capped_ensures, 2);
        assert_eq!(
            router.ensured_capped_collections(),
            vec!["audit_2024Q1", "audit_2024Q2"]
        );
        assert!(store.capped_spec("audit_2024Q1").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_first_route_creates_once() {
        let (router, store) = create_router(RoutingConfig::default());
        let router = Arc::new(router);
        let audit = describe::<AuditEvent>();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let router = Arc::clone(&router);
            let audit = Arc::clone(&audit);
            handles.push(tokio::spawn(async move {
                router.route(&audit, Some("east")).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "audit_east");
        }
        assert_eq!(store.counts().capped_ensures, 1);
    }

    #[tokio::test]
    async fn test_capped_ensure_can_be_disabled() {
        let config = RoutingConfig {
            ensure_capped: false,
            ..RoutingConfig::default()
        };
        let (router, store) = create_router(config);
        router.route(&describe::<AuditEvent>(), Some("x")).await.unwrap();
        assert_eq!(store.counts().capped_ensures, 0);
    }
}
