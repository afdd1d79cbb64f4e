//! Collection routing.
//!
//! - [`CollectionRouter`] - Resolves physical collection names and ensures
//!   capped collections exist
//! - [`SplitKey`] - Runtime split key, with calendar bucket helpers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_odm::backends::memory::MemoryStore;
//! use helios_odm::config::RoutingConfig;
//! use helios_odm::metadata::{Entity, EntityDeclaration, MetadataRegistry};
//! use helios_odm::routing::CollectionRouter;
//!
//! struct Order;
//! impl Entity for Order {
//!     fn declaration() -> EntityDeclaration {
//!         EntityDeclaration::new("Order").collection("orders").split_by_key()
//!     }
//! }
//!
//! let registry = MetadataRegistry::new();
//! registry.register::<Order>();
//! let orders = registry.describe::<Order>().unwrap();
//!
//! let router = CollectionRouter::new(RoutingConfig::default(), Arc::new(MemoryStore::new())).unwrap();
//! assert_eq!(router.resolve_collection_name(&orders, Some("east")).unwrap(), "orders_east");
//! assert!(router.resolve_collection_name(&orders, None).is_err());
//! ```

mod router;
mod split_key;

pub use router::CollectionRouter;
pub use split_key::SplitKey;
