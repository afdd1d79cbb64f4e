//! Helios Document-Object Mapping Layer
//!
//! This crate maps typed entities onto a document database. Entities declare
//! their fields, references to other entities and how their documents are
//! routed to physical collections; the mapping layer then saves, loads and
//! deletes whole object graphs through a pluggable [`DocumentStore`].
//!
//! # Features
//!
//! - **Entity Metadata**: Declarative field, reference and collection mappings cached per type
//! - **Cascades**: Save, fetch and delete propagate along references gated by per-field permissions
//! - **Split Collections**: Documents of one entity spread over collections by a split key
//! - **Capped Collections**: Created on first use, exactly once per physical name
//! - **Parallel Queries**: Independent reads run concurrently with per-task outcomes
//! - **Joins**: Loop joins between two entity sets on declared key equalities
//!
//! # Architecture
//!
//! - [`metadata`] - Entity declarations, descriptors and the metadata registry
//! - [`entity`] - Runtime instances, references and the document codec
//! - [`routing`] - Split keys and physical collection name resolution
//! - [`cascade`] - Cascade save, fetch and delete across object graphs
//! - [`parallel`] - Concurrent execution of independent queries
//! - [`join`] - Key-equality joins between entity sets
//! - [`core`] - The document store trait and session helpers
//! - [`backends`] - Store implementations
//! - [`manager`] - The [`EntityManager`] facade
//! - [`config`] - Configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use helios_odm::backends::memory::MemoryStore;
//! use helios_odm::metadata::{CascadePermissions, Entity, EntityDeclaration, MetadataRegistry};
//! use helios_odm::{EntityManager, OdmConfig, SaveOperation};
//! use serde_json::json;
//!
//! struct Person;
//! impl Entity for Person {
//!     fn declaration() -> EntityDeclaration {
//!         EntityDeclaration::new("Person")
//!             .scalar("name")
//!             .reference::<Person>("father", CascadePermissions::all())
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let manager = EntityManager::with_registry(
//!     Arc::new(MetadataRegistry::new()),
//!     Arc::new(MemoryStore::new()),
//!     OdmConfig::default(),
//! )
//! .unwrap();
//! manager.register::<Person>();
//!
//! let father = manager.create::<Person>().unwrap().with("name", json!("Abe")).unwrap().into_ref();
//! let mut son = manager.create::<Person>().unwrap().with("name", json!("Homer")).unwrap();
//! son.set_reference("father", &father).unwrap();
//! let son = son.into_ref();
//!
//! // Saving the son saves the father first.
//! let stats = manager.cascade_save(&son, SaveOperation::Create).await.unwrap();
//! assert_eq!(stats.inserted, 2);
//! assert!(father.read().id().is_some());
//! # });
//! ```
//!
//! # Split Collections
//!
//! ```
//! use std::sync::Arc;
//! use helios_odm::backends::memory::MemoryStore;
//! use helios_odm::metadata::{Entity, EntityDeclaration, MetadataRegistry};
//! use helios_odm::{EntityManager, OdmConfig};
//!
//! struct Order;
//! impl Entity for Order {
//!     fn declaration() -> EntityDeclaration {
//!         EntityDeclaration::new("Order").collection("orders").split_by_key()
//!     }
//! }
//!
//! let manager = EntityManager::with_registry(
//!     Arc::new(MetadataRegistry::new()),
//!     Arc::new(MemoryStore::new()),
//!     OdmConfig::default(),
//! )
//! .unwrap();
//! manager.register::<Order>();
//!
//! let order = manager.describe::<Order>().unwrap();
//! assert_eq!(manager.resolve_collection_name(&order, Some("east")).unwrap(), "orders_east");
//! assert!(manager.resolve_collection_name(&order, None).is_err());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod cascade;
pub mod config;
pub mod core;
pub mod entity;
pub mod error;
pub mod join;
pub mod manager;
pub mod metadata;
pub mod parallel;
pub mod routing;

// Re-export commonly used types at crate root
pub use config::OdmConfig;
pub use error::{StorageError, StorageResult};
pub use manager::EntityManager;

// Re-export core traits
pub use core::{
    Document, DocumentStore, DocumentUpdate, DynStore, Filter, Session, SessionProvider,
};

pub use cascade::{FetchPath, SaveOperation};
pub use entity::{EntityInstance, EntityKey, EntityRef, FieldValue, Reference};
pub use join::{JoinResult, KeyMapping};
pub use metadata::{CascadePermissions, Entity, EntityDeclaration, MetadataRegistry};
pub use parallel::{BatchResults, ParallelTask, TaskOutcome};
pub use routing::SplitKey;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
