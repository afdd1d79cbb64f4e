//! Core storage traits and abstractions.
//!
//! This module provides the narrow boundaries the mapping layer talks to:
//!
//! - [`DocumentStore`] - Raw document operations against a physical collection
//! - [`Filter`] - Equality filter passed to the store
//! - [`SessionProvider`] - External transactional sessions
//! - [`with_retry`], [`with_session`] - Retry-on-conflict helpers
//!
//! # Example: Implementing a Document Store
//!
//! ```ignore
//! use async_trait::async_trait;
//! use helios_odm::core::{Document, DocumentStore, Filter};
//! use helios_odm::error::StorageResult;
//!
//! struct DriverStore { /* driver handle */ }
//!
//! #[async_trait]
//! impl DocumentStore for DriverStore {
//!     fn backend_name(&self) -> &'static str {
//!         "driver"
//!     }
//!
//!     async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<String> {
//!         // Forward to the driver
//!         todo!()
//!     }
//!
//!     // ... remaining methods
//! }
//! ```

mod session;
mod store;

pub use session::{Session, SessionProvider, with_retry, with_session};
pub use store::{Document, DocumentStore, DocumentUpdate, DynStore, Filter};
