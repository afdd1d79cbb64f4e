//! Document store implementations.
//!
//! # Available Backends
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | Memory | [`memory`] | In-process store with operation counters, used in tests |
//!
//! Production deployments implement [`DocumentStore`](crate::core::DocumentStore)
//! over their document database driver.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_odm::backends::memory::MemoryStore;
//! use helios_odm::core::DynStore;
//!
//! let store: DynStore = Arc::new(MemoryStore::new());
//! assert_eq!(store.backend_name(), "memory");
//! ```

pub mod memory;
