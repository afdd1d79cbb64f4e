//! Entity instances.
//!
//! - [`EntityInstance`] - A live entity with identity, split key and fields
//! - [`EntityRef`] - Shared handle; object identity is `Arc` identity
//! - [`Reference`] - Tri-state reference slot (unresolved, resolved, absent)
//! - [`codec`] - Conversion to and from stored documents

pub mod codec;
mod instance;

pub use instance::{EntityInstance, EntityKey, EntityRef, FieldValue, Reference};
