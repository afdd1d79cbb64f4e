//! Entity metadata.
//!
//! This module describes how entity types map to documents:
//!
//! - [`Entity`] - Trait through which a type declares its mapping
//! - [`EntityDeclaration`], [`FieldDeclaration`] - Declaration builders
//! - [`EntityDescriptor`], [`FieldDescriptor`] - Validated, immutable metadata
//! - [`CascadePermissions`] - Which operations a reference propagates
//! - [`MetadataRegistry`] - Process-scoped descriptor cache
//!
//! # Field Kinds
//!
//! | Kind | Stored as | Cascades |
//! |------|-----------|----------|
//! | Scalar | value | - |
//! | Embedded object / list | inline document / array | - |
//! | Reference (single / list) | `{"$ref", "$id"}` / array of those | per [`CascadePermissions`] |

mod descriptor;
mod permissions;
mod registry;

pub use descriptor::{
    CappedSpec, Entity, EntityDeclaration, EntityDescriptor, FetchPolicy, FieldDeclaration,
    FieldDescriptor, FieldKind, ID_KEY, ReferenceMapping, SplitMode, TargetType,
};
pub use permissions::{CascadeOperation, CascadePermissions};
pub use registry::MetadataRegistry;
