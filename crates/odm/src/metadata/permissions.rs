//! Cascade permission types.
//!
//! This module defines which operations a reference field propagates to the
//! entity it points at.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Operations that can cascade across a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeOperation {
    /// Insert referenced entities that have not been saved yet.
    Create,
    /// Load referenced entities on fetch.
    Read,
    /// Update referenced entities that already exist.
    Update,
    /// Delete referenced entities together with the owner.
    Delete,
}

impl fmt::Display for CascadeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeOperation::Create => write!(f, "create"),
            CascadeOperation::Read => write!(f, "read"),
            CascadeOperation::Update => write!(f, "update"),
            CascadeOperation::Delete => write!(f, "delete"),
        }
    }
}

/// The set of operations a reference field cascades.
///
/// An empty set means "store the reference only, never touch the target".
///
/// # Examples
///
/// ```
/// use helios_odm::metadata::{CascadeOperation, CascadePermissions};
///
/// let all = CascadePermissions::all();
/// assert!(all.allows(CascadeOperation::Delete));
///
/// let none = CascadePermissions::none();
/// assert!(none.is_empty());
///
/// let save_only = CascadePermissions::of([CascadeOperation::Create, CascadeOperation::Update]);
/// assert!(save_only.allows(CascadeOperation::Update));
/// assert!(!save_only.allows(CascadeOperation::Read));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadePermissions {
    operations: HashSet<CascadeOperation>,
}

impl CascadePermissions {
    /// Cascades every operation.
    pub fn all() -> Self {
        Self::of([
            CascadeOperation::Create,
            CascadeOperation::Read,
            CascadeOperation::Update,
            CascadeOperation::Delete,
        ])
    }

    /// Cascades nothing; only the identifier is stored.
    pub fn none() -> Self {
        Self::default()
    }

    /// Cascades create, read and update but never delete.
    pub fn save_and_read() -> Self {
        Self::of([
            CascadeOperation::Create,
            CascadeOperation::Read,
            CascadeOperation::Update,
        ])
    }

    /// Cascades exactly the given operations.
    pub fn of(operations: impl IntoIterator<Item = CascadeOperation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    /// Returns a copy with the operation added.
    pub fn with(mut self, operation: CascadeOperation) -> Self {
        self.operations.insert(operation);
        self
    }

    /// Returns `true` if the operation cascades.
    pub fn allows(&self, operation: CascadeOperation) -> bool {
        self.operations.contains(&operation)
    }

    /// Returns `true` if nothing cascades.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all() {
        let perms = CascadePermissions::all();
        assert!(perms.allows(CascadeOperation::Create));
        assert!(perms.allows(CascadeOperation::Read));
        assert!(perms.allows(CascadeOperation::Update));
        assert!(perms.allows(CascadeOperation::Delete));
    }

    #[test]
    fn test_none_is_reference_only() {
        let perms = CascadePermissions::none();
        assert!(perms.is_empty());
        assert!(!perms.allows(CascadeOperation::Read));
    }

    #[test]
    fn test_save_and_read_excludes_delete() {
        let perms = CascadePermissions::save_and_read();
        assert!(perms.allows(CascadeOperation::Create));
        assert!(!perms.allows(CascadeOperation::Delete));
        assert!(perms.with(CascadeOperation::Delete).allows(CascadeOperation::Delete));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(CascadeOperation::Create.to_string(), "create");
        assert_eq!(CascadeOperation::Read.to_string(), "read");
        assert_eq!(CascadeOperation::Update.to_string(), "update");
        assert_eq!(CascadeOperation::Delete.to_string(), "delete");
    }

    #[test]
    fn test_serde_lowercase() {
        let perms: CascadePermissions =
            serde_json::from_str(r#"{"operations": ["create", "read"]}"#).unwrap();
        assert!(perms.allows(CascadeOperation::Create));
        assert!(perms.allows(CascadeOperation::Read));
        assert!(!perms.allows(CascadeOperation::Update));
    }
}
