//! Error types for the mapping layer.
//!
//! This module defines all error types used throughout the crate, following a
//! hierarchy that separates metadata errors, routing errors, cascade errors,
//! parallel task errors and errors surfaced by the document store driver.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all mapping operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Entity metadata errors
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Collection routing errors
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Cascade errors
    #[error(transparent)]
    Cascade(#[from] CascadeError),

    /// Parallel task errors
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Document store errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns true if the error is a transient write conflict that an
    /// external session may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Backend(BackendError::TransientConflict { .. }) => true,
            StorageError::Cascade(CascadeError::Io { source, .. }) => source.is_transient(),
            _ => false,
        }
    }
}

/// Errors related to entity metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The type carries no entity declaration.
    #[error("type {type_name} is not a mapped entity")]
    UnmappedType { type_name: String },

    /// The entity has no field with the given name.
    #[error("entity {entity} has no field '{field}'")]
    UnknownField { entity: String, field: String },

    /// The field exists but is not a reference field.
    #[error("field {entity}.{field} is not a reference")]
    NotAReference { entity: String, field: String },

    /// The declaration is internally inconsistent.
    #[error("invalid declaration for {entity}: {message}")]
    InvalidDeclaration { entity: String, message: String },
}

/// Errors related to collection routing.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// A split-mode entity was used without a split key.
    #[error("entity {entity} is split by collection and requires a split key")]
    MissingSplitKey { entity: String },

    /// A split key was supplied for an entity that is not split.
    #[error("entity {entity} is not split but split key '{split_key}' was supplied")]
    UnexpectedSplitKey { entity: String, split_key: String },

    /// The split key normalizes to an unusable collection suffix.
    #[error("invalid split key '{split_key}' for {entity}")]
    InvalidSplitKey { entity: String, split_key: String },

    /// The resolved collection name is not acceptable to the store.
    #[error("invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: String },

    /// The configured split key pattern is not a valid regular expression.
    #[error("invalid split key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// The kind of store operation a cascade step was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeStep {
    Insert,
    Update,
    Fetch,
    Delete,
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeStep::Insert => write!(f, "insert"),
            CascadeStep::Update => write!(f, "update"),
            CascadeStep::Fetch => write!(f, "fetch"),
            CascadeStep::Delete => write!(f, "delete"),
        }
    }
}

/// Errors raised while cascading across an object graph.
#[derive(Error, Debug)]
pub enum CascadeError {
    /// A store call failed mid-cascade. Writes committed by earlier steps
    /// are not rolled back.
    #[error("cascade {step} failed for {entity}/{id} in collection {collection}: {source}")]
    Io {
        entity: String,
        id: String,
        step: CascadeStep,
        collection: String,
        #[source]
        source: Box<StorageError>,
    },

    /// A reference points at an entity that has never been saved and the
    /// field does not cascade the current operation.
    #[error("{entity}.{field} references an unsaved {target} and does not cascade {operation}")]
    UnsavedReference {
        entity: String,
        field: String,
        target: String,
        operation: String,
    },
}

/// Detail for a single failed parallel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Submission index of the failed task.
    pub index: usize,
    /// Label given to the task at submission.
    pub label: String,
    /// Rendered failure.
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({}): {}", self.index, self.label, self.message)
    }
}

/// Errors related to parallel query execution.
#[derive(Error, Debug)]
pub enum TaskError {
    /// One or more tasks in a batch failed.
    #[error("{} of {total} parallel tasks failed: {}", failures.len(), render_failures(failures))]
    Aggregate {
        total: usize,
        failures: Vec<TaskFailure>,
    },

    /// The batch was cancelled before these tasks finished.
    #[error("parallel batch cancelled with {} unfinished tasks", unfinished.len())]
    Cancelled { unfinished: Vec<usize> },

    /// A task panicked or ended without producing a result.
    #[error("parallel task #{index} panicked: {message}")]
    Panicked { index: usize, message: String },
}

fn render_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors originating from the document store driver.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store is unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// A document with the same identifier already exists.
    #[error("duplicate key {id} in collection {collection}")]
    DuplicateKey { collection: String, id: String },

    /// The document to update or delete does not exist.
    #[error("document {id} not found in collection {collection}")]
    NotFound { collection: String, id: String },

    /// A write conflicted with a concurrent transaction and may be retried.
    #[error("transient write conflict: {message}")]
    TransientConflict { message: String },

    /// Internal driver error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for mapping operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}
