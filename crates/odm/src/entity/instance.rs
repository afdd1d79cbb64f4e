//! Live entity instances and their reference fields.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::MetadataError;
use crate::metadata::{EntityDescriptor, FieldKind, SplitMode};

/// A shared handle to an entity instance.
///
/// Object identity is `Arc` identity: two reference fields that point at
/// the same stored entity after a cascade fetch hold the same handle.
pub type EntityRef = Arc<RwLock<EntityInstance>>;

/// Identifies a stored entity within its logical type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// The stored identifier.
    pub id: String,
    /// The split key of the collection the entity lives in, if split.
    pub split_key: Option<String>,
}

impl EntityKey {
    /// Creates a key for an entity in an unsplit collection.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            split_key: None,
        }
    }

    /// Creates a key for an entity in a split collection.
    pub fn with_split(id: impl Into<String>, split_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            split_key: Some(split_key.into()),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.split_key {
            Some(split_key) => write!(f, "{}@{}", self.id, split_key),
            None => f.write_str(&self.id),
        }
    }
}

/// The state of one reference slot.
#[derive(Clone)]
pub enum Reference {
    /// Only the identifier is known; the target has not been loaded.
    Unresolved(EntityKey),
    /// The target is loaded (or was attached by the caller).
    Resolved(EntityRef),
    /// The target was looked up and does not exist.
    Absent(EntityKey),
}

impl Reference {
    /// Wraps an instance handle.
    pub fn to(target: &EntityRef) -> Self {
        Reference::Resolved(Arc::clone(target))
    }

    /// Returns the key of the target, if it has one.
    ///
    /// A resolved target that has never been assigned an identifier has no key.
    pub fn key(&self) -> Option<EntityKey> {
        match self {
            Reference::Unresolved(key) | Reference::Absent(key) => Some(key.clone()),
            Reference::Resolved(target) => target.read_recursive().key(),
        }
    }

    /// Returns the loaded target.
    pub fn get(&self) -> Option<&EntityRef> {
        match self {
            Reference::Resolved(target) => Some(target),
            _ => None,
        }
    }

    /// Returns `true` if the target is loaded.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved(_))
    }

    /// Returns `true` if the target is known to be missing.
    pub fn is_absent(&self) -> bool {
        matches!(self, Reference::Absent(_))
    }
}

// Resolved targets may point back at their owner, so only keys are printed.
impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Unresolved(key) => write!(f, "Unresolved({key})"),
            Reference::Absent(key) => write!(f, "Absent({key})"),
            Reference::Resolved(target) => match target.try_read_recursive() {
                Some(instance) => write!(
                    f,
                    "Resolved({}/{})",
                    instance.descriptor().name(),
                    instance.id().unwrap_or("<unsaved>")
                ),
                None => f.write_str("Resolved(<locked>)"),
            },
        }
    }
}

/// The value held by one field of an instance.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A scalar or embedded value, stored inline.
    Value(Value),
    /// A single reference.
    Reference(Reference),
    /// A list of references.
    References(Vec<Reference>),
}

impl FieldValue {
    /// Returns the inline value.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the single reference.
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            FieldValue::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Returns the reference slots of a single or list reference field.
    pub fn references(&self) -> &[Reference] {
        match self {
            FieldValue::Reference(reference) => std::slice::from_ref(reference),
            FieldValue::References(references) => references,
            FieldValue::Value(_) => &[],
        }
    }
}

/// A live entity: its identity, routing key and field values.
///
/// Instances are built by callers for saving, or decoded from stored
/// documents by the cascade resolver. Fields are validated against the
/// descriptor when set.
///
/// # Example
///
/// ```
/// use helios_odm::entity::EntityInstance;
/// use helios_odm::metadata::{Entity, EntityDeclaration, MetadataRegistry};
/// use serde_json::json;
///
/// struct Customer;
/// impl Entity for Customer {
///     fn declaration() -> EntityDeclaration {
///         EntityDeclaration::new("Customer").scalar("username")
///     }
/// }
///
/// let registry = MetadataRegistry::new();
/// registry.register::<Customer>();
/// let descriptor = registry.describe::<Customer>().unwrap();
///
/// let customer = EntityInstance::new(descriptor)
///     .with("username", json!("ada"))
///     .unwrap();
/// assert_eq!(customer.get("username"), Some(&json!("ada")));
/// assert!(customer.id().is_none());
/// ```
pub struct EntityInstance {
    descriptor: Arc<EntityDescriptor>,
    id: Option<String>,
    split_key: Option<String>,
    persisted: bool,
    fields: HashMap<String, FieldValue>,
}

impl EntityInstance {
    /// Creates an empty, unsaved instance.
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            id: None,
            split_key: None,
            persisted: false,
            fields: HashMap::new(),
        }
    }

    /// Returns the entity descriptor.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// Returns the identifier, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Sets the identifier.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Sets the identifier (builder form).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    /// Returns the split key supplied by the caller.
    pub fn explicit_split_key(&self) -> Option<&str> {
        self.split_key.as_deref()
    }

    /// Sets the split key used to route this instance.
    pub fn set_split_key(&mut self, split_key: impl Into<String>) {
        self.split_key = Some(split_key.into());
    }

    /// Sets the split key (builder form).
    pub fn with_split_key(mut self, split_key: impl Into<String>) -> Self {
        self.set_split_key(split_key);
        self
    }

    /// Returns the key used to route this instance.
    ///
    /// An explicit split key wins. Entities split by field fall back to the
    /// value of that field.
    pub fn split_key(&self) -> Option<String> {
        if let Some(split_key) = &self.split_key {
            return Some(split_key.clone());
        }
        match self.descriptor.split() {
            SplitMode::SuffixByField(field) => match self.get(field)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            },
            _ => None,
        }
    }

    /// Returns the key of this instance, if it has an identifier.
    pub fn key(&self) -> Option<EntityKey> {
        let id = self.id.clone()?;
        let split_key = if self.descriptor.is_split() {
            self.split_key()
        } else {
            None
        };
        Some(EntityKey { id, split_key })
    }

    /// Returns `true` once the instance has been written to or read from the store.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    /// Sets a scalar or embedded field.
    pub fn set(&mut self, field: &str, value: Value) -> Result<&mut Self, MetadataError> {
        let descriptor = self.descriptor.require_field(field)?;
        if descriptor.is_reference() {
            return Err(MetadataError::InvalidDeclaration {
                entity: self.descriptor.name().to_string(),
                message: format!("field '{field}' is a reference and cannot hold a value"),
            });
        }
        self.fields.insert(field.to_string(), FieldValue::Value(value));
        Ok(self)
    }

    /// Sets a scalar or embedded field (builder form).
    pub fn with(mut self, field: &str, value: Value) -> Result<Self, MetadataError> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Points a single reference field at an instance.
    pub fn set_reference(
        &mut self,
        field: &str,
        target: &EntityRef,
    ) -> Result<&mut Self, MetadataError> {
        self.set_reference_slot(field, Reference::to(target))
    }

    /// Points a single reference field at a stored entity without loading it.
    pub fn set_reference_key(
        &mut self,
        field: &str,
        key: EntityKey,
    ) -> Result<&mut Self, MetadataError> {
        self.set_reference_slot(field, Reference::Unresolved(key))
    }

    fn set_reference_slot(
        &mut self,
        field: &str,
        reference: Reference,
    ) -> Result<&mut Self, MetadataError> {
        let (descriptor, _) = self.descriptor.require_reference(field)?;
        let value = if descriptor.is_reference_list() {
            FieldValue::References(vec![reference])
        } else {
            FieldValue::Reference(reference)
        };
        self.fields.insert(field.to_string(), value);
        Ok(self)
    }

    /// Appends an instance to a reference-list field.
    pub fn push_reference(
        &mut self,
        field: &str,
        target: &EntityRef,
    ) -> Result<&mut Self, MetadataError> {
        let (descriptor, _) = self.descriptor.require_reference(field)?;
        if !descriptor.is_reference_list() {
            return self.set_reference(field, target);
        }
        match self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| FieldValue::References(Vec::new()))
        {
            FieldValue::References(references) => references.push(Reference::to(target)),
            other => *other = FieldValue::References(vec![Reference::to(target)]),
        }
        Ok(self)
    }

    /// Removes a field value.
    pub fn clear(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Returns a scalar or embedded value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(FieldValue::as_value)
    }

    /// Returns the raw value of any field.
    pub fn field(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns a single reference.
    pub fn reference(&self, field: &str) -> Option<&Reference> {
        self.fields.get(field).and_then(FieldValue::as_reference)
    }

    /// Returns the loaded target of a single reference.
    pub fn resolved(&self, field: &str) -> Option<EntityRef> {
        self.reference(field).and_then(Reference::get).cloned()
    }

    /// Returns the reference slots of a reference field.
    pub fn references(&self, field: &str) -> &[Reference] {
        self.fields.get(field).map(FieldValue::references).unwrap_or(&[])
    }

    pub(crate) fn replace_references(&mut self, field: &str, references: Vec<Reference>) {
        let list = self
            .descriptor
            .field(field)
            .is_some_and(|f| matches!(f.kind(), FieldKind::ReferenceList(_)));
        let value = match (list, references.len()) {
            (true, _) => FieldValue::References(references),
            (false, 1) => match references.into_iter().next() {
                Some(reference) => FieldValue::Reference(reference),
                None => return,
            },
            (false, _) => return,
        };
        self.fields.insert(field.to_string(), value);
    }

    /// Wraps the instance in a shared handle.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(RwLock::new(self))
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("entity", &self.descriptor.name())
            .field("id", &self.id)
            .field("split_key", &self.split_key)
            .field("persisted", &self.persisted)
            .field("fields", &self.fields)
            .finish()
    }
}
