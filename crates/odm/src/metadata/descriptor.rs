//! Entity and field descriptors.
//!
//! An [`EntityDeclaration`] is the static description a type provides through
//! [`Entity::declaration`]. The registry validates it once and turns it into
//! an immutable [`EntityDescriptor`] shared by every operation on that type.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{MetadataError, StorageResult};

use super::permissions::{CascadeOperation, CascadePermissions};
use super::registry::MetadataRegistry;

/// Document key holding the entity identifier.
pub const ID_KEY: &str = "_id";

/// A type that maps to a document collection.
///
/// # Example
///
/// ```
/// use helios_odm::metadata::{CascadePermissions, Entity, EntityDeclaration};
///
/// struct Customer;
/// struct Order;
///
/// impl Entity for Customer {
///     fn declaration() -> EntityDeclaration {
///         EntityDeclaration::new("Customer")
///             .collection("customers")
///             .scalar("username")
///     }
/// }
///
/// impl Entity for Order {
///     fn declaration() -> EntityDeclaration {
///         EntityDeclaration::new("Order")
///             .collection("orders")
///             .split_by_key()
///             .scalar("total")
///             .reference::<Customer>("customer", CascadePermissions::none())
///     }
/// }
/// ```
pub trait Entity: Send + Sync + 'static {
    /// Returns the mapping declaration for this type.
    fn declaration() -> EntityDeclaration;
}

/// Identity of a reference target type.
///
/// Carries the target's declaration function so that the registry can map
/// a referenced type on first access without it being registered up front.
#[derive(Clone, Copy)]
pub struct TargetType {
    type_id: TypeId,
    type_name: &'static str,
    declare: fn() -> EntityDeclaration,
}

impl TargetType {
    /// Returns the target identity of an entity type.
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            declare: T::declaration,
        }
    }

    /// Returns the Rust type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn declare(&self) -> fn() -> EntityDeclaration {
        self.declare
    }
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// When a reference field is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Loaded only when named in a fetch path or resolved on demand.
    #[default]
    Lazy,
    /// Loaded whenever the owning entity is loaded.
    Eager,
}

/// Mapping details of a reference field.
pub struct ReferenceMapping {
    target: TargetType,
    cascade: CascadePermissions,
    fetch: FetchPolicy,
    resolved: OnceLock<Arc<EntityDescriptor>>,
}

impl ReferenceMapping {
    /// Returns the target type identity.
    pub fn target_type(&self) -> &TargetType {
        &self.target
    }

    /// Returns the cascade permissions.
    pub fn cascade(&self) -> &CascadePermissions {
        &self.cascade
    }

    /// Returns the fetch policy.
    pub fn fetch(&self) -> FetchPolicy {
        self.fetch
    }

    /// Returns `true` if the operation cascades across this reference.
    pub fn allows(&self, operation: CascadeOperation) -> bool {
        self.cascade.allows(operation)
    }

    /// Resolves the target descriptor, describing the target type on first
    /// access.
    pub fn target(&self, registry: &MetadataRegistry) -> StorageResult<Arc<EntityDescriptor>> {
        if let Some(descriptor) = self.resolved.get() {
            return Ok(Arc::clone(descriptor));
        }
        let descriptor = registry.describe_target(&self.target)?;
        Ok(Arc::clone(self.resolved.get_or_init(|| descriptor)))
    }
}

// Descriptors of mutually referencing types point at each other, so Debug
// only prints the target name.
impl fmt::Debug for ReferenceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceMapping")
            .field("target", &self.target)
            .field("cascade", &self.cascade)
            .field("fetch", &self.fetch)
            .finish()
    }
}

/// The kind of a mapped field.
#[derive(Debug)]
pub enum FieldKind {
    /// A plain value.
    Scalar,
    /// A nested object serialized inline.
    EmbeddedObject,
    /// A list of nested values serialized inline.
    EmbeddedList,
    /// A reference to one entity.
    ReferenceSingle(ReferenceMapping),
    /// A reference to several entities.
    ReferenceList(ReferenceMapping),
}

/// A mapped field of an entity.
#[derive(Debug)]
pub struct FieldDescriptor {
    name: String,
    key: String,
    kind: FieldKind,
}

impl FieldDescriptor {
    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key used in the serialized document.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the field kind.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the reference mapping for reference fields.
    pub fn reference(&self) -> Option<&ReferenceMapping> {
        match &self.kind {
            FieldKind::ReferenceSingle(mapping) | FieldKind::ReferenceList(mapping) => {
                Some(mapping)
            }
            _ => None,
        }
    }

    /// Returns `true` for reference fields.
    pub fn is_reference(&self) -> bool {
        self.reference().is_some()
    }

    /// Returns `true` for reference-list fields.
    pub fn is_reference_list(&self) -> bool {
        matches!(self.kind, FieldKind::ReferenceList(_))
    }
}

/// Size limits of a capped collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CappedSpec {
    /// Maximum collection size in bytes.
    pub size_bytes: u64,
    /// Maximum number of documents, if limited.
    pub max_docs: Option<u64>,
}

/// How an entity is split across physical collections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// One collection.
    #[default]
    None,
    /// One collection per split key supplied by the caller.
    SuffixByKey,
    /// One collection per value of the named scalar field. A key passed by
    /// the caller takes precedence over the field value.
    SuffixByField(String),
}

impl SplitMode {
    /// Returns `true` unless the mode is [`SplitMode::None`].
    pub fn is_split(&self) -> bool {
        !matches!(self, SplitMode::None)
    }
}

/// Immutable mapping metadata for one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    name: String,
    collection: String,
    type_id: TypeId,
    type_name: &'static str,
    capped: Option<CappedSpec>,
    split: SplitMode,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    /// Returns the logical entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base physical collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the Rust type id of the entity.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name of the entity.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the capped collection limits, if capped.
    pub fn capped(&self) -> Option<CappedSpec> {
        self.capped
    }

    /// Returns the split mode.
    pub fn split(&self) -> &SplitMode {
        &self.split
    }

    /// Returns `true` if operations must carry a split key.
    pub fn is_split(&self) -> bool {
        self.split.is_split()
    }

    /// Returns the fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns the reference fields in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a field by name, failing if it does not exist.
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor, MetadataError> {
        self.field(name).ok_or_else(|| MetadataError::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Looks up a reference field by name.
    pub fn require_reference(
        &self,
        name: &str,
    ) -> Result<(&FieldDescriptor, &ReferenceMapping), MetadataError> {
        let field = self.require_field(name)?;
        let mapping = field.reference().ok_or_else(|| MetadataError::NotAReference {
            entity: self.name.clone(),
            field: name.to_string(),
        })?;
        Ok((field, mapping))
    }
}

#[derive(Debug, Clone, Copy)]
enum DeclaredKind {
    Scalar,
    EmbeddedObject,
    EmbeddedList,
    ReferenceSingle(TargetType),
    ReferenceList(TargetType),
}

/// Declaration of one field.
#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    name: String,
    key: Option<String>,
    kind: DeclaredKind,
    cascade: Option<CascadePermissions>,
    fetch: Option<FetchPolicy>,
}

impl FieldDeclaration {
    fn new(name: impl Into<String>, kind: DeclaredKind) -> Self {
        Self {
            name: name.into(),
            key: None,
            kind,
            cascade: None,
            fetch: None,
        }
    }

    /// Declares a scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::Scalar)
    }

    /// Declares an embedded object field.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::EmbeddedObject)
    }

    /// Declares an embedded list field.
    pub fn embedded_list(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::EmbeddedList)
    }

    /// Declares a single reference to another entity.
    pub fn reference<T: Entity>(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::ReferenceSingle(TargetType::of::<T>()))
    }

    /// Declares a list of references to another entity.
    pub fn reference_list<T: Entity>(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::ReferenceList(TargetType::of::<T>()))
    }

    /// Overrides the serialized document key (defaults to the field name).
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the cascade permissions of a reference field.
    pub fn cascade(mut self, cascade: CascadePermissions) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Loads the reference whenever the owner is loaded.
    pub fn eager(mut self) -> Self {
        self.fetch = Some(FetchPolicy::Eager);
        self
    }

    fn is_reference(&self) -> bool {
        matches!(
            self.kind,
            DeclaredKind::ReferenceSingle(_) | DeclaredKind::ReferenceList(_)
        )
    }

    fn build(self, entity: &str) -> Result<FieldDescriptor, MetadataError> {
        if !self.is_reference() && (self.cascade.is_some() || self.fetch.is_some()) {
            return Err(MetadataError::InvalidDeclaration {
                entity: entity.to_string(),
                message: format!(
                    "field '{}' is not a reference and cannot cascade or fetch",
                    self.name
                ),
            });
        }

        let mapping = |target: TargetType, cascade: Option<CascadePermissions>, fetch: Option<FetchPolicy>| {
            ReferenceMapping {
                target,
                cascade: cascade.unwrap_or_default(),
                fetch: fetch.unwrap_or_default(),
                resolved: OnceLock::new(),
            }
        };

        let kind = match self.kind {
            DeclaredKind::Scalar => FieldKind::Scalar,
            DeclaredKind::EmbeddedObject => FieldKind::EmbeddedObject,
            DeclaredKind::EmbeddedList => FieldKind::EmbeddedList,
            DeclaredKind::ReferenceSingle(target) => {
                FieldKind::ReferenceSingle(mapping(target, self.cascade, self.fetch))
            }
            DeclaredKind::ReferenceList(target) => {
                FieldKind::ReferenceList(mapping(target, self.cascade, self.fetch))
            }
        };

        let key = self.key.unwrap_or_else(|| self.name.clone());
        Ok(FieldDescriptor {
            name: self.name,
            key,
            kind,
        })
    }
}

/// Static mapping declaration of an entity type.
#[derive(Debug, Clone)]
pub struct EntityDeclaration {
    name: String,
    collection: Option<String>,
    capped: Option<CappedSpec>,
    split: SplitMode,
    fields: Vec<FieldDeclaration>,
}

impl EntityDeclaration {
    /// Starts a declaration for the given logical entity name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            capped: None,
            split: SplitMode::None,
            fields: Vec::new(),
        }
    }

    /// Sets the base collection name (defaults to the entity name).
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Marks the collection as capped.
    pub fn capped(mut self, size_bytes: u64, max_docs: Option<u64>) -> Self {
        self.capped = Some(CappedSpec {
            size_bytes,
            max_docs,
        });
        self
    }

    /// Splits the entity by a caller-supplied key.
    pub fn split_by_key(mut self) -> Self {
        self.split = SplitMode::SuffixByKey;
        self
    }

    /// Splits the entity by the value of a scalar field.
    pub fn split_by_field(mut self, field: impl Into<String>) -> Self {
        self.split = SplitMode::SuffixByField(field.into());
        self
    }

    /// Adds a field declaration.
    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a scalar field.
    pub fn scalar(self, name: impl Into<String>) -> Self {
        self.field(FieldDeclaration::scalar(name))
    }

    /// Adds an embedded object field.
    pub fn embedded(self, name: impl Into<String>) -> Self {
        self.field(FieldDeclaration::embedded(name))
    }

    /// Adds an embedded list field.
    pub fn embedded_list(self, name: impl Into<String>) -> Self {
        self.field(FieldDeclaration::embedded_list(name))
    }

    /// Adds a lazily fetched single reference.
    pub fn reference<T: Entity>(self, name: impl Into<String>, cascade: CascadePermissions) -> Self {
        self.field(FieldDeclaration::reference::<T>(name).cascade(cascade))
    }

    /// Adds a lazily fetched reference list.
    pub fn reference_list<T: Entity>(
        self,
        name: impl Into<String>,
        cascade: CascadePermissions,
    ) -> Self {
        self.field(FieldDeclaration::reference_list::<T>(name).cascade(cascade))
    }

    /// Returns the logical entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the declaration and builds the descriptor.
    pub(crate) fn build(
        self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<EntityDescriptor, MetadataError> {
        let invalid = |message: String| MetadataError::InvalidDeclaration {
            entity: self.name.clone(),
            message,
        };

        if self.name.is_empty() {
            return Err(invalid(format!("{type_name} declares an empty entity name")));
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            let key = field.key.as_deref().unwrap_or(&field.name);
            if key == ID_KEY {
                return Err(invalid(format!("field '{}' uses the reserved key {ID_KEY}", field.name)));
            }
            if !keys.insert(key) {
                return Err(invalid(format!("duplicate document key '{key}'")));
            }
        }

        if let SplitMode::SuffixByField(split_field) = &self.split {
            let declared = self.fields.iter().find(|f| &f.name == split_field);
            match declared {
                Some(field) if matches!(field.kind, DeclaredKind::Scalar) => {}
                Some(_) => {
                    return Err(invalid(format!("split field '{split_field}' must be a scalar")));
                }
                None => return Err(invalid(format!("split field '{split_field}' is not declared"))),
            }
        }

        if let Some(capped) = self.capped {
            if capped.size_bytes == 0 {
                return Err(invalid("capped collection size must be positive".to_string()));
            }
        }

        let name = self.name.clone();
        let fields = self
            .fields
            .into_iter()
            .map(|f| f.build(&name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EntityDescriptor {
            collection: self.collection.unwrap_or_else(|| name.clone()),
            name,
            type_id,
            type_name,
            capped: self.capped,
            split: self.split,
            fields,
        })
    }
}
