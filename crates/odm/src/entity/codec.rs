//! Conversion between entity instances and stored documents.
//!
//! References are stored as `{"$ref": <entity>, "$id": <id>}` objects, with a
//! `"$split"` member when the target lives in a split collection. Reference
//! lists are arrays of those objects.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{Document, DocumentUpdate};
use crate::error::{BackendError, StorageResult};
use crate::metadata::{EntityDescriptor, FieldKind, ID_KEY, MetadataRegistry};

use super::instance::{EntityInstance, EntityKey, FieldValue, Reference};

const REF_KEY: &str = "$ref";
const REF_ID_KEY: &str = "$id";
const REF_SPLIT_KEY: &str = "$split";

fn serialization_error(message: String) -> BackendError {
    BackendError::SerializationError { message }
}

/// Serializes an instance into a document.
///
/// The identifier is written first, followed by fields in declaration order.
/// Fields without a value are omitted.
///
/// # Errors
///
/// * `BackendError::SerializationError` - If a reference points at an
///   instance that has no identifier yet
pub fn encode(instance: &EntityInstance, registry: &MetadataRegistry) -> StorageResult<Document> {
    let descriptor = instance.descriptor();
    let mut document = Map::new();
    if let Some(id) = instance.id() {
        document.insert(ID_KEY.to_string(), Value::String(id.to_string()));
    }

    for field in descriptor.fields() {
        let Some(value) = instance.field(field.name()) else {
            continue;
        };
        let encoded = match (field.kind(), value) {
            (FieldKind::ReferenceSingle(_), FieldValue::Reference(reference)) => {
                encode_reference(registry, descriptor, field.name(), reference)?
            }
            (FieldKind::ReferenceList(_), FieldValue::References(references)) => Value::Array(
                references
                    .iter()
                    .map(|r| encode_reference(registry, descriptor, field.name(), r))
                    .collect::<StorageResult<_>>()?,
            ),
            (_, FieldValue::Value(value)) if !field.is_reference() => value.clone(),
            _ => {
                return Err(serialization_error(format!(
                    "{}.{} holds a value of the wrong kind",
                    descriptor.name(),
                    field.name()
                ))
                .into());
            }
        };
        document.insert(field.key().to_string(), encoded);
    }
    Ok(document)
}

/// Turns an encoded document into an update of the stored copy.
///
/// Every mapped field missing from `document` is unset, so a cleared field
/// does not survive in the store. Unmapped stored keys are left alone.
pub fn update_for(descriptor: &EntityDescriptor, mut document: Document) -> DocumentUpdate {
    document.remove(ID_KEY);
    let unset = descriptor
        .fields()
        .iter()
        .map(|field| field.key())
        .filter(|key| !document.contains_key(*key))
        .map(str::to_string)
        .collect();
    DocumentUpdate {
        set: document,
        unset,
    }
}

fn encode_reference(
    registry: &MetadataRegistry,
    owner: &EntityDescriptor,
    field: &str,
    reference: &Reference,
) -> StorageResult<Value> {
    let (target_name, key) = match reference {
        Reference::Unresolved(key) | Reference::Absent(key) => {
            let target = owner.require_reference(field)?.1.target(registry)?;
            (target.name().to_string(), key.clone())
        }
        Reference::Resolved(target) => {
            let target = target.read_recursive();
            let key = target.key().ok_or_else(|| {
                serialization_error(format!(
                    "{}.{field} references an unsaved {}",
                    owner.name(),
                    target.descriptor().name()
                ))
            })?;
            (target.descriptor().name().to_string(), key)
        }
    };

    let mut db_ref = Map::new();
    db_ref.insert(REF_KEY.to_string(), Value::String(target_name));
    db_ref.insert(REF_ID_KEY.to_string(), Value::String(key.id));
    if let Some(split_key) = key.split_key {
        db_ref.insert(REF_SPLIT_KEY.to_string(), Value::String(split_key));
    }
    Ok(Value::Object(db_ref))
}

/// Deserializes a stored document into an instance.
///
/// Reference fields come back [`Reference::Unresolved`]. The instance is
/// marked persisted. Keys not mapped by the descriptor are ignored.
///
/// # Errors
///
/// * `BackendError::SerializationError` - If `_id` or a reference
///   identifier is not a string, or a reference is malformed
pub fn decode(
    descriptor: &Arc<EntityDescriptor>,
    document: &Document,
    split_key: Option<&str>,
) -> StorageResult<EntityInstance> {
    let mut instance = EntityInstance::new(Arc::clone(descriptor));
    match document.get(ID_KEY) {
        Some(Value::String(id)) => instance.set_id(id.clone()),
        Some(Value::Null) | None => {}
        Some(other) => {
            return Err(serialization_error(format!(
                "{} document has a non-string {ID_KEY}: {other}",
                descriptor.name()
            ))
            .into());
        }
    }
    if let Some(split_key) = split_key {
        instance.set_split_key(split_key);
    }

    for field in descriptor.fields() {
        let Some(raw) = document.get(field.key()) else {
            continue;
        };
        match field.kind() {
            FieldKind::ReferenceSingle(_) => {
                if let Some(key) = decode_reference(descriptor, field.name(), raw)? {
                    instance.replace_references(field.name(), vec![Reference::Unresolved(key)]);
                }
            }
            FieldKind::ReferenceList(_) => {
                let items = match raw {
                    Value::Array(items) => items.as_slice(),
                    Value::Null => &[],
                    _ => {
                        return Err(serialization_error(format!(
                            "{}.{} must be an array of references",
                            descriptor.name(),
                            field.name()
                        ))
                        .into());
                    }
                };
                let mut references = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(key) = decode_reference(descriptor, field.name(), item)? {
                        references.push(Reference::Unresolved(key));
                    }
                }
                instance.replace_references(field.name(), references);
            }
            _ => {
                instance.set(field.name(), raw.clone())?;
            }
        }
    }

    instance.set_persisted(true);
    Ok(instance)
}

/// Reads a reference in DBRef form or as a bare identifier.
fn decode_reference(
    owner: &EntityDescriptor,
    field: &str,
    raw: &Value,
) -> StorageResult<Option<EntityKey>> {
    let id_of = |value: &Value| value.as_str().map(str::to_string);
    let key = match raw {
        Value::Null => None,
        Value::Object(db_ref) => {
            let id = db_ref.get(REF_ID_KEY).and_then(id_of).ok_or_else(|| {
                serialization_error(format!(
                    "{}.{field} holds a reference without {REF_ID_KEY}",
                    owner.name()
                ))
            })?;
            let split_key = db_ref
                .get(REF_SPLIT_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(EntityKey { id, split_key })
        }
        other => match id_of(other) {
            Some(id) => Some(EntityKey::new(id)),
            None => {
                return Err(serialization_error(format!(
                    "{}.{field} holds an unreadable reference: {other}",
                    owner.name()
                ))
                .into());
            }
        },
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::StorageError;
    use crate::metadata::{CascadePermissions, Entity, EntityDeclaration, MetadataRegistry};

    struct Tag;
    impl Entity for Tag {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Tag").scalar("label")
        }
    }

    struct Post;
    impl Entity for Post {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Post")
                .scalar("title")
                .embedded("meta")
                .reference::<Post>("parent", CascadePermissions::none())
                .reference_list::<Tag>("tags", CascadePermissions::all())
        }
    }

    fn registry() -> MetadataRegistry {
        let registry = MetadataRegistry::new();
        registry.register::<Post>().register::<Tag>();
        registry
    }

    #[test]
    fn test_encode_writes_db_refs_in_declaration_order() {
        let registry = registry();
        let tag = EntityInstance::new(registry.describe::<Tag>().unwrap())
            .with_id("t-1")
            .into_ref();
        let mut post = EntityInstance::new(registry.describe::<Post>().unwrap())
            .with_id("p-2")
            .with("meta", json!({"words": 120}))
            .unwrap()
            .with("title", json!("Hello"))
            .unwrap();
        post.set_reference_key("parent", EntityKey::new("p-1")).unwrap();
        post.push_reference("tags", &tag).unwrap();

        let document = encode(&post, &registry).unwrap();
        let keys: Vec<_> = document.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_id", "title", "meta", "parent", "tags"]);
        assert_eq!(document["tags"], json!([{"$ref": "Tag", "$id": "t-1"}]));
        assert_eq!(document["parent"]["$id"], "p-1");
    }

    #[test]
    fn test_encode_rejects_unsaved_target() {
        let registry = registry();
        let tag = EntityInstance::new(registry.describe::<Tag>().unwrap()).into_ref();
        let mut post = EntityInstance::new(registry.describe::<Post>().unwrap());
        post.push_reference("tags", &tag).unwrap();
        assert!(encode(&post, &registry).is_err());
    }

    #[test]
    fn test_decode_leaves_references_unresolved() {
        let registry = registry();
        let descriptor = registry.describe::<Post>().unwrap();
        let document = json!({
            "_id": "p-2",
            "title": "Hello",
            "parent": {"$ref": "Post", "$id": "p-1"},
            "tags": [{"$ref": "Tag", "$id": "t-1"}, "t-2"],
            "unmapped": true
        });
        let post = decode(&descriptor, document.as_object().unwrap(), None).unwrap();

        assert_eq!(post.id(), Some("p-2"));
        assert!(post.is_persisted());
        assert_eq!(post.get("title"), Some(&json!("Hello")));
        assert!(matches!(post.reference("parent"), Some(Reference::Unresolved(k)) if k.id == "p-1"));
        let tag_ids: Vec<_> = post
            .references("tags")
            .iter()
            .map(|r| r.key().unwrap().id)
            .collect();
        assert_eq!(tag_ids, vec!["t-1", "t-2"]);
    }

    #[test]
    fn test_decode_null_reference_is_unset() {
        let registry = registry();
        let descriptor = registry.describe::<Post>().unwrap();
        let document = json!({"_id": "p-1", "parent": null});
        let post = decode(&descriptor, document.as_object().unwrap(), None).unwrap();
        assert!(post.reference("parent").is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_reference() {
        let registry = registry();
        let descriptor = registry.describe::<Post>().unwrap();
        let document = json!({"_id": "p-1", "parent": {"$ref": "Post"}});
        assert!(decode(&descriptor, document.as_object().unwrap(), None).is_err());
    }

    #[test]
    fn test_decode_rejects_non_string_identifiers() {
        let registry = registry();
        let descriptor = registry.describe::<Post>().unwrap();

        let numeric_id = json!({"_id": 5, "title": "Hello"});
        let err = decode(&descriptor, numeric_id.as_object().unwrap(), None).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));

        let numeric_ref = json!({"_id": "p-2", "parent": {"$ref": "Post", "$id": 1}});
        assert!(decode(&descriptor, numeric_ref.as_object().unwrap(), None).is_err());
    }

    #[test]
    fn test_update_unsets_cleared_fields() {
        let registry = registry();
        let post = EntityInstance::new(registry.describe::<Post>().unwrap())
            .with_id("p-1")
            .with("title", json!("Hello"))
            .unwrap();
        let document = encode(&post, &registry).unwrap();
        let update = update_for(post.descriptor(), document);

        assert!(!update.set.contains_key(ID_KEY));
        assert_eq!(update.set["title"], "Hello");
        assert_eq!(update.unset, vec!["meta", "parent", "tags"]);
    }
}
