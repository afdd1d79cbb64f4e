//! Join assembler.
//!
//! Pairs each left entity with the right entities whose key fields equal the
//! left entity's key fields. The store performs no join: one `find_many` is
//! issued per left row, so N left rows cost N round-trips.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::core::{DynStore, Filter};
use crate::entity::{EntityInstance, EntityRef, codec};
use crate::error::{MetadataError, StorageResult};
use crate::metadata::{EntityDescriptor, ID_KEY};
use crate::routing::CollectionRouter;

/// Field equalities between left and right entities. All pairs are ANDed.
///
/// Field names are entity field names, or `_id` for the identifier.
///
/// # Example
///
/// ```
/// use helios_odm::join::KeyMapping;
///
/// let mapping = KeyMapping::on("username", "username").and("region", "home_region");
/// assert_eq!(mapping.pairs().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapping {
    pairs: Vec<(String, String)>,
}

impl KeyMapping {
    /// Starts a mapping with one equality.
    pub fn on(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::default().and(left, right)
    }

    /// Adds an equality.
    pub fn and(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.pairs.push((left.into(), right.into()));
        self
    }

    /// Returns the `(left, right)` field pairs.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// One left entity and every right entity matching it.
#[derive(Debug, Clone)]
pub struct JoinResult<L = EntityRef, R = EntityRef> {
    /// The left entity.
    pub left: L,
    /// The matching right entities, in store order. Empty when none match.
    pub right: Vec<R>,
}

impl<L, R> JoinResult<L, R> {
    /// Returns `true` if at least one right entity matched.
    pub fn is_matched(&self) -> bool {
        !self.right.is_empty()
    }
}

/// Executes loop joins through the document store.
pub struct JoinAssembler {
    router: Arc<CollectionRouter>,
    store: DynStore,
}

impl JoinAssembler {
    /// Creates an assembler.
    pub fn new(router: Arc<CollectionRouter>, store: DynStore) -> Self {
        Self { router, store }
    }

    /// Joins `left` rows against the entities described by `right`.
    ///
    /// Results follow the order of `left`. A left row whose key value is
    /// missing or null matches nothing and issues no query.
    ///
    /// # Errors
    ///
    /// * `MetadataError::InvalidDeclaration` - If the mapping is empty
    /// * `MetadataError::UnknownField` - If a mapped field does not exist
    pub async fn join(
        &self,
        left: &[EntityRef],
        right: &Arc<EntityDescriptor>,
        mapping: &KeyMapping,
        split_key: Option<&str>,
    ) -> StorageResult<Vec<JoinResult>> {
        if mapping.pairs().is_empty() {
            return Err(MetadataError::InvalidDeclaration {
                entity: right.name().to_string(),
                message: "join key mapping is empty".to_string(),
            }
            .into());
        }

        let right_keys = mapping
            .pairs()
            .iter()
            .map(|(_, field)| document_key(right, field))
            .collect::<Result<Vec<_>, _>>()?;
        let collection = self.router.route(right, split_key).await?;

        let mut results = Vec::with_capacity(left.len());
        let mut queries = 0;
        for row in left {
            let filter = {
                let instance = row.read();
                key_filter(&instance, mapping, &right_keys)?
            };
            let matches = match filter {
                Some(filter) => {
                    queries += 1;
                    self.store
                        .find_many(&collection, &filter)
                        .await?
                        .iter()
                        .map(|document| codec::decode(right, document, split_key).map(EntityInstance::into_ref))
                        .collect::<StorageResult<Vec<_>>>()?
                }
                None => Vec::new(),
            };
            results.push(JoinResult {
                left: Arc::clone(row),
                right: matches,
            });
        }

        debug!(
            entity = right.name(),
            collection = %collection,
            rows = left.len(),
            queries,
            "Join assembled"
        );
        Ok(results)
    }
}

fn document_key(descriptor: &EntityDescriptor, field: &str) -> Result<String, MetadataError> {
    if field == ID_KEY {
        return Ok(ID_KEY.to_string());
    }
    Ok(descriptor.require_field(field)?.key().to_string())
}

/// Builds the right-hand filter for one left row, or `None` when a key
/// value is missing.
fn key_filter(
    instance: &EntityInstance,
    mapping: &KeyMapping,
    right_keys: &[String],
) -> Result<Option<Filter>, MetadataError> {
    let mut filter = Filter::new();
    for ((left_field, _), right_key) in mapping.pairs().iter().zip(right_keys) {
        let value = if left_field == ID_KEY {
            instance.id().map(|id| Value::String(id.to_string()))
        } else {
            instance.descriptor().require_field(left_field)?;
            instance.get(left_field).cloned()
        };
        match value {
            Some(Value::Null) | None => return Ok(None),
            Some(value) => filter = filter.eq(right_key.clone(), value),
        }
    }
    Ok(Some(filter))
}
