//! Field Retriever - Which fields of an entity the storage maps
//!
//! TigerStyle: Computed once per entity type, then served from cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::entity::{EntityDescriptor, FieldDescriptor};

/// Supplies the persisted fields of an entity type.
pub trait FieldRetriever: Send + Sync {
    /// Persisted fields of `descriptor`: the id field first, then the
    /// remaining non-transient fields in declaration order.
    fn relevant_fields(&self, descriptor: &'static EntityDescriptor) -> Arc<[FieldDescriptor]>;
}

/// Field retriever that memoizes results per entity name.
#[derive(Debug, Default)]
pub struct CachedFieldRetriever {
    cache: RwLock<HashMap<&'static str, Arc<[FieldDescriptor]>>>,
}

impl CachedFieldRetriever {
    /// Create an empty retriever.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity types cached so far.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn compute(descriptor: &EntityDescriptor) -> Arc<[FieldDescriptor]> {
        let ids = descriptor.fields.iter().filter(|f| f.id);
        let rest = descriptor.fields.iter().filter(|f| !f.id && !f.transient);
        ids.chain(rest).copied().collect()
    }
}

impl FieldRetriever for CachedFieldRetriever {
    fn relevant_fields(&self, descriptor: &'static EntityDescriptor) -> Arc<[FieldDescriptor]> {
        if let Some(fields) = self
            .cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(descriptor.name)
        {
            return Arc::clone(fields);
        }

        let fields = Self::compute(descriptor);
        tracing::trace!(entity = descriptor.name, count = fields.len(), "retrieved fields");

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(cache.entry(descriptor.name).or_insert(fields))
    }
}
