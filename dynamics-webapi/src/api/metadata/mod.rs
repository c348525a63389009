//! Picklist metadata and a caller-owned option set cache

pub mod models;

pub use models::{OptionSetEntry, PicklistAttributeMetadata, parse_optionset};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Option sets keyed by `(entity, attribute)`, both lowercased.
///
/// The client never caches on its own; pass one of these to
/// `DynamicsClient::optionset_cached` to share lookups. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct OptionSetCache {
    entries: Arc<RwLock<HashMap<(String, String), Vec<OptionSetEntry>>>>,
}

impl OptionSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity: &str, attribute: &str) -> (String, String) {
        (entity.to_lowercase(), attribute.to_lowercase())
    }

    pub async fn get(&self, entity: &str, attribute: &str) -> Option<Vec<OptionSetEntry>> {
        self.entries.read().await.get(&Self::key(entity, attribute)).cloned()
    }

    pub async fn insert(&self, entity: &str, attribute: &str, entries: Vec<OptionSetEntry>) {
        self.entries
            .write()
            .await
            .insert(Self::key(entity, attribute), entries);
    }

    pub async fn invalidate(&self, entity: &str, attribute: &str) -> bool {
        self.entries
            .write()
            .await
            .remove(&Self::key(entity, attribute))
            .is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
