use crate::RestStorage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Maps plural resource names to their backends within one group-version
#[derive(Clone, Default)]
pub struct StorageRegistry {
    storage: BTreeMap<String, Arc<dyn RestStorage>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one for the same resource
    pub fn insert(&mut self, resource: impl Into<String>, storage: Arc<dyn RestStorage>) {
        self.storage.insert(resource.into(), storage);
    }

    pub fn with(mut self, resource: impl Into<String>, storage: Arc<dyn RestStorage>) -> Self {
        self.insert(resource, storage);
        self
    }

    pub fn get(&self, resource: &str) -> Option<&Arc<dyn RestStorage>> {
        self.storage.get(resource)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.storage.contains_key(resource)
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.storage.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn RestStorage>)> {
        self.storage.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("resources", &self.storage.keys().collect::<Vec<_>>())
            .finish()
    }
}
