use dashmap::DashMap;

use crate::PreferenceStore;

/// In-memory implementation of the PreferenceStore port. Stands in for the
/// browser-profile key-value store that persists the active workspace id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPreferences {
    values: std::sync::Arc<DashMap<String, String>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}
