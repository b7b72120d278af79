use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use shared::protocol::{ConfigEntry, ServerEvent};

/// Snapshot of the server's config table.
///
/// Reads are synchronous; the snapshot is taken at construction and kept
/// fresh by feeding `ConfigUpdated` events through `apply`.
#[derive(Clone, Default)]
pub struct ConfigStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ConfigEntry>) -> Self {
        let store = Self::new();
        store.replace(entries);
        store
    }

    pub fn instant(&self, key: &str) -> Option<String> {
        let values = self.values.lock().expect("config mutex poisoned");
        values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.lock().expect("config mutex poisoned");
        values.insert(key.into(), value.into());
    }

    pub fn replace(&self, entries: Vec<ConfigEntry>) {
        let mut values = self.values.lock().expect("config mutex poisoned");
        values.clear();
        values.extend(entries.into_iter().map(|e| (e.key, e.value)));
    }

    pub fn apply(&self, event: &ServerEvent) {
        if let ServerEvent::ConfigUpdated { key, value } = event {
            self.set(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_reads_the_snapshot() {
        let store = ConfigStore::from_entries(vec![ConfigEntry {
            key: "agenda_global_list_of_speakers".into(),
            value: "3".into(),
        }]);
        assert_eq!(
            store.instant("agenda_global_list_of_speakers").as_deref(),
            Some("3")
        );
        assert!(store.instant("missing").is_none());
    }

    #[test]
    fn config_updated_events_refresh_the_snapshot() {
        let store = ConfigStore::new();
        store.apply(&ServerEvent::ConfigUpdated {
            key: "agenda_global_list_of_speakers".into(),
            value: "7".into(),
        });
        assert_eq!(
            store.instant("agenda_global_list_of_speakers").as_deref(),
            Some("7")
        );
    }
}
