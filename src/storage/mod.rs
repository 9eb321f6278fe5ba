use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;

pub(crate) const SNAPSHOT_KEY_PREFIX: &str = "hulunote_outline_snapshot";
pub(crate) const SNAPSHOT_INDEX_KEY: &str = "hulunote_outline_snapshot_index";
pub(crate) const OFFLINE_QUEUE_KEY: &str = "hulunote_offline_queue";

/// String key/value persistence (browser localStorage or an in-process map).
///
/// Writes are best-effort: a full or unavailable store must never break
/// editing, so failures are swallowed by implementations and logged.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.borrow().keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    fn remove_item(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }
}

/// `window.localStorage`.
#[cfg(target_arch = "wasm32")]
#[derive(Clone, Debug, Default)]
pub struct LocalStorage;

#[cfg(target_arch = "wasm32")]
impl LocalStorage {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window().and_then(|w| w.local_storage().ok().flatten())
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for LocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        Self::storage()?.get_item(key).ok().flatten()
    }

    fn set_item(&self, key: &str, value: &str) {
        if let Some(storage) = Self::storage() {
            if storage.set_item(key, value).is_err() {
                tracing::warn!(key, "localStorage write failed");
            }
        }
    }

    fn remove_item(&self, key: &str) {
        if let Some(storage) = Self::storage() {
            let _ = storage.remove_item(key);
        }
    }
}

pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Option<T> {
    let json = store.get_item(key)?;
    match serde_json::from_str(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unreadable stored value");
            None
        }
    }
}

pub(crate) fn save_json_to_storage<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => store.set_item(key, &json),
        Err(e) => tracing::warn!(key, error = %e, "could not serialize value for storage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_through_memory_storage() {
        let store = MemoryStorage::new();
        save_json_to_storage(&store, "k", &vec![1, 2, 3]);
        let back: Option<Vec<i32>> = load_json_from_storage(&store, "k");
        assert_eq!(back, Some(vec![1, 2, 3]));
        assert_eq!(store.keys(), vec!["k".to_string()]);

        store.remove_item("k");
        assert!(load_json_from_storage::<Vec<i32>>(&store, "k").is_none());
    }

    #[test]
    fn unreadable_values_load_as_none() {
        let store = MemoryStorage::new();
        store.set_item("k", "{not json");
        assert!(load_json_from_storage::<Vec<i32>>(&store, "k").is_none());
    }
}
