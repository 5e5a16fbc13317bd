use std::collections::HashMap;
use std::sync::Mutex;

/// Key-value port over browser-style session/local storage. The sign-in flow
/// only ever talks to this trait; the runtime wires a [`MemoryStore`] for the
/// session scope and a sqlite-backed store for the persistent scope.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
    /// Removes `key` only if it still holds `expected`. Returns whether the
    /// entry was removed. Keeps concurrent sign-in attempts from clearing
    /// each other's pending state.
    fn compare_and_remove(&self, key: &str, expected: &str) -> Result<bool, String>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| "store_lock_poisoned".to_string())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "store_lock_poisoned".to_string())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "store_lock_poisoned".to_string())?;
        entries.remove(key);
        Ok(())
    }

    fn compare_and_remove(&self, key: &str, expected: &str) -> Result<bool, String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "store_lock_poisoned".to_string())?;
        if entries.get(key).map(|v| v == expected).unwrap_or(false) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_compare_and_remove_only_matches_expected() {
        let store = MemoryStore::new();
        store.set("k", "v1").unwrap();
        assert!(!store.compare_and_remove("k", "v2").unwrap());
        assert_eq!(store.get("k").unwrap(), Some("v1".to_string()));
        assert!(store.compare_and_remove("k", "v1").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
        assert!(!store.compare_and_remove("k", "v1").unwrap());
    }
}
