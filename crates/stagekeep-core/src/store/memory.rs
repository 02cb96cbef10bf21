//! # In-Memory Key Store
//!
//! A `BTreeMap`-backed [`KeyStore`] used as the test double for the real
//! store. It also counts live key handles so callers can check that every
//! opened key was released.

use super::{KeyHandle, KeyStore, KeyStoreWriter, canonical, direct_child, is_within, prefixes};
use crate::{RegValue, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One key: its display path and its values.
#[derive(Debug, Clone, Default)]
struct KeyEntry {
    display: String,
    /// Lowercase value name -> (display name, value)
    values: BTreeMap<String, (String, RegValue)>,
}

/// In-memory hierarchical key-value store.
///
/// Keys are stored flat, indexed by canonical (case-folded) path. Ordering is
/// deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: BTreeMap<String, KeyEntry>,
    open_handles: Arc<AtomicUsize>,
}

/// Open key of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryKey {
    canonical: String,
    display: String,
    _lease: HandleLease,
}

impl KeyHandle for MemoryKey {
    fn path(&self) -> &str {
        &self.display
    }
}

/// Counts one live handle for as long as it exists.
#[derive(Debug)]
struct HandleLease(Arc<AtomicUsize>);

impl HandleLease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of key handles opened on this store and not yet released.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Total number of keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn entry_mut(&mut self, path: &str) -> Result<&mut KeyEntry, StoreError> {
        let canon = canonical(path)?;
        self.keys
            .get_mut(&canon)
            .ok_or_else(|| StoreError::KeyNotFound(path.to_string()))
    }
}

// =============================================================================
// KEYSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl KeyStore for MemoryStore {
    type Key = MemoryKey;

    fn open_key(&self, path: &str) -> Result<MemoryKey, StoreError> {
        let canon = canonical(path)?;
        let entry = self
            .keys
            .get(&canon)
            .ok_or_else(|| StoreError::KeyNotFound(path.to_string()))?;

        Ok(MemoryKey {
            canonical: canon,
            display: entry.display.clone(),
            _lease: HandleLease::acquire(&self.open_handles),
        })
    }

    fn read_value(&self, key: &MemoryKey, name: &str) -> Result<RegValue, StoreError> {
        // The key may have been deleted after it was opened.
        let entry = self
            .keys
            .get(&key.canonical)
            .ok_or_else(|| StoreError::KeyNotFound(key.display.clone()))?;

        entry
            .values
            .get(&name.to_lowercase())
            .map(|(_, value)| value.clone())
            .ok_or_else(|| StoreError::ValueNotFound(name.to_string()))
    }

    fn subkeys(&self, key: &MemoryKey) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}\\", key.canonical);
        Ok(self
            .keys
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| direct_child(&key.canonical, path).is_some())
            .filter_map(|(_, entry)| entry.display.rsplit('\\').next())
            .map(str::to_string)
            .collect())
    }
}

impl KeyStoreWriter for MemoryStore {
    fn create_key(&mut self, path: &str) -> Result<(), StoreError> {
        let parts = super::segments(path)?;
        let lowered: Vec<String> = parts.iter().map(|s| s.to_lowercase()).collect();
        let lowered: Vec<&str> = lowered.iter().map(String::as_str).collect();

        for (canon, display) in prefixes(&lowered).into_iter().zip(prefixes(&parts)) {
            self.keys.entry(canon).or_insert_with(|| KeyEntry {
                display,
                values: BTreeMap::new(),
            });
        }
        Ok(())
    }

    fn set_value(&mut self, path: &str, name: &str, value: RegValue) -> Result<(), StoreError> {
        let entry = self.entry_mut(path)?;
        let lower = name.to_lowercase();
        let display = entry
            .values
            .get(&lower)
            .map_or_else(|| name.to_string(), |(shown, _)| shown.clone());
        entry.values.insert(lower, (display, value));
        Ok(())
    }

    fn delete_value(&mut self, path: &str, name: &str) -> Result<(), StoreError> {
        self.entry_mut(path)?
            .values
            .remove(&name.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| StoreError::ValueNotFound(name.to_string()))
    }

    fn delete_key(&mut self, path: &str) -> Result<(), StoreError> {
        let canon = canonical(path)?;
        if !self.keys.contains_key(&canon) {
            return Err(StoreError::KeyNotFound(path.to_string()));
        }
        self.keys.retain(|candidate, _| !is_within(&canon, candidate));
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueKind;

    #[test]
    fn create_key_creates_parents() {
        let mut store = MemoryStore::new();
        store.create_key(r"SOFTWARE\Glazier\Stages").expect("create");

        assert_eq!(store.key_count(), 3);
        assert!(store.open_key("SOFTWARE").is_ok());
        assert!(store.open_key(r"SOFTWARE\Glazier").is_ok());
    }

    #[test]
    fn open_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let result = store.open_key(r"SOFTWARE\Missing");
        assert!(matches!(result, Err(StoreError::KeyNotFound(_))));
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn names_match_case_insensitively() {
        let mut store = MemoryStore::new();
        store.create_key(r"SOFTWARE\Glazier").expect("create");
        store
            .set_value(r"software\GLAZIER", "_Active", RegValue::string("2"))
            .expect("set");

        let key = store.open_key(r"Software\glazier").expect("open");
        assert_eq!(key.path(), r"SOFTWARE\Glazier");
        assert_eq!(
            store.read_string_value(&key, "_ACTIVE").expect("read"),
            "2"
        );
    }

    #[test]
    fn set_value_requires_existing_key() {
        let mut store = MemoryStore::new();
        let result = store.set_value("Nowhere", "x", RegValue::DWord(1));
        assert!(matches!(result, Err(StoreError::KeyNotFound(_))));
    }

    #[test]
    fn set_value_replaces() {
        let mut store = MemoryStore::new();
        store.create_key("k").expect("create");
        store.set_value("k", "v", RegValue::DWord(1)).expect("set");
        store.set_value("k", "V", RegValue::string("s")).expect("set");

        let key = store.open_key("k").expect("open");
        assert_eq!(store.read_value(&key, "v").expect("read"), RegValue::string("s"));
    }

    #[test]
    fn string_read_rejects_other_types() {
        let mut store = MemoryStore::new();
        store.create_key("k").expect("create");
        store.set_value("k", "n", RegValue::DWord(0)).expect("set");

        let key = store.open_key("k").expect("open");
        let result = store.read_string_value(&key, "n");
        assert!(matches!(
            result,
            Err(StoreError::WrongType {
                expected: ValueKind::String,
                found: ValueKind::DWord
            })
        ));
    }

    #[test]
    fn subkeys_lists_direct_children_only() {
        let mut store = MemoryStore::new();
        store.create_key(r"root\1").expect("create");
        store.create_key(r"root\2\deep").expect("create");
        store.create_key(r"rootless\3").expect("create");

        let key = store.open_key("root").expect("open");
        assert_eq!(store.subkeys(&key).expect("subkeys"), vec!["1", "2"]);
    }

    #[test]
    fn delete_key_is_recursive() {
        let mut store = MemoryStore::new();
        store.create_key(r"root\1\deep").expect("create");
        store.create_key("rootless").expect("create");

        store.delete_key("root").expect("delete");

        assert!(store.open_key("root").is_err());
        assert!(store.open_key(r"root\1\deep").is_err());
        assert!(store.open_key("rootless").is_ok());
    }

    #[test]
    fn delete_value_reports_absence() {
        let mut store = MemoryStore::new();
        store.create_key("k").expect("create");
        store.set_value("k", "v", RegValue::QWord(7)).expect("set");

        store.delete_value("k", "v").expect("delete");
        assert!(matches!(
            store.delete_value("k", "v"),
            Err(StoreError::ValueNotFound(_))
        ));
    }

    #[test]
    fn handles_are_counted_until_released() {
        let mut store = MemoryStore::new();
        store.create_key("k").expect("create");

        let a = store.open_key("k").expect("open");
        let b = store.open_key("k").expect("open");
        assert_eq!(store.open_handles(), 2);

        a.close();
        assert_eq!(store.open_handles(), 1);
        drop(b);
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn reading_deleted_key_is_not_found() {
        let mut store = MemoryStore::new();
        store.create_key("k").expect("create");
        let key = store.open_key("k").expect("open");

        store.delete_key("k").expect("delete");
        assert!(matches!(
            store.read_value(&key, "v"),
            Err(StoreError::KeyNotFound(_))
        ));
    }
}
