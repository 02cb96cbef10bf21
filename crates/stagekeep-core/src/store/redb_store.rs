//! # redb-backed Key Store
//!
//! A disk-backed [`KeyStore`] on the redb embedded database, standing in for
//! the OS registry wherever one is not available.
//!
//! ## Layout
//!
//! - `keys`: canonical path -> display path (one row per key, parents included)
//! - `values`: (canonical path, lowercase value name) -> postcard bytes of
//!   (display name, [`RegValue`])
//!
//! ## Handles
//!
//! An open [`RedbKey`] owns a read transaction, so every read through it sees
//! the snapshot taken when the key was opened. Dropping the handle ends the
//! transaction.

use super::{KeyHandle, KeyStore, KeyStoreWriter, canonical, direct_child, is_within, prefixes};
use crate::{RegValue, StoreError};
use redb::{
    Database, ReadOnlyDatabase, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition,
    TableError,
};
use std::path::Path;

/// Table for keys: canonical path -> display path
const KEYS: TableDefinition<&str, &str> = TableDefinition::new("keys");

/// Table for values: (canonical path, lowercase name) -> serialized (name, RegValue)
const VALUES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("values");

/// A disk-backed key store using redb.
///
/// `D` is the redb handle: a writable [`Database`] (the default, which also
/// implements [`KeyStoreWriter`]) or a [`ReadOnlyDatabase`] for readers that
/// must never modify the file.
pub struct RedbKeyStore<D = Database> {
    /// The redb database handle.
    db: D,
}

/// A [`RedbKeyStore`] opened without write access.
pub type ReadOnlyRedbKeyStore = RedbKeyStore<ReadOnlyDatabase>;

impl<D> std::fmt::Debug for RedbKeyStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKeyStore").finish_non_exhaustive()
    }
}

/// Open key of a [`RedbKeyStore`], holding a read snapshot.
pub struct RedbKey {
    canonical: String,
    display: String,
    txn: ReadTransaction,
}

impl std::fmt::Debug for RedbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKey")
            .field("path", &self.display)
            .finish_non_exhaustive()
    }
}

impl KeyHandle for RedbKey {
    fn path(&self) -> &str {
        &self.display
    }
}

impl RedbKeyStore<Database> {
    /// Open or create a key store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::IoError(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(KEYS)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(VALUES)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        Ok(Self { db })
    }
}

impl RedbKeyStore<ReadOnlyDatabase> {
    /// Open an existing key store database for reading only.
    ///
    /// The file is opened read-only and never modified. Missing tables read
    /// as an empty store.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = ReadOnlyDatabase::open(path.as_ref())
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(Self { db })
    }
}

// =============================================================================
// KEYSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl<D: ReadableDatabase> KeyStore for RedbKeyStore<D> {
    type Key = RedbKey;

    fn open_key(&self, path: &str) -> Result<RedbKey, StoreError> {
        let canon = canonical(path)?;
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::IoError(e.to_string()))?;

        let display = {
            let table = match txn.open_table(KEYS) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(StoreError::KeyNotFound(path.to_string()));
                }
                Err(e) => return Err(StoreError::IoError(e.to_string())),
            };
            table
                .get(canon.as_str())
                .map_err(|e| StoreError::IoError(e.to_string()))?
                .map(|shown| shown.value().to_string())
        };

        match display {
            Some(display) => Ok(RedbKey {
                canonical: canon,
                display,
                txn,
            }),
            None => Err(StoreError::KeyNotFound(path.to_string())),
        }
    }

    fn read_value(&self, key: &RedbKey, name: &str) -> Result<RegValue, StoreError> {
        let table = match key.txn.open_table(VALUES) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(StoreError::ValueNotFound(name.to_string()));
            }
            Err(e) => return Err(StoreError::IoError(e.to_string())),
        };
        let lower = name.to_lowercase();

        match table
            .get((key.canonical.as_str(), lower.as_str()))
            .map_err(|e| StoreError::IoError(e.to_string()))?
        {
            Some(data) => {
                let (_, value): (String, RegValue) = postcard::from_bytes(data.value())
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?;
                Ok(value)
            }
            None => Err(StoreError::ValueNotFound(name.to_string())),
        }
    }

    fn subkeys(&self, key: &RedbKey) -> Result<Vec<String>, StoreError> {
        let table = key
            .txn
            .open_table(KEYS)
            .map_err(|e| StoreError::IoError(e.to_string()))?;

        let mut children = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StoreError::IoError(e.to_string()))?
        {
            let (path, shown) = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
            if direct_child(&key.canonical, path.value()).is_none() {
                continue;
            }
            if let Some(name) = shown.value().rsplit('\\').next() {
                children.push(name.to_string());
            }
        }
        Ok(children)
    }
}

impl KeyStoreWriter for RedbKeyStore<Database> {
    fn create_key(&mut self, path: &str) -> Result<(), StoreError> {
        let parts = super::segments(path)?;
        let lowered: Vec<String> = parts.iter().map(|s| s.to_lowercase()).collect();
        let lowered: Vec<&str> = lowered.iter().map(String::as_str).collect();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(KEYS)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            for (canon, display) in prefixes(&lowered).into_iter().zip(prefixes(&parts)) {
                let exists = table
                    .get(canon.as_str())
                    .map_err(|e| StoreError::IoError(e.to_string()))?
                    .is_some();
                if !exists {
                    table
                        .insert(canon.as_str(), display.as_str())
                        .map_err(|e| StoreError::IoError(e.to_string()))?;
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn set_value(&mut self, path: &str, name: &str, value: RegValue) -> Result<(), StoreError> {
        let canon = canonical(path)?;
        let lower = name.to_lowercase();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        {
            let keys = write_txn
                .open_table(KEYS)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let exists = keys
                .get(canon.as_str())
                .map_err(|e| StoreError::IoError(e.to_string()))?
                .is_some();
            if !exists {
                return Err(StoreError::KeyNotFound(path.to_string()));
            }

            let mut values = write_txn
                .open_table(VALUES)
                .map_err(|e| StoreError::IoError(e.to_string()))?;

            // Keep the case the value was first created with.
            let display = match values
                .get((canon.as_str(), lower.as_str()))
                .map_err(|e| StoreError::IoError(e.to_string()))?
            {
                Some(existing) => postcard::from_bytes::<(String, RegValue)>(existing.value())
                    .map(|(shown, _)| shown)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                None => name.to_string(),
            };

            let bytes = postcard::to_allocvec(&(display, value))
                .map_err(|e| StoreError::SerializationError(e.to_string()))?;
            values
                .insert((canon.as_str(), lower.as_str()), bytes.as_slice())
                .map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn delete_value(&mut self, path: &str, name: &str) -> Result<(), StoreError> {
        let canon = canonical(path)?;
        let lower = name.to_lowercase();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        {
            let keys = write_txn
                .open_table(KEYS)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let exists = keys
                .get(canon.as_str())
                .map_err(|e| StoreError::IoError(e.to_string()))?
                .is_some();
            if !exists {
                return Err(StoreError::KeyNotFound(path.to_string()));
            }

            let mut values = write_txn
                .open_table(VALUES)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let removed = values
                .remove((canon.as_str(), lower.as_str()))
                .map_err(|e| StoreError::IoError(e.to_string()))?
                .is_some();
            if !removed {
                return Err(StoreError::ValueNotFound(name.to_string()));
            }
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn delete_key(&mut self, path: &str) -> Result<(), StoreError> {
        let canon = canonical(path)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
        {
            let mut keys = write_txn
                .open_table(KEYS)
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let mut values = write_txn
                .open_table(VALUES)
                .map_err(|e| StoreError::IoError(e.to_string()))?;

            let mut doomed_keys = Vec::new();
            for entry in keys
                .iter()
                .map_err(|e| StoreError::IoError(e.to_string()))?
            {
                let (candidate, _) = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
                if is_within(&canon, candidate.value()) {
                    doomed_keys.push(candidate.value().to_string());
                }
            }
            if doomed_keys.is_empty() {
                return Err(StoreError::KeyNotFound(path.to_string()));
            }

            let mut doomed_values = Vec::new();
            for entry in values
                .iter()
                .map_err(|e| StoreError::IoError(e.to_string()))?
            {
                let (candidate, _) = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
                let (owner, name) = candidate.value();
                if is_within(&canon, owner) {
                    doomed_values.push((owner.to_string(), name.to_string()));
                }
            }

            for key in &doomed_keys {
                keys.remove(key.as_str())
                    .map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            for (owner, name) in &doomed_values {
                values
                    .remove((owner.as_str(), name.as_str()))
                    .map_err(|e| StoreError::IoError(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::IoError(e.to_string()))?;
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
    use tempfile::tempdir;

    #[test]
    fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");

        store.create_key(r"SOFTWARE\Glazier\Stages").expect("create");
        store
            .set_value(r"SOFTWARE\Glazier\Stages", "_Active", RegValue::string("4"))
            .expect("set");

        let key = store.open_key(r"SOFTWARE\Glazier\Stages").expect("open");
        assert_eq!(key.path(), r"SOFTWARE\Glazier\Stages");
        assert_eq!(
            store.read_string_value(&key, "_Active").expect("read"),
            "4"
        );
    }

    #[test]
    fn open_missing_key_is_not_found() {
        let temp = tempdir().expect("temp dir");
        let store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");

        assert!(matches!(
            store.open_key(r"SOFTWARE\Missing"),
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[test]
    fn missing_value_is_not_found() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key("k").expect("create");

        let key = store.open_key("k").expect("open");
        assert!(matches!(
            store.read_value(&key, "absent"),
            Err(StoreError::ValueNotFound(_))
        ));
    }

    #[test]
    fn dword_is_not_a_string() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key("k").expect("create");
        store.set_value("k", "_Active", RegValue::DWord(0)).expect("set");

        let key = store.open_key("k").expect("open");
        assert!(matches!(
            store.read_string_value(&key, "_Active"),
            Err(StoreError::WrongType {
                found: ValueKind::DWord,
                ..
            })
        ));
    }

    #[test]
    fn set_value_requires_existing_key() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");

        let result = store.set_value("nowhere", "v", RegValue::DWord(1));
        assert!(matches!(result, Err(StoreError::KeyNotFound(_))));
    }

    #[test]
    fn names_match_case_insensitively() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key(r"SOFTWARE\Glazier").expect("create");
        store
            .set_value(r"software\glazier", "Start", RegValue::string("x"))
            .expect("set");
        store
            .set_value(r"SOFTWARE\GLAZIER", "START", RegValue::string("y"))
            .expect("set");

        let key = store.open_key(r"Software\Glazier").expect("open");
        assert_eq!(key.path(), r"SOFTWARE\Glazier");
        assert_eq!(store.read_string_value(&key, "start").expect("read"), "y");
    }

    #[test]
    fn subkeys_lists_direct_children_only() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key(r"Root\1").expect("create");
        store.create_key(r"Root\10\Deep").expect("create");
        store.create_key(r"RootLess\2").expect("create");

        let key = store.open_key("root").expect("open");
        assert_eq!(store.subkeys(&key).expect("subkeys"), vec!["1", "10"]);
    }

    #[test]
    fn delete_key_removes_subtree_and_values() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key(r"root\5").expect("create");
        store.create_key("rootless").expect("create");
        store
            .set_value(r"root\5", "Start", RegValue::string("t"))
            .expect("set");
        store
            .set_value("rootless", "Start", RegValue::string("t"))
            .expect("set");

        store.delete_key("root").expect("delete");
        assert!(store.open_key(r"root\5").is_err());
        assert!(store.open_key("root").is_err());

        // Recreating the key must not resurrect old values.
        store.create_key(r"root\5").expect("recreate");
        let key = store.open_key(r"root\5").expect("open");
        assert!(matches!(
            store.read_value(&key, "Start"),
            Err(StoreError::ValueNotFound(_))
        ));

        let other = store.open_key("rootless").expect("open");
        assert!(store.read_value(&other, "Start").is_ok());
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        assert!(matches!(
            store.delete_key("absent"),
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[test]
    fn delete_value_reports_absence() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key("k").expect("create");
        store.set_value("k", "v", RegValue::QWord(1)).expect("set");

        store.delete_value("k", "V").expect("delete");
        assert!(matches!(
            store.delete_value("k", "v"),
            Err(StoreError::ValueNotFound(_))
        ));
    }

    #[test]
    fn handle_reads_its_snapshot() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbKeyStore::open(temp.path().join("test.redb")).expect("open db");
        store.create_key("k").expect("create");
        store.set_value("k", "v", RegValue::string("old")).expect("set");

        let key = store.open_key("k").expect("open");
        store.set_value("k", "v", RegValue::string("new")).expect("set");

        assert_eq!(store.read_string_value(&key, "v").expect("read"), "old");
        key.close();

        let fresh = store.open_key("k").expect("reopen");
        assert_eq!(store.read_string_value(&fresh, "v").expect("read"), "new");
    }

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        // Phase 1: Create data
        {
            let mut store = RedbKeyStore::open(&db_path).expect("open db");
            store.create_key(r"SOFTWARE\Glazier\Stages\3").expect("create");
            store
                .set_value(r"SOFTWARE\Glazier\Stages", "_Active", RegValue::string("3"))
                .expect("set");
            store
                .set_value(
                    r"SOFTWARE\Glazier\Stages\3",
                    "Start",
                    RegValue::string("2019-11-06T17:37:43.279253"),
                )
                .expect("set");
        }
        // Store dropped here, simulating process exit

        // Phase 2: Reopen and verify all data persisted
        {
            let store = RedbKeyStore::open(&db_path).expect("reopen db");
            let root = store.open_key(r"SOFTWARE\Glazier\Stages").expect("open");
            assert_eq!(
                store.read_string_value(&root, "_Active").expect("read"),
                "3"
            );
            assert_eq!(store.subkeys(&root).expect("subkeys"), vec!["3"]);

            let stage = store.open_key(r"SOFTWARE\Glazier\Stages\3").expect("open");
            assert_eq!(
                store.read_string_value(&stage, "Start").expect("read"),
                "2019-11-06T17:37:43.279253"
            );
        }
    }

    #[test]
    fn read_only_sees_committed_data() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let mut store = RedbKeyStore::open(&db_path).expect("open db");
            store.create_key(r"SOFTWARE\Glazier\Stages\2").expect("create");
            store
                .set_value(r"SOFTWARE\Glazier\Stages", "_Active", RegValue::string("2"))
                .expect("set");
        }

        let store = RedbKeyStore::open_read_only(&db_path).expect("open read-only");
        let root = store.open_key(r"software\glazier\stages").expect("open");
        assert_eq!(
            store.read_string_value(&root, "_active").expect("read"),
            "2"
        );
        assert_eq!(store.subkeys(&root).expect("subkeys"), vec!["2"]);
    }

    #[test]
    fn read_only_leaves_file_untouched() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let mut store = RedbKeyStore::open(&db_path).expect("open db");
            store.create_key("k").expect("create");
            store.set_value("k", "v", RegValue::DWord(7)).expect("set");
        }
        let before = std::fs::read(&db_path).expect("read file");

        {
            let store = RedbKeyStore::open_read_only(&db_path).expect("open read-only");
            let key = store.open_key("k").expect("open");
            assert_eq!(store.read_value(&key, "v").expect("read"), RegValue::DWord(7));
            assert!(matches!(
                store.open_key("missing"),
                Err(StoreError::KeyNotFound(_))
            ));
        }

        let after = std::fs::read(&db_path).expect("read file");
        assert!(before == after, "read-only access modified the database file");
    }

    #[test]
    fn read_only_without_tables_is_empty() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("bare.redb");
        drop(Database::create(&db_path).expect("create bare db"));

        let store = RedbKeyStore::open_read_only(&db_path).expect("open read-only");
        assert!(matches!(
            store.open_key(r"SOFTWARE\Glazier\Stages"),
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[test]
    fn read_only_missing_file_is_error() {
        let temp = tempdir().expect("temp dir");
        let result = RedbKeyStore::open_read_only(temp.path().join("absent.redb"));

        assert!(matches!(result, Err(StoreError::IoError(_))));
        assert!(!temp.path().join("absent.redb").exists());
    }
}
