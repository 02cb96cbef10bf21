//! # Key Store Abstraction
//!
//! The stage resolvers never touch a concrete store. They go through
//! [`KeyStore`], a registry-shaped capability set:
//! - open a key by its backslash-delimited path
//! - read a typed value from an open key
//! - release the key (by dropping or closing its handle)
//!
//! [`KeyStoreWriter`] adds the create/set/delete primitives of the same store.
//! Nothing in this crate builds stage-advancing logic on it; it exists so the
//! store model is complete and fixtures can be laid down.
//!
//! ## Storage Backends
//!
//! - [`MemoryStore`]: in-memory, counts live handles (for tests)
//! - [`RedbKeyStore`]: disk-backed on a redb database; [`ReadOnlyRedbKeyStore`]
//!   reads the same file without write access
//!
//! ## Naming
//!
//! Key and value names match case-insensitively. The case a name was first
//! created with is preserved for display.

mod memory;
mod redb_store;

pub use memory::{MemoryKey, MemoryStore};
pub use redb_store::{ReadOnlyRedbKeyStore, RedbKey, RedbKeyStore};

use crate::{RegValue, StoreError, ValueKind};

/// Separator between key path segments.
pub const PATH_SEPARATOR: char = '\\';

// =============================================================================
// KEY HANDLE
// =============================================================================

/// An open key.
///
/// Whatever a handle holds (a read transaction, a lease on a handle counter)
/// is released when it is dropped. `close` makes the release explicit; since
/// it consumes the handle, a key cannot be closed twice.
pub trait KeyHandle {
    /// The path the key was opened with, in display case.
    fn path(&self) -> &str;

    /// Release the key.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

// =============================================================================
// KEYSTORE TRAITS
// =============================================================================

/// Read access to a hierarchical key-value store.
pub trait KeyStore {
    /// Handle type for an open key.
    type Key: KeyHandle;

    /// Open the key at `path` for reading.
    ///
    /// Returns `StoreError::KeyNotFound` if no key exists there.
    fn open_key(&self, path: &str) -> Result<Self::Key, StoreError>;

    /// Read a value of any type.
    ///
    /// Returns `StoreError::ValueNotFound` if the key has no such value.
    fn read_value(&self, key: &Self::Key, name: &str) -> Result<RegValue, StoreError>;

    /// Names of the direct child keys, in display case.
    fn subkeys(&self, key: &Self::Key) -> Result<Vec<String>, StoreError>;

    /// Read a string-typed value (REG_SZ or REG_EXPAND_SZ).
    ///
    /// Returns `StoreError::WrongType` for any other type; nothing is coerced.
    fn read_string_value(&self, key: &Self::Key, name: &str) -> Result<String, StoreError> {
        match self.read_value(key, name)? {
            RegValue::String(s) | RegValue::ExpandString(s) => Ok(s),
            other => Err(StoreError::WrongType {
                expected: ValueKind::String,
                found: other.kind(),
            }),
        }
    }
}

/// Write access to a hierarchical key-value store.
pub trait KeyStoreWriter: KeyStore {
    /// Create the key at `path` and any missing parents. Existing keys are
    /// left untouched.
    fn create_key(&mut self, path: &str) -> Result<(), StoreError>;

    /// Set a value on an existing key, replacing any previous value of the
    /// same name.
    fn set_value(&mut self, path: &str, name: &str, value: RegValue) -> Result<(), StoreError>;

    /// Remove a value. Returns `StoreError::ValueNotFound` if it was absent.
    fn delete_value(&mut self, path: &str, name: &str) -> Result<(), StoreError>;

    /// Remove a key with all its values and descendants.
    fn delete_key(&mut self, path: &str) -> Result<(), StoreError>;
}

// =============================================================================
// PATH HELPERS
// =============================================================================

/// Split a path into its segments, ignoring leading and trailing separators.
///
/// Returns `StoreError::InvalidPath` for an empty path or an empty segment.
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let parts: Vec<&str> = trimmed.split(PATH_SEPARATOR).collect();
    if parts.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Case-folded form of a path, used as the lookup key by backends.
pub fn canonical(path: &str) -> Result<String, StoreError> {
    let parts = segments(path)?;
    Ok(parts
        .iter()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join("\\"))
}

/// Display form of a path: separators trimmed, case kept.
pub fn display(path: &str) -> Result<String, StoreError> {
    Ok(segments(path)?.join("\\"))
}

/// Append one segment to a path.
#[must_use]
pub fn join(root: &str, segment: &str) -> String {
    let root = root.trim_end_matches(PATH_SEPARATOR);
    format!("{root}{PATH_SEPARATOR}{segment}")
}

/// Name of the direct child of `parent` that `candidate` denotes, if any.
///
/// Both paths must already be canonical.
pub(crate) fn direct_child<'a>(parent: &str, candidate: &'a str) -> Option<&'a str> {
    let rest = candidate.strip_prefix(parent)?.strip_prefix(PATH_SEPARATOR)?;
    (!rest.is_empty() && !rest.contains(PATH_SEPARATOR)).then_some(rest)
}

/// True if `candidate` is `path` itself or lies below it. Canonical paths.
pub(crate) fn is_within(path: &str, candidate: &str) -> bool {
    candidate == path
        || candidate
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}

/// Every ancestor prefix of a canonical path, outermost first, path included.
pub(crate) fn prefixes(parts: &[&str]) -> Vec<String> {
    (1..=parts.len()).map(|n| parts[..n].join("\\")).collect()
}

// =============================================================================
// TESTS
// =============================================================================
