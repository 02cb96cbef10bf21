//! # Core Type Definitions
//!
//! This module contains the shared types of the stage-state accessor:
//! - Stage identifiers (`StageId`) and the "not yet started" sentinel
//! - Registry-shaped typed values (`RegValue`, `ValueKind`)
//! - Error types (`StoreError` for the key store, `StageError` for resolvers)
//!
//! ## Absence vs. Faults
//!
//! A missing root key or `_Active` marker is normal initial state and never
//! becomes an error; it is represented by [`StageId::not_started`]. Everything
//! else that is missing or malformed surfaces as a [`StageError`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

// =============================================================================
// STAGE IDENTIFIER
// =============================================================================

/// Reserved stage identifier meaning "process not yet started".
pub const NOT_STARTED: &str = "0";

/// Identifier of one stage: the name of its sub-key under the root and the
/// content of the `_Active` marker.
///
/// Identifiers are kept verbatim as read from the store. They are usually a
/// string of digits, but nothing is normalized or validated on read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Create a stage id from its textual form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel id `"0"`.
    #[must_use]
    pub fn not_started() -> Self {
        Self(NOT_STARTED.to_string())
    }

    /// True unless this is the sentinel `"0"`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.0 != NOT_STARTED
    }

    /// Numeric ordinal, when the id is a plain string of digits that fits
    /// in a `u64`.
    #[must_use]
    pub fn ordinal(&self) -> Option<u64> {
        self.digits()?;
        self.0.parse().ok()
    }

    /// Listing order: ids that are not plain digits first, by text, then
    /// digit ids by numeric value whatever their length.
    ///
    /// Digit ids of equal value (`"01"` and `"1"`) fall back to text order.
    #[must_use]
    pub fn cmp_ordinal(&self, other: &Self) -> Ordering {
        match (self.digits(), other.digits()) {
            (None, None) => self.0.cmp(&other.0),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
        }
    }

    /// The significant digits (leading zeros stripped) of a plain digit id.
    fn digits(&self) -> Option<&str> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(self.0.trim_start_matches('0'))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// A typed value stored under a key, modelled on registry value types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegValue {
    /// REG_SZ
    String(String),
    /// REG_EXPAND_SZ (stored unexpanded)
    ExpandString(String),
    /// REG_MULTI_SZ
    MultiString(Vec<String>),
    /// REG_DWORD
    DWord(u32),
    /// REG_QWORD
    QWord(u64),
    /// REG_BINARY
    Binary(Vec<u8>),
}

impl RegValue {
    /// Convenience constructor for a REG_SZ value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// The type tag of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::ExpandString(_) => ValueKind::ExpandString,
            Self::MultiString(_) => ValueKind::MultiString,
            Self::DWord(_) => ValueKind::DWord,
            Self::QWord(_) => ValueKind::QWord,
            Self::Binary(_) => ValueKind::Binary,
        }
    }

    /// Borrow the text of a string-typed value (REG_SZ or REG_EXPAND_SZ).
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::ExpandString(s) => Some(s),
            _ => None,
        }
    }
}

/// Type tag of a [`RegValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    ExpandString,
    MultiString,
    DWord,
    QWord,
    Binary,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "REG_SZ",
            Self::ExpandString => "REG_EXPAND_SZ",
            Self::MultiString => "REG_MULTI_SZ",
            Self::DWord => "REG_DWORD",
            Self::QWord => "REG_QWORD",
            Self::Binary => "REG_BINARY",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by a key store backend.
///
/// `KeyNotFound` and `ValueNotFound` are plain signals: callers decide whether
/// absence is normal or a fault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No key exists at the given path.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but has no value with the given name.
    #[error("Value not found: {0}")]
    ValueNotFound(String),

    /// The value exists but is not of the requested type.
    #[error("Wrong value type: expected {expected}, found {found}")]
    WrongType {
        expected: ValueKind,
        found: ValueKind,
    },

    /// The path is empty or has an empty segment.
    #[error("Invalid key path: {0:?}")]
    InvalidPath(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred in the backing database.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Errors returned by the stage resolvers.
///
/// Every variant carries the key path it concerns so callers can report the
/// failure without extra bookkeeping.
#[derive(Debug, Error)]
pub enum StageError {
    /// A specifically requested stage has no sub-key.
    #[error("Stage key not found: {path}")]
    NotFound { path: String },

    /// A stage record lacks a value it must carry.
    #[error("Value {name:?} not found under {path}")]
    ValueNotFound { path: String, name: String },

    /// A value exists with the wrong underlying type.
    #[error("Value {name:?} under {path} is {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// A timestamp value does not follow the fixed layout.
    #[error("Malformed timestamp {literal:?} under {path}: {reason}")]
    Parse {
        path: String,
        literal: String,
        reason: String,
    },

    /// The stage id cannot be used as a single path segment.
    #[error("Invalid stage identifier: {0:?}")]
    InvalidStageId(String),

    /// Any other key store failure.
    #[error("Key store error at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

impl StageError {
    /// True for the "requested stage does not exist" fault.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================
