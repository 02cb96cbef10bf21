//! # stagekeep-core
//!
//! Read-only accessor for provisioning stage state - THE ACCESSOR.
//!
//! An imaging workflow records its progress in a registry-shaped key-value
//! store: one sub-key per stage under a root key, a `_Active` marker naming
//! the stage in progress, and `Start`/`End` timestamps per stage. This crate
//! answers two questions about that state:
//! - which stage is active (`"0"` if none has started)
//! - when a given stage started
//!
//! ## Architecture
//!
//! - `store`: the [`KeyStore`] trait plus in-memory and redb backends
//! - `system`: [`StageReader`], the resolvers built on `KeyStore`
//! - `timestamp`: the fixed `YYYY-MM-DDTHH:MM:SS.ffffff` codec
//! - `types`: ids, typed values and errors
//!
//! ## Constraints
//!
//! - Never writes stage state; advancing stages belongs to other tooling
//! - Synchronous, no logging: every outcome is reported through `Result`
//! - Every key handle opened is released before a resolver returns

// =============================================================================
// MODULES
// =============================================================================

pub mod store;
pub mod system;
pub mod timestamp;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{NOT_STARTED, RegValue, StageError, StageId, StoreError, ValueKind};

// =============================================================================
// RE-EXPORTS: Key Store
// =============================================================================

pub use store::{
    KeyHandle, KeyStore, KeyStoreWriter, MemoryStore, ReadOnlyRedbKeyStore, RedbKeyStore,
};

// =============================================================================
// RE-EXPORTS: Stage Resolution
// =============================================================================

pub use system::{
    ACTIVE_VALUE, DEFAULT_STAGES_ROOT, END_VALUE, START_VALUE, StageReader, StageRecord,
    StageReport, StageStatus,
};
pub use timestamp::{TIMESTAMP_FORMAT, format_timestamp, parse_timestamp};
