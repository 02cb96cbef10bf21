//! # Stage State Resolution
//!
//! Reads provisioning stage state from a [`KeyStore`].
//!
//! ## Layout
//!
//! ```text
//! <root>                      _Active = "5"          (REG_SZ)
//! <root>\1                    Start, End
//! ...
//! <root>\5                    Start = "2019-11-06T17:37:43.279253"
//! ```
//!
//! ## Absence
//!
//! | Situation | Result |
//! |-----------|--------|
//! | root key missing | `"0"` |
//! | `_Active` missing | `"0"` |
//! | `_Active` not a string | `TypeMismatch` |
//! | requested stage key missing | `NotFound` |
//! | `Start` missing | `ValueNotFound` (`None` from `record`) |
//! | `End` missing | stage still running (`None`) |
//!
//! Every key opened here is released before the method returns, on success
//! and on every error path.

use crate::store::{KeyStore, PATH_SEPARATOR, join};
use crate::timestamp::parse_timestamp;
use crate::{StageError, StageId, StoreError};
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

// =============================================================================
// STORE LAYOUT
// =============================================================================

/// Root key used by the imaging workflow.
pub const DEFAULT_STAGES_ROOT: &str = r"SOFTWARE\Glazier\Stages";

/// Value under the root naming the stage in progress.
pub const ACTIVE_VALUE: &str = "_Active";

/// Value under a stage key recording when it started.
pub const START_VALUE: &str = "Start";

/// Value under a stage key recording when it finished.
pub const END_VALUE: &str = "End";

// =============================================================================
// STAGE STATUS
// =============================================================================

/// Coarse state of the active stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// No stage has been marked active.
    NotStarted,
    /// The active stage has started and not finished.
    Running,
    /// The active stage has run longer than the configured timeout.
    Expired,
    /// The active stage has an `End` stamp.
    Complete,
}

impl StageStatus {
    /// Get the status name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageStatus::NotStarted => "Not Started",
            StageStatus::Running => "Running",
            StageStatus::Expired => "Expired",
            StageStatus::Complete => "Complete",
        }
    }

    /// Derive the status from a stage's recorded times.
    ///
    /// A stage is expired only when it has no `End` and `now - start` is
    /// strictly greater than `timeout`.
    #[must_use]
    pub fn evaluate(
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        timeout: Option<TimeDelta>,
        now: NaiveDateTime,
    ) -> Self {
        let Some(start) = start else {
            return StageStatus::NotStarted;
        };
        if end.is_some() {
            return StageStatus::Complete;
        }
        match timeout {
            Some(limit) if now.signed_duration_since(start) > limit => StageStatus::Expired,
            _ => StageStatus::Running,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// STAGE REPORT
// =============================================================================

/// Snapshot of the active stage and its recorded times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub root: String,
    pub active: StageId,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub status: StageStatus,
}

impl StageReport {
    /// Time spent in the active stage: up to `End` if present, else up to `now`.
    #[must_use]
    pub fn elapsed(&self, now: NaiveDateTime) -> Option<TimeDelta> {
        self.start
            .map(|start| self.end.unwrap_or(now).signed_duration_since(start))
    }
}

// =============================================================================
// STAGE RECORD
// =============================================================================

/// Start and end of one stage, read through a single key handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    /// `None` while the stage key exists but has not been stamped.
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

// =============================================================================
// STAGE READER
// =============================================================================

/// Read-only view of the stage tree under one root key.
#[derive(Debug)]
pub struct StageReader<'s, S> {
    store: &'s S,
    root: String,
}

impl<'s, S: KeyStore> StageReader<'s, S> {
    /// Create a reader over `store` rooted at `root`.
    #[must_use]
    pub fn new(store: &'s S, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// The root key path.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Identifier of the stage in progress, or `"0"` if none has started.
    ///
    /// # Errors
    ///
    /// Returns `StageError::TypeMismatch` if `_Active` is not string-typed.
    pub fn active_stage(&self) -> Result<StageId, StageError> {
        let key = match self.store.open_key(&self.root) {
            Ok(key) => key,
            Err(StoreError::KeyNotFound(_)) => return Ok(StageId::not_started()),
            Err(source) => return Err(self.store_error(&self.root, source)),
        };

        match self.store.read_string_value(&key, ACTIVE_VALUE) {
            Ok(id) => Ok(StageId::new(id)),
            Err(StoreError::ValueNotFound(_)) => Ok(StageId::not_started()),
            Err(StoreError::WrongType { expected, found }) => Err(StageError::TypeMismatch {
                path: self.root.clone(),
                name: ACTIVE_VALUE.to_string(),
                expected,
                found,
            }),
            Err(source) => Err(self.store_error(&self.root, source)),
        }
    }

    /// When `stage` started.
    ///
    /// # Errors
    ///
    /// - `StageError::NotFound` if the stage has no sub-key
    /// - `StageError::ValueNotFound` if it has no `Start` value
    /// - `StageError::TypeMismatch` if `Start` is not string-typed
    /// - `StageError::Parse` if `Start` is not in the timestamp layout
    pub fn active_time(&self, stage: &str) -> Result<NaiveDateTime, StageError> {
        let (key, path) = self.open_stage(stage)?;
        self.read_timestamp(&key, &path, START_VALUE)?
            .ok_or_else(|| StageError::ValueNotFound {
                path,
                name: START_VALUE.to_string(),
            })
    }

    /// When `stage` finished, or `None` while it is still running.
    pub fn end_time(&self, stage: &str) -> Result<Option<NaiveDateTime>, StageError> {
        let (key, path) = self.open_stage(stage)?;
        self.read_timestamp(&key, &path, END_VALUE)
    }

    /// `Start` and `End` of `stage`, both read from the same snapshot.
    ///
    /// Either value may be absent. A value that is present but wrong-typed
    /// or malformed is an error, as in [`Self::active_time`].
    pub fn record(&self, stage: &str) -> Result<StageRecord, StageError> {
        let (key, path) = self.open_stage(stage)?;
        let start = self.read_timestamp(&key, &path, START_VALUE)?;
        let end = self.read_timestamp(&key, &path, END_VALUE)?;
        Ok(StageRecord {
            stage: StageId::new(stage),
            start,
            end,
        })
    }

    /// Every stage recorded under the root, in ordinal order.
    ///
    /// Names that are not plain digits sort first, by name. A missing root
    /// yields an empty list.
    pub fn stages(&self) -> Result<Vec<StageId>, StageError> {
        let key = match self.store.open_key(&self.root) {
            Ok(key) => key,
            Err(StoreError::KeyNotFound(_)) => return Ok(Vec::new()),
            Err(source) => return Err(self.store_error(&self.root, source)),
        };

        let mut ids: Vec<StageId> = self
            .store
            .subkeys(&key)
            .map_err(|source| self.store_error(&self.root, source))?
            .into_iter()
            .map(StageId::new)
            .collect();
        ids.sort_by(StageId::cmp_ordinal);
        Ok(ids)
    }

    /// Active stage, its times and derived status.
    ///
    /// # Errors
    ///
    /// Besides the errors of [`Self::active_stage`], a started active stage
    /// whose record is missing or malformed is an error: the marker asserts
    /// the record exists.
    pub fn report(
        &self,
        now: NaiveDateTime,
        timeout: Option<TimeDelta>,
    ) -> Result<StageReport, StageError> {
        let active = self.active_stage()?;
        if !active.is_started() {
            return Ok(StageReport {
                root: self.root.clone(),
                active,
                start: None,
                end: None,
                status: StageStatus::NotStarted,
            });
        }

        let record = self.record(active.as_str())?;
        let Some(start) = record.start else {
            return Err(StageError::ValueNotFound {
                path: join(&self.root, active.as_str()),
                name: START_VALUE.to_string(),
            });
        };
        let end = record.end;
        Ok(StageReport {
            root: self.root.clone(),
            status: StageStatus::evaluate(Some(start), end, timeout, now),
            active,
            start: Some(start),
            end,
        })
    }

    /// Open `<root>\<stage>`, returning the handle and the path it was
    /// opened with.
    fn open_stage(&self, stage: &str) -> Result<(S::Key, String), StageError> {
        if stage.is_empty() || stage.contains(PATH_SEPARATOR) {
            return Err(StageError::InvalidStageId(stage.to_string()));
        }

        let path = join(&self.root, stage);
        match self.store.open_key(&path) {
            Ok(key) => Ok((key, path)),
            Err(StoreError::KeyNotFound(_)) => Err(StageError::NotFound { path }),
            Err(source) => Err(self.store_error(&path, source)),
        }
    }

    /// Read and parse a timestamp value; `None` if the value is absent.
    fn read_timestamp(
        &self,
        key: &S::Key,
        path: &str,
        name: &str,
    ) -> Result<Option<NaiveDateTime>, StageError> {
        let literal = match self.store.read_string_value(key, name) {
            Ok(literal) => literal,
            Err(StoreError::ValueNotFound(_)) => return Ok(None),
            Err(StoreError::WrongType { expected, found }) => {
                return Err(StageError::TypeMismatch {
                    path: path.to_string(),
                    name: name.to_string(),
                    expected,
                    found,
                });
            }
            Err(source) => return Err(self.store_error(path, source)),
        };

        parse_timestamp(&literal)
            .map(Some)
            .map_err(|reason| StageError::Parse {
                path: path.to_string(),
                literal,
                reason,
            })
    }

    fn store_error(&self, path: &str, source: StoreError) -> StageError {
        StageError::Store {
            path: path.to_string(),
            source,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
