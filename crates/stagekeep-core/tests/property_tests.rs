//! # Property-Based Tests
//!
//! Invariants of the active marker and the timestamp layout, checked with
//! proptest against the in-memory store.

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use stagekeep_core::{
    ACTIVE_VALUE, KeyStoreWriter, MemoryStore, RegValue, START_VALUE, StageError, StageReader,
    format_timestamp, parse_timestamp,
};

const ROOT: &str = r"SOFTWARE\Glazier\Stages";

fn datetime() -> impl Strategy<Value = NaiveDateTime> {
    (
        1970i32..2100,
        1u32..=12,
        1u32..=28,
        0u32..24,
        0u32..60,
        0u32..60,
        0u32..1_000_000,
    )
        .prop_filter_map("valid datetime", |(y, mo, d, h, mi, s, us)| {
            NaiveDate::from_ymd_opt(y, mo, d).and_then(|date| date.and_hms_micro_opt(h, mi, s, us))
        })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// A string marker comes back exactly as written.
    #[test]
    fn active_marker_returned_verbatim(marker in "\\PC*") {
        let mut store = MemoryStore::new();
        store.create_key(ROOT).expect("create");
        store
            .set_value(ROOT, ACTIVE_VALUE, RegValue::string(marker.clone()))
            .expect("set");

        let stage = StageReader::new(&store, ROOT).active_stage().expect("active");
        prop_assert_eq!(stage.as_str(), marker.as_str());
        prop_assert_eq!(store.open_handles(), 0);
    }

    /// A marker of any non-string type is rejected.
    #[test]
    fn non_string_marker_rejected(n in any::<u32>()) {
        let mut store = MemoryStore::new();
        store.create_key(ROOT).expect("create");
        store
            .set_value(ROOT, ACTIVE_VALUE, RegValue::DWord(n))
            .expect("set");

        let result = StageReader::new(&store, ROOT).active_stage();
        let is_type_mismatch = matches!(result, Err(StageError::TypeMismatch { .. }));
        prop_assert!(is_type_mismatch);
    }

    /// Any root that was never created resolves to the sentinel.
    #[test]
    fn missing_root_is_not_started(name in "[A-Za-z0-9_]{1,16}") {
        let store = MemoryStore::new();
        let root = format!(r"SOFTWARE\{name}");

        let stage = StageReader::new(&store, root).active_stage().expect("active");
        prop_assert!(!stage.is_started());
    }

    /// Formatting then parsing gives the same instant back.
    #[test]
    fn timestamp_round_trip(ts in datetime()) {
        let literal = format_timestamp(&ts);
        prop_assert_eq!(literal.len(), 26);
        prop_assert_eq!(parse_timestamp(&literal).expect("parse"), ts);
    }

    /// A recorded start time is read back unchanged through the store.
    #[test]
    fn start_time_read_back(ts in datetime(), stage in 1u32..100) {
        let mut store = MemoryStore::new();
        let id = stage.to_string();
        let path = format!(r"{ROOT}\{id}");
        store.create_key(&path).expect("create");
        store
            .set_value(&path, START_VALUE, RegValue::string(format_timestamp(&ts)))
            .expect("set");

        let read = StageReader::new(&store, ROOT).active_time(&id).expect("time");
        prop_assert_eq!(read, ts);
    }

    /// Dropping any single character of a valid literal makes it invalid.
    #[test]
    fn truncated_literal_rejected(ts in datetime(), cut in 0usize..26) {
        let mut literal = format_timestamp(&ts);
        literal.remove(cut);
        prop_assert!(parse_timestamp(&literal).is_err());
    }
}
