//! Per-source version records.
//!
//! The [`VersionStore`] remembers, for each remote source, the version of
//! the last successfully processed payload and the schedule ids that payload
//! produced. It is the single shared mutable resource across concurrent
//! reconcile cycles, so [`VersionStore::commit`] is the one place a
//! compare-and-swap discipline applies: a commit carrying metadata the store
//! has already superseded is rejected with
//! [`SyncError::StaleCommit`](crate::error::SyncError::StaleCommit).

use crate::error::{Result, SyncError};
use crate::prefs::PreferenceStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const SOURCES_KEY: &str = "inapp-sync.remote-sources";

/// What the store knows about one remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Version of the last successfully processed payload.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    /// Schedule ids that payload produced. Drives deletion on the next
    /// reconcile: anything here that the next payload drops gets deleted.
    pub schedule_ids: HashSet<String>,
}

/// Persistent map of remote source → [`SourceRecord`].
///
/// Records are created on the first successful commit per source and only
/// ever advance; they are never deleted. A source missing from a later
/// snapshot simply commits an empty id set, turning all its schedules into
/// deletions.
pub struct VersionStore {
    prefs: Arc<dyn PreferenceStore>,
    records: Mutex<HashMap<String, SourceRecord>>,
}

impl VersionStore {
    /// Load the persisted records from `prefs`.
    ///
    /// An unreadable record blob logs a warning and starts empty; the next
    /// commit rewrites it.
    #[must_use]
    pub fn load(prefs: Arc<dyn PreferenceStore>) -> Self {
        let records = match prefs.get(SOURCES_KEY) {
            Some(json) => match serde_json::from_str(&json) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("stored source records unreadable, starting fresh: {e}");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        Self {
            prefs,
            records: Mutex::new(records),
        }
    }

    /// The full record for `source`, if it has ever been committed.
    #[must_use]
    pub fn record(&self, source: &str) -> Option<SourceRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .cloned()
    }

    /// Version of the last processed payload for `source`.
    #[must_use]
    pub fn last_modified(&self, source: &str) -> Option<DateTime<Utc>> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .map(|r| r.last_modified)
    }

    /// Every source with a committed record.
    ///
    /// Drives retirement: a recorded source absent from a fresh snapshot
    /// has all its schedules deleted.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Schedule ids last known to originate from `source`.
    #[must_use]
    pub fn schedule_ids(&self, source: &str) -> HashSet<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .map(|r| r.schedule_ids.clone())
            .unwrap_or_default()
    }

    /// Atomically replace the record for `source`.
    ///
    /// Rejects the commit with `StaleCommit` when the stored version is
    /// already strictly newer than `last_modified`, so a cycle that raced
    /// against a fresher one cannot regress the store. Re-committing equal
    /// metadata is accepted: cycles must be idempotent.
    ///
    /// The record is persisted before the in-memory map is updated; a
    /// persistence failure leaves the store unchanged so the cycle is
    /// retried on the next trigger.
    pub fn commit(
        &self,
        source: &str,
        last_modified: DateTime<Utc>,
        schedule_ids: HashSet<String>,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = records.get(source) {
            if existing.last_modified > last_modified {
                return Err(SyncError::StaleCommit {
                    source_id: source.to_owned(),
                });
            }
        }

        let mut updated = records.clone();
        updated.insert(
            source.to_owned(),
            SourceRecord {
                last_modified,
                schedule_ids,
            },
        );

        let json = serde_json::to_string(&updated)?;
        self.prefs.put(SOURCES_KEY, &json)?;
        *records = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::prefs::MemoryPreferenceStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ids(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn store() -> VersionStore {
        VersionStore::load(Arc::new(MemoryPreferenceStore::new()))
    }

    #[test]
    fn unknown_source_has_no_record() {
        let store = store();
        assert!(store.record("app").is_none());
        assert!(store.last_modified("app").is_none());
        assert!(store.schedule_ids("app").is_empty());
    }

    #[test]
    fn sources_lists_every_committed_record() {
        let store = store();
        assert!(store.sources().is_empty());

        store.commit("app", at(100), ids(&["a"])).unwrap();
        store.commit("contact", at(100), ids(&[])).unwrap();

        let mut sources = store.sources();
        sources.sort();
        assert_eq!(sources, vec!["app".to_owned(), "contact".to_owned()]);
    }

    #[test]
    fn commit_then_read_back() {
        let store = store();
        store.commit("app", at(100), ids(&["a", "b"])).unwrap();

        assert_eq!(store.last_modified("app"), Some(at(100)));
        assert_eq!(store.schedule_ids("app"), ids(&["a", "b"]));
    }

    #[test]
    fn newer_commit_advances() {
        let store = store();
        store.commit("app", at(100), ids(&["a"])).unwrap();
        store.commit("app", at(200), ids(&["b"])).unwrap();

        assert_eq!(store.last_modified("app"), Some(at(200)));
        assert_eq!(store.schedule_ids("app"), ids(&["b"]));
    }

    #[test]
    fn late_older_commit_is_rejected() {
        let store = store();
        store.commit("app", at(200), ids(&["v2"])).unwrap();

        let late = store.commit("app", at(100), ids(&["v1"]));
        assert!(matches!(late, Err(SyncError::StaleCommit { .. })));

        // Store retains the newer record.
        assert_eq!(store.last_modified("app"), Some(at(200)));
        assert_eq!(store.schedule_ids("app"), ids(&["v2"]));
    }

    #[test]
    fn equal_commit_is_idempotent() {
        let store = store();
        store.commit("app", at(100), ids(&["a"])).unwrap();
        store.commit("app", at(100), ids(&["a", "b"])).unwrap();
        assert_eq!(store.schedule_ids("app"), ids(&["a", "b"]));
    }

    #[test]
    fn sources_are_independent() {
        let store = store();
        store.commit("app", at(300), ids(&["a"])).unwrap();
        store.commit("contact", at(100), ids(&["c"])).unwrap();

        assert_eq!(store.last_modified("app"), Some(at(300)));
        assert_eq!(store.last_modified("contact"), Some(at(100)));
    }

    #[test]
    fn monotonic_under_any_commit_order() {
        let store = store();
        let stamps = [at(50), at(300), at(100), at(300), at(200)];
        for stamp in stamps {
            let _ = store.commit("app", stamp, ids(&[]));
        }
        assert_eq!(store.last_modified("app"), Some(at(300)));
    }

    #[test]
    fn records_survive_reload() {
        let prefs: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        let store = VersionStore::load(prefs.clone());
        store.commit("app", at(100), ids(&["a"])).unwrap();

        let reloaded = VersionStore::load(prefs);
        assert_eq!(reloaded.last_modified("app"), Some(at(100)));
        assert_eq!(reloaded.schedule_ids("app"), ids(&["a"]));
    }

    #[test]
    fn corrupt_persisted_records_start_fresh() {
        let prefs: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        prefs.put("inapp-sync.remote-sources", "not json").unwrap();

        let store = VersionStore::load(prefs);
        assert!(store.record("app").is_none());
    }

    struct FailingStore;

    impl PreferenceStore for FailingStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
        fn put(&self, _key: &str, _value: &str) -> Result<()> {
            Err(SyncError::Persistence("disk full".to_owned()))
        }
    }

    #[test]
    fn persistence_failure_leaves_store_unchanged() {
        let store = VersionStore::load(Arc::new(FailingStore));
        let result = store.commit("app", at(100), ids(&["a"]));
        assert!(matches!(result, Err(SyncError::Persistence(_))));
        assert!(store.record("app").is_none());
    }
}
