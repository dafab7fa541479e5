//! inapp-sync: reconcile in-app message schedules against remote data.
//!
//! A client-side cache-coherency core: remote configuration payloads are
//! the source of truth, locally-held message schedules are a materialized
//! view. The engine keeps the two coherent under concurrent refresh
//! attempts.
//!
//! # Architecture
//!
//! Independent pieces wired together by the [`engine`] facade:
//! - **Reconcile**: pure create/update/delete diff between the previous
//!   schedule set and a fetched payload, with end-time and new-user cutoff
//!   filtering
//! - **Version store**: per-source version records with a
//!   reject-superseded-writes commit, persisted through a key-value
//!   preference store
//! - **Staleness**: cheap per-schedule freshness checks against the store
//! - **Refresh**: per-source `Idle / FetchInFlight / Settled` state machine
//!   guaranteeing at most one in-flight fetch per source, with waiter
//!   fan-in
//!
//! Transport and schedule lifecycle stay outside: implement
//! [`RemoteDataProvider`] over your transport and [`ScheduleHost`] over
//! your scheduler, and hand both to the engine.

pub mod config;
pub mod cutoff;
pub mod engine;
pub mod error;
pub mod prefs;
pub mod reconcile;
pub mod refresh;
pub mod schedule;
pub mod staleness;
pub mod store;

pub use config::SyncConfig;
pub use cutoff::CutoffPolicy;
pub use engine::{RemoteDataProvider, RemoteDataSyncEngine, ScheduleHost};
pub use error::{Result, SyncError};
pub use prefs::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use reconcile::{reconcile, ScheduleDiff};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use schedule::{RemoteDataInfo, RemotePayload, Schedule, ScheduleDraft, ScheduleEdits};
pub use staleness::StalenessTracker;
pub use store::{SourceRecord, VersionStore};
