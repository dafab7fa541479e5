//! Per-schedule freshness checks.
//!
//! Two different questions with different costs. "Is this schedule up to
//! date?" is a cheap metadata comparison against the version store. "Does
//! it require a refresh before being evaluated?" is the stronger test that
//! justifies forcing network work: it only holds when local knowledge is
//! insufficient to judge freshness at all, i.e. the schedule claims a
//! source the store has never recorded a payload for.

use crate::schedule::Schedule;
use crate::store::VersionStore;
use std::sync::Arc;

/// Answers freshness questions by comparing schedule stamps against the
/// version store.
#[derive(Clone)]
pub struct StalenessTracker {
    store: Arc<VersionStore>,
}

impl StalenessTracker {
    /// Create a tracker over `store`.
    #[must_use]
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self { store }
    }

    /// Returns `true` if `schedule` reflects the latest processed payload
    /// of its source.
    ///
    /// Schedules without a remote origin are trivially current.
    #[must_use]
    pub fn is_up_to_date(&self, schedule: &Schedule) -> bool {
        match &schedule.remote_data_info {
            None => true,
            Some(info) => self.store.last_modified(&info.source) == Some(info.last_modified),
        }
    }

    /// Returns `true` if `schedule` must not be evaluated before an active
    /// refresh of its source.
    ///
    /// A schedule that is merely behind a payload we have already processed
    /// does not require one; the best-effort path covers it.
    #[must_use]
    pub fn requires_refresh(&self, schedule: &Schedule) -> bool {
        match &schedule.remote_data_info {
            None => false,
            Some(info) => {
                !self.is_up_to_date(schedule) && self.store.record(&info.source).is_none()
            }
        }
    }
}
