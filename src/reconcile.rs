//! Pure diff between a previous schedule set and a fetched payload.
//!
//! [`reconcile`] has no side effects and no hidden inputs: given identical
//! arguments it produces identical diffs. Callers apply the diff through
//! their host and commit the version store atomically with respect to it.
//! Application order is create → update → delete within one cycle to avoid
//! transient gaps.

use crate::schedule::{RemotePayload, Schedule, ScheduleEdits};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// The create/update/delete diff produced by one reconcile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleDiff {
    /// Schedules to create, stamped with the payload's version.
    pub create: Vec<Schedule>,
    /// Edits to apply to existing schedules. The version stamp is always
    /// part of the edit.
    pub update: Vec<(String, ScheduleEdits)>,
    /// Schedules to delete: previously known from this source, absent from
    /// the filtered payload.
    pub delete: Vec<String>,
}

impl ScheduleDiff {
    /// Returns `true` if the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Diff `payload` against the schedule ids previously known for its source.
///
/// Drafts are treated as absent when their end time is already past at
/// `now`, or when they target new users only and the install does not count
/// as new (`now >= cutoff`). Remaining drafts become creates or updates
/// depending on membership in `previous`; anything in `previous` the
/// filtered payload no longer carries becomes a delete.
#[must_use]
pub fn reconcile(
    previous: &HashSet<String>,
    payload: &RemotePayload,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ScheduleDiff {
    let info = payload.info();
    let mut diff = ScheduleDiff::default();
    let mut retained: HashSet<&str> = HashSet::new();

    for draft in &payload.drafts {
        if draft.end.is_some_and(|end| end < now) {
            continue;
        }
        if draft.new_user_only && now >= cutoff {
            continue;
        }
        retained.insert(draft.id.as_str());

        if previous.contains(&draft.id) {
            let edits = ScheduleEdits {
                message: Some(draft.message.clone()),
                end: Some(draft.end),
                remote_data_info: Some(info.clone()),
            };
            diff.update.push((draft.id.clone(), edits));
        } else {
            diff.create.push(Schedule {
                id: draft.id.clone(),
                message: draft.message.clone(),
                end: draft.end,
                remote_data_info: Some(info.clone()),
            });
        }
    }

    diff.delete = previous
        .iter()
        .filter(|id| !retained.contains(id.as_str()))
        .cloned()
        .collect();

    diff
}
