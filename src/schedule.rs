//! Schedule data model shared between the engine and its host.
//!
//! A [`Schedule`] is a locally-held in-app message schedule. Schedules that
//! originate from remote data carry a [`RemoteDataInfo`] stamp recording
//! which source produced them and how fresh that source was at the time;
//! schedules created locally carry none and are trivially current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version metadata for one remote source.
///
/// `last_modified` is the freshness token: for a given `source`, a newer
/// `last_modified` supersedes an older one. Comparisons never mutate it;
/// only a reconcile cycle that re-creates or updates a schedule replaces
/// the stamp attached to that schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDataInfo {
    /// Remote source identifier (e.g. `"app"`, `"contact"`).
    pub source: String,
    /// Version of the source's payload when this stamp was taken.
    pub last_modified: DateTime<Utc>,
}

impl RemoteDataInfo {
    /// Create a stamp for `source` at `last_modified`.
    #[must_use]
    pub fn new(source: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            last_modified,
        }
    }

    /// Returns `true` if this stamp is strictly newer than `other` for the
    /// same source. Stamps from different sources never supersede each other.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.source == other.source && self.last_modified > other.last_modified
    }
}

/// A locally-held in-app message schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule identifier.
    pub id: String,
    /// Opaque message content. Parsed and displayed by the host, never
    /// interpreted here.
    pub message: Value,
    /// Instant after which the schedule is no longer eligible, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Remote origin stamp. `None` for schedules not sourced from remote
    /// data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_data_info: Option<RemoteDataInfo>,
}

impl Schedule {
    /// Create a schedule with no end time and no remote origin.
    #[must_use]
    pub fn new(id: impl Into<String>, message: Value) -> Self {
        Self {
            id: id.into(),
            message,
            end: None,
            remote_data_info: None,
        }
    }
}

/// The remote-side shape of a schedule, before it is adopted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    /// Unique schedule identifier.
    pub id: String,
    /// Opaque message content.
    pub message: Value,
    /// Instant after which the schedule is no longer eligible, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Whether the message targets newly-onboarded installs only.
    #[serde(default)]
    pub new_user_only: bool,
}

/// One remote source's fetched payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePayload {
    /// Remote source identifier.
    pub source: String,
    /// Version of the payload.
    pub last_modified: DateTime<Utc>,
    /// Schedule drafts present in this payload.
    pub drafts: Vec<ScheduleDraft>,
    /// Opaque constraint configuration, passed through to the host
    /// uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
}

impl RemotePayload {
    /// The [`RemoteDataInfo`] stamp reconciled schedules receive from this
    /// payload.
    #[must_use]
    pub fn info(&self) -> RemoteDataInfo {
        RemoteDataInfo::new(self.source.clone(), self.last_modified)
    }
}

/// A partial edit applied to an existing schedule.
///
/// `None` fields are left unchanged. `end` uses a nested option so an edit
/// can also clear an end time (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleEdits {
    /// Replacement message content.
    pub message: Option<Value>,
    /// Replacement end time. Outer `None` leaves the end time unchanged;
    /// `Some(None)` clears it.
    pub end: Option<Option<DateTime<Utc>>>,
    /// Replacement remote origin stamp.
    pub remote_data_info: Option<RemoteDataInfo>,
}

impl ScheduleEdits {
    /// Edits that end a schedule at `instant`, used to apply deletions: the
    /// host owns schedule lifecycle and drops expired schedules itself.
    #[must_use]
    pub fn expire(instant: DateTime<Utc>) -> Self {
        Self {
            message: None,
            end: Some(Some(instant)),
            remote_data_info: None,
        }
    }

    /// Apply these edits to `schedule` in place.
    pub fn apply(&self, schedule: &mut Schedule) {
        if let Some(message) = &self.message {
            schedule.message = message.clone();
        }
        if let Some(end) = self.end {
            schedule.end = end;
        }
        if let Some(info) = &self.remote_data_info {
            schedule.remote_data_info = Some(info.clone());
        }
    }
}
