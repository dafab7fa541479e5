//! New-user cutoff policy.
//!
//! Some messages target newly-onboarded installs only. The cutoff is the
//! instant before which this device counts as pre-existing: it is written
//! exactly once, at the first-ever run, and read back verbatim for the life
//! of the install. Fresh installs record "now"; installs that already had
//! local data when this engine first ran record the distant past, which
//! permanently suppresses new-user-only messages for them.

use crate::error::Result;
use crate::prefs::PreferenceStore;
use chrono::{DateTime, Utc};

const CUTOFF_KEY: &str = "inapp-sync.new-user-cutoff-ms";

/// The new-user cutoff for this install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffPolicy {
    cutoff: DateTime<Utc>,
}

impl CutoffPolicy {
    /// Load the stored cutoff, or initialize it on the first-ever run.
    ///
    /// `has_local_data` marks installs that already held app data before
    /// this engine first ran; they get the distant-past sentinel. The
    /// cutoff is stored as epoch milliseconds so the sentinel survives
    /// serialization exactly.
    pub fn load_or_init(
        prefs: &dyn PreferenceStore,
        now: DateTime<Utc>,
        has_local_data: bool,
    ) -> Result<Self> {
        if let Some(stored) = prefs.get(CUTOFF_KEY) {
            if let Some(cutoff) = stored
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
            {
                return Ok(Self { cutoff });
            }
            tracing::warn!("stored cutoff {stored:?} unreadable, reinitializing");
        }

        let cutoff = if has_local_data {
            DateTime::<Utc>::MIN_UTC
        } else {
            now
        };
        prefs.put(CUTOFF_KEY, &cutoff.timestamp_millis().to_string())?;
        Ok(Self { cutoff })
    }

    /// The cutoff instant.
    #[must_use]
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Returns `true` if the install counts as new at `now`.
    #[must_use]
    pub fn is_new_install(&self, now: DateTime<Utc>) -> bool {
        now < self.cutoff
    }
}
