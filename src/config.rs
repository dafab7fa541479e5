//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for [`RemoteDataSyncEngine`](crate::engine::RemoteDataSyncEngine).
///
/// Collaborators (transport, host, preference store) are injected through
/// constructors rather than configured here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether the install already held app data before this engine first
    /// ran. Pins the new-user cutoff to the distant past, permanently
    /// suppressing new-user-only messages for this device.
    pub has_local_data: bool,
    /// Override for the JSON state file backing the default preference
    /// store. `None` uses `<config dir>/inapp-sync/state.json`.
    pub state_file: Option<PathBuf>,
}
