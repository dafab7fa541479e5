//! Error types for the sync engine.

/// Top-level error type for remote-data synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport-level fetch failure, scoped to one remote source.
    ///
    /// Leaves the per-source refresh state `Idle` so the next caller can
    /// retry. Retry/backoff policy belongs to the transport, not this crate.
    // Not named `source`: thiserror reserves that name for `Error::source()`.
    #[error("fetch failed for source {source_id}: {reason}")]
    FetchFailed {
        /// Remote source identifier.
        source_id: String,
        /// Transport-provided failure description.
        reason: String,
    },

    /// A reconcile result arrived after a newer one already committed.
    ///
    /// The caller must discard the reconcile result. This is a coordination
    /// signal rather than a fault: the store already holds fresher data.
    #[error("stale commit for source {source_id}: store already holds newer data")]
    StaleCommit {
        /// Remote source identifier.
        source_id: String,
    },

    /// The preference store failed to persist state.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn fetch_failed_display_names_source() {
        let err = SyncError::FetchFailed {
            source_id: "app".to_owned(),
            reason: "connection reset".to_owned(),
        };
        let text = err.to_string();
        assert!(text.contains("app"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn stale_commit_display_names_source() {
        let err = SyncError::StaleCommit {
            source_id: "contact".to_owned(),
        };
        assert!(err.to_string().contains("contact"));
    }

    #[test]
    fn per_source_variants_have_no_error_source_chain() {
        use std::error::Error;

        let err = SyncError::FetchFailed {
            source_id: "app".to_owned(),
            reason: "timeout".to_owned(),
        };
        assert!(err.source().is_none());
        let err = SyncError::StaleCommit {
            source_id: "app".to_owned(),
        };
        assert!(err.source().is_none());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SyncError = io.into();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn serde_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("not json");
        let err: SyncError = bad.unwrap_err().into();
        assert!(matches!(err, SyncError::Serde(_)));
    }
}
