//! Per-source refresh coordination.
//!
//! Each remote source moves through `Idle → FetchInFlight → Settled` and
//! back to `FetchInFlight` on the next change notification; a failed fetch
//! returns to `Idle` so the next caller can retry. The coordinator's job is
//! to make "at most one in-flight fetch per source" mechanically true:
//! exactly one caller gets a [`FetchLead`] and runs the fetch, everyone
//! else gets a receiver that resolves when the lead settles.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// How a fetch/reconcile cycle ended, delivered to every waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Payload applied and the version store committed.
    Applied {
        /// Version the source settled at.
        last_modified: DateTime<Utc>,
    },
    /// Fetch or persistence failed; the source is idle again.
    Failed,
    /// The engine unsubscribed while the fetch was pending.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    FetchInFlight,
    Settled(DateTime<Utc>),
}

struct SourceEntry {
    state: SourceState,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

impl SourceEntry {
    fn new() -> Self {
        Self {
            state: SourceState::Idle,
            waiters: Vec::new(),
        }
    }
}

/// Issued by [`RefreshCoordinator::begin`].
pub enum FetchTicket {
    /// This caller runs the fetch and must settle it.
    Lead(FetchLead),
    /// Another fetch is in flight; resolves when it settles.
    Follow(oneshot::Receiver<RefreshOutcome>),
}

/// Exclusive right to run the fetch for one source.
///
/// Dropping the lead without settling counts as a failure, so a cancelled
/// caller (e.g. a timeout layered around a refresh) cannot leave the source
/// stuck in flight.
pub struct FetchLead {
    coordinator: RefreshCoordinator,
    source: String,
    settled: bool,
}

impl FetchLead {
    /// The source this lead covers.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Record the outcome and release all waiters.
    pub fn settle(mut self, outcome: RefreshOutcome) {
        self.settled = true;
        self.coordinator.settle(&self.source, outcome);
    }
}

impl Drop for FetchLead {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&self.source, RefreshOutcome::Failed);
        }
    }
}

/// Tracks the refresh state machine of every remote source.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    sources: Arc<Mutex<HashMap<String, SourceEntry>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator with no known sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start, or fan in on, a fetch for `source`.
    #[must_use]
    pub fn begin(&self, source: &str) -> FetchTicket {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sources
            .entry(source.to_owned())
            .or_insert_with(SourceEntry::new);

        if entry.state == SourceState::FetchInFlight {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return FetchTicket::Follow(rx);
        }

        entry.state = SourceState::FetchInFlight;
        FetchTicket::Lead(FetchLead {
            coordinator: self.clone(),
            source: source.to_owned(),
            settled: false,
        })
    }

    /// Register a waiter if a fetch for `source` is in flight right now.
    ///
    /// Used by the best-effort path, which rides existing work but never
    /// starts any.
    #[must_use]
    pub fn wait_if_in_flight(&self, source: &str) -> Option<oneshot::Receiver<RefreshOutcome>> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sources.get_mut(source)?;
        if entry.state != SourceState::FetchInFlight {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        entry.waiters.push(tx);
        Some(rx)
    }

    /// Release every pending waiter with [`RefreshOutcome::Abandoned`].
    ///
    /// Source states are left untouched: an outstanding [`FetchLead`] still
    /// settles (or fails on drop) and moves its source on.
    pub fn abandon_all(&self) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        for entry in sources.values_mut() {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(RefreshOutcome::Abandoned);
            }
        }
    }

    /// Returns `true` if a fetch for `source` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, source: &str) -> bool {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .is_some_and(|e| e.state == SourceState::FetchInFlight)
    }

    /// The version `source` last settled at, if its latest fetch applied.
    #[must_use]
    pub fn last_settled(&self, source: &str) -> Option<DateTime<Utc>> {
        match self
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .map(|e| e.state)
        {
            Some(SourceState::Settled(last_modified)) => Some(last_modified),
            _ => None,
        }
    }

    fn settle(&self, source: &str, outcome: RefreshOutcome) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = sources.get_mut(source) else {
            return;
        };

        entry.state = match outcome {
            RefreshOutcome::Applied { last_modified } => SourceState::Settled(last_modified),
            RefreshOutcome::Failed | RefreshOutcome::Abandoned => SourceState::Idle,
        };
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn expect_lead(ticket: FetchTicket) -> FetchLead {
        match ticket {
            FetchTicket::Lead(lead) => lead,
            FetchTicket::Follow(_) => panic!("expected lead ticket"),
        }
    }

    #[test]
    fn first_begin_gets_the_lead() {
        let coordinator = RefreshCoordinator::new();
        let lead = expect_lead(coordinator.begin("app"));
        assert!(coordinator.is_in_flight("app"));
        assert_eq!(lead.source(), "app");
        lead.settle(RefreshOutcome::Applied {
            last_modified: at(1),
        });
    }

    #[tokio::test]
    async fn concurrent_begins_fan_in_on_one_lead() {
        let coordinator = RefreshCoordinator::new();
        let lead = expect_lead(coordinator.begin("app"));

        let followers: Vec<_> = (0..4)
            .map(|_| match coordinator.begin("app") {
                FetchTicket::Follow(rx) => rx,
                FetchTicket::Lead(_) => panic!("second lead for the same source"),
            })
            .collect();

        lead.settle(RefreshOutcome::Applied {
            last_modified: at(7),
        });

        for rx in followers {
            assert_eq!(
                rx.await.unwrap(),
                RefreshOutcome::Applied {
                    last_modified: at(7)
                }
            );
        }
    }

    #[test]
    fn applied_settle_moves_to_settled() {
        let coordinator = RefreshCoordinator::new();
        expect_lead(coordinator.begin("app")).settle(RefreshOutcome::Applied {
            last_modified: at(9),
        });

        assert!(!coordinator.is_in_flight("app"));
        assert_eq!(coordinator.last_settled("app"), Some(at(9)));
    }

    #[test]
    fn failed_settle_returns_to_idle() {
        let coordinator = RefreshCoordinator::new();
        expect_lead(coordinator.begin("app")).settle(RefreshOutcome::Failed);

        assert!(!coordinator.is_in_flight("app"));
        assert!(coordinator.last_settled("app").is_none());

        // Next caller can lead again.
        let _retry = expect_lead(coordinator.begin("app"));
    }

    #[tokio::test]
    async fn dropped_lead_counts_as_failed() {
        let coordinator = RefreshCoordinator::new();
        let lead = expect_lead(coordinator.begin("app"));
        let rx = coordinator.wait_if_in_flight("app").unwrap();

        drop(lead);

        assert_eq!(rx.await.unwrap(), RefreshOutcome::Failed);
        assert!(!coordinator.is_in_flight("app"));
    }

    #[test]
    fn wait_if_in_flight_is_none_when_idle() {
        let coordinator = RefreshCoordinator::new();
        assert!(coordinator.wait_if_in_flight("app").is_none());

        expect_lead(coordinator.begin("app")).settle(RefreshOutcome::Failed);
        assert!(coordinator.wait_if_in_flight("app").is_none());
    }

    #[tokio::test]
    async fn abandon_all_releases_waiters_without_moving_state() {
        let coordinator = RefreshCoordinator::new();
        let lead = expect_lead(coordinator.begin("app"));
        let rx = coordinator.wait_if_in_flight("app").unwrap();

        coordinator.abandon_all();
        assert_eq!(rx.await.unwrap(), RefreshOutcome::Abandoned);

        // The outstanding lead still owns the in-flight state.
        assert!(coordinator.is_in_flight("app"));
        lead.settle(RefreshOutcome::Applied {
            last_modified: at(3),
        });
        assert_eq!(coordinator.last_settled("app"), Some(at(3)));
    }

    #[test]
    fn sources_are_independent() {
        let coordinator = RefreshCoordinator::new();
        let app = expect_lead(coordinator.begin("app"));
        let contact = expect_lead(coordinator.begin("contact"));

        assert!(coordinator.is_in_flight("app"));
        assert!(coordinator.is_in_flight("contact"));

        app.settle(RefreshOutcome::Failed);
        assert!(!coordinator.is_in_flight("app"));
        assert!(coordinator.is_in_flight("contact"));
        contact.settle(RefreshOutcome::Failed);
    }
}
