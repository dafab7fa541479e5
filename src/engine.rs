//! The sync engine facade.
//!
//! [`RemoteDataSyncEngine`] connects a remote data transport to the host
//! that owns schedule lifecycle. While subscribed, it consumes change
//! notifications, fetches the affected payloads, diffs them against the
//! local schedule set, and asks the host to apply creates, updates, and
//! deletions; the [`VersionStore`] records what each cycle settled at. It
//! also answers the per-schedule freshness API the host consults before
//! acting on a schedule.
//!
//! Host operations must be idempotent for the same identifier: a stale
//! commit can discard a partially-applied diff that a later cycle
//! re-attempts.

use crate::config::SyncConfig;
use crate::cutoff::CutoffPolicy;
use crate::error::{Result, SyncError};
use crate::prefs::{FilePreferenceStore, PreferenceStore};
use crate::reconcile::reconcile;
use crate::refresh::{FetchTicket, RefreshCoordinator, RefreshOutcome};
use crate::schedule::{RemoteDataInfo, RemotePayload, Schedule, ScheduleEdits};
use crate::staleness::StalenessTracker;
use crate::store::VersionStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Remote data transport, consumed by the engine.
///
/// How payloads are transported and authenticated is the implementor's
/// business; the engine only needs fetches, a snapshot, and a change
/// stream. Fetch failures are recoverable: the engine leaves the source
/// idle and retries on the next natural trigger.
#[async_trait]
pub trait RemoteDataProvider: Send + Sync {
    /// Fetch the current payload for one source.
    async fn fetch(&self, source: &str) -> Result<RemotePayload>;

    /// Fetch the payloads of every source currently known to the transport.
    async fn snapshot(&self) -> Result<Vec<RemotePayload>>;

    /// Subscribe to change notifications. Each event names the affected
    /// sources.
    fn updates(&self) -> broadcast::Receiver<Vec<String>>;

    /// Hint that locally-held data stamped with `info` is known stale, so
    /// the next fetch should bypass any transport-side cache.
    fn notify_outdated(&self, info: &RemoteDataInfo);
}

/// Capability set of the host that owns schedule lifecycle.
///
/// Supplied at engine construction; the engine holds no backward ownership.
/// The boolean results report persistence success, not network state, and
/// every operation must be safe to re-issue for the same identifier.
#[async_trait]
pub trait ScheduleHost: Send + Sync {
    /// Current schedule set, used as the reconcile baseline.
    async fn get_schedules(&self) -> Vec<Schedule>;

    /// Apply creates.
    async fn schedule_multiple(&self, schedules: Vec<Schedule>) -> bool;

    /// Apply an update. Deletions also arrive here, as edits that end the
    /// schedule immediately; the host drops expired schedules itself.
    async fn edit_schedule(&self, id: &str, edits: ScheduleEdits) -> bool;

    /// Pass through opaque constraint configuration from a payload.
    fn set_constraints(&self, constraints: serde_json::Value);
}

struct EngineInner {
    provider: Arc<dyn RemoteDataProvider>,
    host: Arc<dyn ScheduleHost>,
    store: Arc<VersionStore>,
    cutoff: CutoffPolicy,
    tracker: StalenessTracker,
    coordinator: RefreshCoordinator,
    // Bumped by unsubscribe; leads suspended in a fetch watch it.
    shutdown: watch::Sender<u64>,
}

/// Facade connecting remote data to the in-app message scheduler.
pub struct RemoteDataSyncEngine {
    inner: Arc<EngineInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteDataSyncEngine {
    /// Create an engine backed by the default file preference store.
    pub fn new(
        provider: Arc<dyn RemoteDataProvider>,
        host: Arc<dyn ScheduleHost>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let prefs: Arc<dyn PreferenceStore> = match &config.state_file {
            Some(path) => Arc::new(FilePreferenceStore::open(path)?),
            None => Arc::new(FilePreferenceStore::open_default()?),
        };
        Self::with_store(provider, host, prefs, config.has_local_data)
    }

    /// Create an engine over a caller-supplied preference store.
    pub fn with_store(
        provider: Arc<dyn RemoteDataProvider>,
        host: Arc<dyn ScheduleHost>,
        prefs: Arc<dyn PreferenceStore>,
        has_local_data: bool,
    ) -> Result<Self> {
        let cutoff = CutoffPolicy::load_or_init(prefs.as_ref(), Utc::now(), has_local_data)?;
        let store = Arc::new(VersionStore::load(prefs));
        let tracker = StalenessTracker::new(store.clone());
        let (shutdown, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(EngineInner {
                provider,
                host,
                store,
                cutoff,
                tracker,
                coordinator: RefreshCoordinator::new(),
                shutdown,
            }),
            task: Mutex::new(None),
        })
    }

    /// The new-user cutoff for this install.
    #[must_use]
    pub fn new_user_cutoff(&self) -> CutoffPolicy {
        self.inner.cutoff
    }

    /// Register for change notifications and immediately reconcile against
    /// the provider's current snapshot.
    ///
    /// Idempotent while subscribed. Must be called from within a tokio
    /// runtime.
    pub fn subscribe(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let mut updates = inner.provider.updates();
        *task = Some(tokio::spawn(async move {
            match inner.provider.snapshot().await {
                Ok(payloads) => inner.adopt_snapshot(payloads).await,
                Err(e) => tracing::warn!("initial snapshot failed: {e}"),
            }

            loop {
                match updates.recv().await {
                    Ok(sources) => {
                        for source in sources {
                            inner.refresh_source(&source).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("missed {missed} change notifications, resyncing snapshot");
                        match inner.provider.snapshot().await {
                            Ok(payloads) => inner.adopt_snapshot(payloads).await,
                            Err(e) => tracing::warn!("resync snapshot failed: {e}"),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Deregister and release pending waiters.
    ///
    /// Anyone suspended in [`best_effort_refresh`](Self::best_effort_refresh)
    /// or [`wait_full_refresh`](Self::wait_full_refresh) resolves with a
    /// non-fresh outcome rather than being left pending.
    pub fn unsubscribe(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        // Release everyone before the abort lands so they observe Abandoned,
        // not the Failed settle of the aborted fetch: the generation bump
        // reaches leads suspended in a fetch, abandon_all reaches followers.
        self.inner
            .shutdown
            .send_modify(|generation| *generation = generation.wrapping_add(1));
        self.inner.coordinator.abandon_all();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Returns `true` if `schedule` reflects the latest processed payload
    /// of its source. Schedules without a remote origin are always current.
    #[must_use]
    pub fn is_schedule_up_to_date(&self, schedule: &Schedule) -> bool {
        self.inner.tracker.is_up_to_date(schedule)
    }

    /// Returns `true` if `schedule` must not be evaluated before an active
    /// refresh of its source.
    #[must_use]
    pub fn schedule_requires_refresh(&self, schedule: &Schedule) -> bool {
        self.inner.tracker.requires_refresh(schedule)
    }

    /// Refresh `schedule` without forcing network work.
    ///
    /// Returns `true` immediately when the schedule is already current.
    /// Otherwise rides a fetch already in flight for its source, if any,
    /// and re-evaluates once it settles. Never starts a fetch of its own.
    pub async fn best_effort_refresh(&self, schedule: &Schedule) -> bool {
        let Some(info) = &schedule.remote_data_info else {
            return true;
        };
        if self.inner.tracker.is_up_to_date(schedule) {
            return true;
        }

        if let Some(rx) = self.inner.coordinator.wait_if_in_flight(&info.source) {
            let _ = rx.await;
            return self.inner.tracker.is_up_to_date(schedule);
        }
        false
    }

    /// Suspend until `schedule` is confirmed current, fetching if needed.
    ///
    /// Used when correctness rather than latency matters, e.g. right before
    /// finally executing a message. Resolves `false` when the refresh fails
    /// or is abandoned by [`unsubscribe`](Self::unsubscribe); failures are
    /// not retried here. Callers wanting a bound should layer a timeout
    /// around this future — dropping it is safe.
    pub async fn wait_full_refresh(&self, schedule: &Schedule) -> bool {
        let Some(info) = &schedule.remote_data_info else {
            return true;
        };
        if self.inner.tracker.is_up_to_date(schedule) {
            return true;
        }

        // Ride an in-flight fetch first.
        if let Some(rx) = self.inner.coordinator.wait_if_in_flight(&info.source) {
            if matches!(rx.await, Ok(RefreshOutcome::Abandoned) | Err(_)) {
                return false;
            }
            if self.inner.tracker.is_up_to_date(schedule) {
                return true;
            }
        }

        // Still stale: run one fetch cycle of our own (or fan in, if
        // another caller beat us to it). The shutdown receiver is taken
        // before leading so an unsubscribe cannot slip in between and leave
        // us suspended in the fetch.
        let mut shutdown = self.inner.shutdown.subscribe();
        match self.inner.coordinator.begin(&info.source) {
            FetchTicket::Lead(lead) => {
                tokio::select! {
                    outcome = self.inner.run_cycle(&info.source) => lead.settle(outcome),
                    _ = shutdown.changed() => {
                        lead.settle(RefreshOutcome::Abandoned);
                        return false;
                    }
                }
            }
            FetchTicket::Follow(rx) => {
                let _ = rx.await;
            }
        }
        self.inner.tracker.is_up_to_date(schedule)
    }

    /// Inform the transport that `schedule`'s source data is known stale,
    /// independent of any active refresh.
    pub fn notify_outdated_schedule(&self, schedule: &Schedule) {
        if let Some(info) = &schedule.remote_data_info {
            tracing::debug!(
                "schedule {} reported outdated for source {}",
                schedule.id,
                info.source
            );
            self.inner.provider.notify_outdated(info);
        }
    }

    /// Extract the remote origin stamp from `schedule`, if any.
    #[must_use]
    pub fn remote_data_info_from_schedule<'a>(
        &self,
        schedule: &'a Schedule,
    ) -> Option<&'a RemoteDataInfo> {
        schedule.remote_data_info.as_ref()
    }
}

impl Drop for RemoteDataSyncEngine {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl EngineInner {
    /// Apply every payload in a snapshot, then retire recorded sources the
    /// snapshot no longer carries: all their schedules become deletions.
    async fn adopt_snapshot(&self, payloads: Vec<RemotePayload>) {
        let mut seen: HashSet<String> = HashSet::new();
        for payload in payloads {
            seen.insert(payload.source.clone());
            self.adopt_payload(payload).await;
        }

        for source in self.store.sources() {
            if seen.contains(&source) {
                continue;
            }
            let Some(last_modified) = self.store.last_modified(&source) else {
                continue;
            };
            tracing::debug!("source {source} missing from snapshot, retiring its schedules");
            // An empty payload at the recorded version deletes everything
            // and re-commits the (equal, accepted) version.
            self.adopt_payload(RemotePayload {
                source,
                last_modified,
                drafts: Vec::new(),
                constraints: None,
            })
            .await;
        }
    }

    /// Apply a payload already in hand (snapshot path).
    async fn adopt_payload(&self, payload: RemotePayload) {
        match self.coordinator.begin(&payload.source) {
            FetchTicket::Lead(lead) => {
                let outcome = self.apply_payload(&payload).await;
                lead.settle(outcome);
            }
            FetchTicket::Follow(_) => {
                // A fetch is already running for this source; it will land
                // data at least as fresh as this snapshot.
                tracing::debug!("snapshot for {} superseded by in-flight fetch", payload.source);
            }
        }
    }

    /// Fetch and apply one source (change-notification path).
    async fn refresh_source(&self, source: &str) {
        match self.coordinator.begin(source) {
            FetchTicket::Lead(lead) => {
                let outcome = self.run_cycle(source).await;
                lead.settle(outcome);
            }
            FetchTicket::Follow(rx) => {
                let _ = rx.await;
            }
        }
    }

    async fn run_cycle(&self, source: &str) -> RefreshOutcome {
        match self.provider.fetch(source).await {
            Ok(payload) => self.apply_payload(&payload).await,
            Err(e) => {
                tracing::warn!("fetch for source {source} failed: {e}");
                RefreshOutcome::Failed
            }
        }
    }

    /// One reconcile cycle: diff, apply through the host, commit.
    async fn apply_payload(&self, payload: &RemotePayload) -> RefreshOutcome {
        let now = Utc::now();

        // Baseline: ids the store last committed for this source, plus
        // whatever the host currently holds stamped with it.
        let mut previous = self.store.schedule_ids(&payload.source);
        for schedule in self.host.get_schedules().await {
            if let Some(info) = &schedule.remote_data_info {
                if info.source == payload.source {
                    previous.insert(schedule.id);
                }
            }
        }

        let diff = reconcile(&previous, payload, self.cutoff.cutoff(), now);
        tracing::debug!(
            "reconciled source {}: {} creates, {} updates, {} deletes",
            payload.source,
            diff.create.len(),
            diff.update.len(),
            diff.delete.len()
        );

        if let Some(constraints) = &payload.constraints {
            self.host.set_constraints(constraints.clone());
        }

        // Ids the committed record will carry. Items the host fails to
        // persist drop out (or, for deletions, stay in) so the next cycle
        // retries them instead of marking them settled.
        let mut committed: HashSet<String> = diff
            .create
            .iter()
            .map(|s| s.id.clone())
            .chain(diff.update.iter().map(|(id, _)| id.clone()))
            .collect();

        if !diff.create.is_empty() {
            let ids: Vec<String> = diff.create.iter().map(|s| s.id.clone()).collect();
            if !self.host.schedule_multiple(diff.create.clone()).await {
                tracing::warn!(
                    "host rejected {} new schedules from source {}",
                    ids.len(),
                    payload.source
                );
                for id in ids {
                    committed.remove(&id);
                }
            }
        }

        for (id, edits) in &diff.update {
            if !self.host.edit_schedule(id, edits.clone()).await {
                tracing::warn!("host rejected edit of schedule {id}");
                committed.remove(id);
            }
        }

        for id in &diff.delete {
            if !self.host.edit_schedule(id, ScheduleEdits::expire(now)).await {
                tracing::warn!("host rejected deletion of schedule {id}, keeping it tracked");
                committed.insert(id.clone());
            }
        }

        match self
            .store
            .commit(&payload.source, payload.last_modified, committed)
        {
            Ok(()) => RefreshOutcome::Applied {
                last_modified: payload.last_modified,
            },
            Err(SyncError::StaleCommit { .. }) => {
                // A newer cycle already superseded this one. The partially
                // applied diff is left for that cycle's idempotent re-apply.
                tracing::debug!("discarding stale cycle for source {}", payload.source);
                let last_modified = self
                    .store
                    .last_modified(&payload.source)
                    .unwrap_or(payload.last_modified);
                RefreshOutcome::Applied { last_modified }
            }
            Err(e) => {
                tracing::warn!("commit for source {} failed: {e}", payload.source);
                RefreshOutcome::Failed
            }
        }
    }
}
