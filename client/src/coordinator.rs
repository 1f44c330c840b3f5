//! SyncCoordinator - drives push/pull cycles between the local cache and the
//! authoritative store.
//!
//! A cycle pushes one batch of queued changes, resolves any conflicts, pulls
//! everything that changed on the server since the stored cursor, runs cache
//! cleanup and finally records the outcome in the sync metadata. Only one
//! cycle runs at a time; a trigger that arrives while a cycle is active is a
//! no-op.

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::resolver::ConflictResolver;
use crate::transport::{decode, with_timeout, Transport};
use ferry_engine::protocol::{ENTITIES_PATH, PULL_PATH, PUSH_PATH};
use ferry_engine::{
    advance_cursor, apply_pull, ChangeAction, ChangeId, ChangeQueue, ChangeRecord, EntityId,
    EntityKey, EntityPage, EntityPageQuery, EntityType, LocalCache, PullCursor, PullOutcome,
    PullQuery, PullResponse, PushItem, PushRequest, PushResponse, PushStatus, Resolution, Schema,
    SyncMetadata, Timestamp, Version,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What started a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Trigger {
    #[default]
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of the push phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Changes put back at the head of the queue
    pub requeued: usize,
    /// How each conflict was resolved
    pub resolutions: Vec<(EntityKey, Resolution)>,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub trigger: Trigger,
    /// Another cycle was running; nothing was done
    pub skipped: bool,
    pub push: PushSummary,
    pub pull: PullOutcome,
    /// Entities removed by cleanup
    pub evicted: usize,
    pub error: Option<String>,
    pub duration: Duration,
}

impl CycleReport {
    /// Report of a trigger that found a cycle already running.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Check if the cycle ran and completed.
    pub fn is_success(&self) -> bool {
        !self.skipped && self.error.is_none()
    }

    /// Check if the cycle ran and failed.
    pub fn is_failure(&self) -> bool {
        !self.skipped && self.error.is_some()
    }
}

/// Outcome of a full resynchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    /// Entities written to the cache
    pub loaded: usize,
    /// Entities that did not fit
    pub skipped: usize,
    pub pages: usize,
}

/// Releases the single-flight flag when dropped.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the periodic scheduler task.
///
/// Stopping prevents further cycles. A cycle already running is never
/// interrupted; [`SyncHandle::shutdown`] waits for it.
pub struct SyncHandle {
    shutdown: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the scheduler to stop after the current cycle, if any.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait for the scheduler task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync scheduler task ended abnormally");
        }
    }

    /// Check if the scheduler task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct Inner {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn LocalCache>,
    queue: Mutex<ChangeQueue>,
    resolver: ConflictResolver,
    syncing: AtomicBool,
    scheduler: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

/// Coordinates sync cycles. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Create a coordinator that tracks every field as a scalar when merging.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn LocalCache>,
    ) -> Self {
        Self::with_schema(config, transport, cache, Schema::new())
    }

    /// Create a coordinator with a merge schema.
    pub fn with_schema(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn LocalCache>,
        schema: Schema,
    ) -> Self {
        let resolver = ConflictResolver::new(schema, transport.clone(), config.request_timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                cache,
                queue: Mutex::new(ChangeQueue::new()),
                resolver,
                syncing: AtomicBool::new(false),
                scheduler: Mutex::new(None),
            }),
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Start the periodic scheduler. Runs one cycle immediately, then one per
    /// interval. A scheduler started earlier is stopped first.
    pub fn start(&self) -> SyncHandle {
        let (tx, rx) = watch::channel(false);
        let shutdown = Arc::new(tx);

        if let Some(previous) = self.inner.scheduler.lock().replace(shutdown.clone()) {
            let _ = previous.send(true);
        }

        let coordinator = self.clone();
        let task = tokio::spawn(async move { coordinator.run_scheduler(rx).await });

        info!(
            interval_secs = self.inner.config.sync_interval.as_secs(),
            "sync scheduler started"
        );
        SyncHandle { shutdown, task }
    }

    /// Stop the scheduler started by [`SyncCoordinator::start`].
    pub fn stop(&self) {
        if let Some(shutdown) = self.inner.scheduler.lock().take() {
            let _ = shutdown.send(true);
            info!("sync scheduler stopped");
        }
    }

    async fn run_scheduler(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.sync_interval;
        let mut backoff = Backoff::new(self.inner.config.backoff_initial, interval);
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle(Trigger::Scheduled).await;
            delay = if report.is_failure() {
                let retry = backoff.next_delay();
                warn!(
                    attempt = backoff.attempts(),
                    retry_ms = retry.as_millis() as u64,
                    "sync cycle failed, backing off"
                );
                retry
            } else {
                backoff.reset();
                interval
            };
        }

        debug!("sync scheduler exited");
    }

    // ========================================================================
    // Cycles
    // ========================================================================

    /// Run one push/pull/cleanup cycle. Failures are recorded in the sync
    /// metadata, never returned.
    pub async fn perform_sync(&self) -> CycleReport {
        self.run_cycle(Trigger::Scheduled).await
    }

    /// User-triggered [`SyncCoordinator::perform_sync`].
    pub async fn manual_sync(&self) -> CycleReport {
        self.run_cycle(Trigger::Manual).await
    }

    async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let Some(_guard) = CycleGuard::acquire(&self.inner.syncing) else {
            debug!(%trigger, "sync already in progress, skipping");
            return CycleReport {
                trigger,
                ..CycleReport::skipped()
            };
        };

        let started = Instant::now();
        info!(%trigger, pending = self.pending_changes(), "sync cycle started");

        let mut report = CycleReport {
            trigger,
            ..CycleReport::default()
        };
        let mut cursor = self.inner.cache.get_last_sync_timestamp();

        let outcome = self.sync_phases(&mut report, &mut cursor).await;
        let now = now_ms();

        match outcome {
            Ok(()) => {
                self.inner
                    .cache
                    .update_sync_metadata(SyncMetadata::succeeded(now, cursor));
                info!(
                    %trigger,
                    pushed = report.push.sent,
                    conflicts = report.push.resolutions.len(),
                    pulled = report.pull.total(),
                    evicted = report.evicted,
                    "sync cycle completed"
                );
            }
            Err(e) => {
                error!(%trigger, error = %e, "sync cycle failed");
                self.inner
                    .cache
                    .update_sync_metadata(SyncMetadata::failed(now, e.to_string(), cursor));
                report.error = Some(e.to_string());
            }
        }

        report.duration = started.elapsed();
        report
    }

    async fn sync_phases(
        &self,
        report: &mut CycleReport,
        cursor: &mut Option<PullCursor>,
    ) -> Result<()> {
        report.push = self.push_local_changes().await?;
        report.pull = self.pull_server_updates(cursor).await?;
        report.evicted = self.cleanup_cache();
        Ok(())
    }

    async fn push_local_changes(&self) -> Result<PushSummary> {
        let batch = self.inner.queue.lock().take_batch(self.inner.config.batch_size);
        if batch.is_empty() {
            return Ok(PushSummary::default());
        }

        let mut summary = PushSummary {
            sent: batch.len(),
            ..PushSummary::default()
        };
        debug!(count = batch.len(), "pushing local changes");

        let request = PushRequest {
            changes: batch.iter().map(PushItem::from).collect(),
        };

        let response = match self.post_batch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(count = batch.len(), error = %e, "push failed, requeueing batch");
                self.inner.queue.lock().requeue_front(batch);
                return Err(e);
            }
        };

        let mut changes = batch.into_iter();
        for result in &response.results {
            let Some(change) = changes.next() else {
                warn!("server returned more results than changes sent");
                break;
            };
            let now = now_ms();

            match result.status {
                PushStatus::Success => {
                    self.apply_confirmed(&change, result.server_data.clone(), now);
                    summary.succeeded += 1;
                }
                PushStatus::Conflict => {
                    let key = change.key();
                    let resolution = self
                        .inner
                        .resolver
                        .resolve(self.inner.cache.as_ref(), change, result, now)
                        .await;
                    summary.resolutions.push((key, resolution));
                }
                PushStatus::Error => {
                    warn!(
                        entity = %change.key(),
                        change_id = %change.change_id,
                        message = result.message.as_deref().unwrap_or(""),
                        "change rejected, dropping"
                    );
                    summary.failed += 1;
                }
            }
        }

        // Results missing for the tail of the batch: the server did not
        // process those changes
        let unanswered: Vec<ChangeRecord> = changes.collect();
        if !unanswered.is_empty() {
            warn!(count = unanswered.len(), "changes without a result, requeueing");
            summary.requeued = unanswered.len();
            self.inner.queue.lock().requeue_front(unanswered);
        }

        Ok(summary)
    }

    async fn post_batch(&self, request: &PushRequest) -> Result<PushResponse> {
        let body = serde_json::to_value(request)?;
        let response = with_timeout(
            self.inner.config.request_timeout,
            self.inner.transport.post(PUSH_PATH, &body),
        )
        .await?;
        decode(response)
    }

    fn apply_confirmed(
        &self,
        change: &ChangeRecord,
        server_data: Option<ferry_engine::VersionedEntity>,
        now: Timestamp,
    ) {
        let cache = &self.inner.cache;
        match server_data {
            Some(entity) if entity.is_active() => {
                cache.update_cached_item(entity, now);
            }
            Some(entity) => {
                cache.remove_cached_item(&entity.key());
            }
            None if change.action == ChangeAction::Delete => {
                cache.remove_cached_item(&change.key());
            }
            None => {
                warn!(entity = %change.key(), "success without server data, cache left as is");
            }
        }
    }

    async fn pull_server_updates(&self, cursor: &mut Option<PullCursor>) -> Result<PullOutcome> {
        let config = &self.inner.config;
        let mut outcome = PullOutcome::default();

        for page in 0..config.max_pull_pages {
            let query = PullQuery::new(cursor.as_ref(), &config.entity_types, config.pull_limit);
            let response = with_timeout(
                config.request_timeout,
                self.inner.transport.get(PULL_PATH, &query.to_pairs()),
            )
            .await?;
            let pulled: PullResponse = decode(response)?;

            outcome.absorb(apply_pull(
                self.inner.cache.as_ref(),
                &pulled.changes,
                now_ms(),
            ));
            *cursor = advance_cursor(cursor.take(), &pulled.changes);

            if !pulled.has_more || pulled.changes.is_empty() {
                break;
            }
            if page + 1 == config.max_pull_pages {
                debug!(pages = config.max_pull_pages, "pull page limit reached");
            }
        }

        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            removed = outcome.removed,
            skipped = outcome.skipped,
            "pulled server updates"
        );
        Ok(outcome)
    }

    fn cleanup_cache(&self) -> usize {
        let protected = self.inner.queue.lock().pending_keys();
        let max_age = self.inner.config.max_cache_age.as_millis() as u64;
        let evicted = self.inner.cache.evict_stale(max_age, now_ms(), &protected);
        if evicted > 0 {
            debug!(evicted, "evicted stale cache entries");
        }
        evicted
    }

    // ========================================================================
    // Full resynchronization
    // ========================================================================

    /// Rebuild the cache from the server. Errors are returned.
    pub async fn perform_full_sync(&self) -> Result<FullSyncReport> {
        self.run_full_sync(Trigger::Scheduled).await
    }

    /// User-triggered [`SyncCoordinator::perform_full_sync`].
    pub async fn manual_full_sync(&self) -> Result<FullSyncReport> {
        self.run_full_sync(Trigger::Manual).await
    }

    async fn run_full_sync(&self, trigger: Trigger) -> Result<FullSyncReport> {
        let Some(_guard) = CycleGuard::acquire(&self.inner.syncing) else {
            return Err(SyncError::Busy);
        };

        info!(%trigger, "full sync started");
        match self.full_sync().await {
            Ok(report) => {
                info!(
                    %trigger,
                    loaded = report.loaded,
                    skipped = report.skipped,
                    "full sync completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(%trigger, error = %e, "full sync failed");
                Err(SyncError::FullSync(Box::new(e)))
            }
        }
    }

    async fn full_sync(&self) -> Result<FullSyncReport> {
        let config = &self.inner.config;
        let cache = &self.inner.cache;
        let mut report = FullSyncReport::default();

        cache.clear_cache_except(&config.preserved_types);

        for entity_type in &config.entity_types {
            let mut offset = 0u64;
            loop {
                let query = EntityPageQuery {
                    entity_type: entity_type.clone(),
                    offset,
                    limit: Some(config.page_size),
                };
                let response = with_timeout(
                    config.request_timeout,
                    self.inner.transport.get(ENTITIES_PATH, &query.to_pairs()),
                )
                .await?;
                let page: EntityPage = decode(response)?;
                report.pages += 1;

                let now = now_ms();
                offset += page.entities.len() as u64;
                for entity in page.entities {
                    if cache.update_cached_item(entity, now) {
                        report.loaded += 1;
                    } else {
                        report.skipped += 1;
                    }
                }

                if !page.has_more || offset == 0 {
                    break;
                }
            }
        }

        Ok(report)
    }

    // ========================================================================
    // Local changes
    // ========================================================================

    /// Queue a local change for the next push. Returns its change ID.
    ///
    /// The cached entity at `base_version`, if any, is kept as the merge base.
    pub fn queue_change(
        &self,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        action: ChangeAction,
        data: serde_json::Value,
        base_version: Option<Version>,
    ) -> ChangeId {
        let mut change = ChangeRecord::new(
            uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id,
            action,
            data,
            base_version,
            now_ms(),
        );
        if let Some(base) = self.inner.cache.get_cached_item(&change.key()) {
            change = change.with_base(base);
        }
        let change_id = change.change_id.clone();

        debug!(entity = %change.key(), %action, %change_id, "change queued");
        self.inner.queue.lock().enqueue(change);
        change_id
    }

    /// Replace the queue, e.g. with one restored from a snapshot.
    pub fn restore_queue(&self, queue: ChangeQueue) {
        *self.inner.queue.lock() = queue;
    }

    /// Copy of the queue, e.g. for a snapshot.
    pub fn queue_snapshot(&self) -> ChangeQueue {
        self.inner.queue.lock().clone()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Check if a cycle or full sync is running.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Number of queued changes.
    pub fn pending_changes(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Metadata of the last cycle.
    pub fn metadata(&self) -> SyncMetadata {
        self.inner.cache.sync_metadata()
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
