//! Integration tests for the sync coordinator.
//!
//! The coordinator runs against an in-process transport that serves the wire
//! protocol from an engine `VersionedStore`, with switches to make calls fail
//! or stall.

use async_trait::async_trait;
use ferry_client::{SyncConfig, SyncCoordinator, SyncError, Transport, TransportError};
use ferry_engine::protocol::{ENTITIES_PATH, PULL_PATH, PUSH_PATH};
use ferry_engine::{
    ApiResponse, ChangeAction, ChangeId, EntityKey, EntityPageQuery, EntitySchema, EntityWrite,
    FieldDef, LocalCache, MemoryCache, PullQuery, PushRequest, Resolution, Schema, SyncStatus,
    VersionedEntity, VersionedStore,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// In-process transport
// ============================================================================

#[derive(Default)]
struct StoreTransport {
    store: Mutex<VersionedStore>,
    clock: AtomicU64,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
    pushed: Mutex<Vec<Vec<ChangeId>>>,
}

impl StoreTransport {
    fn new(store: VersionedStore) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            clock: AtomicU64::new(1_000),
            ..Self::default()
        })
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pushed_batches(&self) -> Vec<Vec<ChangeId>> {
        self.pushed.lock().clone()
    }

    /// Write straight to the store, as another client would.
    fn server_update(
        &self,
        entity_type: &str,
        id: &str,
        data: Value,
        version: u64,
    ) -> VersionedEntity {
        let at = self.tick();
        self.store
            .lock()
            .update(entity_type, id, data, version, at)
            .unwrap()
    }

    async fn enter(&self) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

fn param<'a>(query: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.as_str())
}

fn ok(data: impl serde::Serialize) -> ApiResponse {
    ApiResponse::ok(serde_json::to_value(data).unwrap())
}

#[async_trait]
impl Transport for StoreTransport {
    async fn get(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<ApiResponse, TransportError> {
        self.enter().await?;
        let now = self.tick();
        let store = self.store.lock();

        match path {
            PULL_PATH => {
                let pull = PullQuery {
                    since: param(query, "since").map(|s| s.parse().unwrap()),
                    after_type: param(query, "after_type").map(String::from),
                    after_id: param(query, "after_id").map(String::from),
                    entity_types: param(query, "entity_types").map(String::from),
                    limit: param(query, "limit").map(|s| s.parse().unwrap()),
                };
                Ok(ok(store.changes_since(&pull, now)))
            }
            ENTITIES_PATH => {
                let page = EntityPageQuery {
                    entity_type: param(query, "entity_type").unwrap_or_default().to_string(),
                    offset: param(query, "offset").map(|s| s.parse().unwrap()).unwrap_or(0),
                    limit: param(query, "limit").map(|s| s.parse().unwrap()),
                };
                Ok(ok(store.page(&page)))
            }
            other => Ok(ApiResponse::err(format!("no route for GET {}", other))),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
        self.enter().await?;
        assert_eq!(path, PUSH_PATH);

        let request: PushRequest = serde_json::from_value(body.clone()).unwrap();
        self.pushed.lock().push(
            request
                .changes
                .iter()
                .filter_map(|c| c.change_id.clone())
                .collect(),
        );

        let now = self.tick();
        Ok(ok(self.store.lock().push(&request, now)))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
        self.enter().await?;
        let write: EntityWrite = serde_json::from_value(body.clone()).unwrap();

        let rest = path
            .strip_prefix(ENTITIES_PATH)
            .and_then(|p| p.strip_prefix('/'))
            .unwrap();
        let (entity_type, id) = rest.split_once('/').unwrap();

        let now = self.tick();
        Ok(ok(self.store.lock().write(entity_type, id, &write, now)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config() -> SyncConfig {
    SyncConfig {
        request_timeout: Duration::from_secs(5),
        entity_types: vec!["estimate".into(), "user_settings".into()],
        ..SyncConfig::default()
    }
}

fn setup(store: VersionedStore) -> (SyncCoordinator, Arc<StoreTransport>, Arc<MemoryCache>) {
    setup_with(store, config(), Schema::new())
}

fn setup_with(
    store: VersionedStore,
    config: SyncConfig,
    schema: Schema,
) -> (SyncCoordinator, Arc<StoreTransport>, Arc<MemoryCache>) {
    let transport = StoreTransport::new(store);
    let cache = Arc::new(MemoryCache::default());
    let coordinator =
        SyncCoordinator::with_schema(config, transport.clone(), cache.clone(), schema);
    (coordinator, transport, cache)
}

/// Wall clock in milliseconds, matching the coordinator's cache timestamps.
fn now() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn key(id: &str) -> EntityKey {
    EntityKey::new("estimate", id)
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_create_updates_cache() {
    let (coordinator, transport, cache) = setup(VersionedStore::new());

    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Create,
        json!({"paxCount": 2}),
        None,
    );
    assert_eq!(coordinator.pending_changes(), 1);

    let report = coordinator.perform_sync().await;

    assert!(report.is_success());
    assert_eq!(report.push.succeeded, 1);
    assert_eq!(coordinator.pending_changes(), 0);

    let cached = cache.get_cached_item(&key("e-1")).unwrap();
    assert_eq!(cached.version, 1);
    assert_eq!(cached.data, json!({"paxCount": 2}));
    assert_eq!(transport.store.lock().get("estimate", "e-1").unwrap().version, 1);
}

#[tokio::test]
async fn push_delete_evicts_from_cache() {
    let mut store = VersionedStore::new();
    let entity = store.create("estimate", "e-1", json!({"a": 1}), 500).unwrap();
    let (coordinator, _transport, cache) = setup(store);
    cache.update_cached_item(entity, now());

    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Delete,
        Value::Null,
        Some(1),
    );
    let report = coordinator.perform_sync().await;

    assert!(report.is_success());
    assert!(cache.get_cached_item(&key("e-1")).is_none());
}

#[tokio::test]
async fn item_error_is_dropped_not_requeued() {
    let (coordinator, _transport, _cache) = setup(VersionedStore::new());

    coordinator.queue_change(
        "estimate",
        "missing",
        ChangeAction::Update,
        json!({"a": 1}),
        Some(1),
    );
    let report = coordinator.perform_sync().await;

    assert!(report.is_success());
    assert_eq!(report.push.failed, 1);
    assert_eq!(coordinator.pending_changes(), 0);
}

#[tokio::test]
async fn batch_is_bounded() {
    let config = SyncConfig {
        batch_size: 2,
        ..config()
    };
    let (coordinator, transport, _cache) = setup_with(VersionedStore::new(), config, Schema::new());

    for i in 0..5 {
        coordinator.queue_change(
            "estimate",
            format!("e-{}", i),
            ChangeAction::Create,
            json!({}),
            None,
        );
    }
    coordinator.perform_sync().await;

    assert_eq!(transport.pushed_batches()[0].len(), 2);
    assert_eq!(coordinator.pending_changes(), 3);
}

#[tokio::test]
async fn failed_batch_is_sent_first_next_cycle() {
    let (coordinator, transport, _cache) = setup(VersionedStore::new());

    let first: Vec<ChangeId> = (0..3)
        .map(|i| {
            coordinator.queue_change(
                "estimate",
                format!("e-{}", i),
                ChangeAction::Create,
                json!({"n": i}),
                None,
            )
        })
        .collect();

    transport.set_failing(true);
    let failed = coordinator.perform_sync().await;
    assert!(failed.is_failure());
    assert_eq!(coordinator.pending_changes(), 3);

    let later = coordinator.queue_change("estimate", "e-9", ChangeAction::Create, json!({}), None);

    transport.set_failing(false);
    let report = coordinator.perform_sync().await;
    assert!(report.is_success());

    let batches = transport.pushed_batches();
    let mut expected = first.clone();
    expected.push(later);
    assert_eq!(batches.last().unwrap(), &expected);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn version_conflict_is_merged_and_resubmitted() {
    let schema = Schema::new().with_entity(EntitySchema::new(
        "estimate",
        vec![
            FieldDef::scalar("clientName"),
            FieldDef::scalar("paxCount"),
            FieldDef::keyed_list("services", "id"),
        ],
    ));
    let mut store = VersionedStore::new();
    let base = store
        .create(
            "estimate",
            "e-1",
            json!({"clientName": "A", "paxCount": 2, "services": [{"id": 1, "v": "x"}]}),
            500,
        )
        .unwrap();
    let (coordinator, transport, cache) = setup_with(store, config(), schema);
    cache.update_cached_item(base, now());

    transport.server_update(
        "estimate",
        "e-1",
        json!({"clientName": "A", "paxCount": 6, "services": [{"id": 1, "v": "y"}]}),
        1,
    );
    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({
            "clientName": "B",
            "paxCount": 2,
            "services": [{"id": 1, "v": "x"}, {"id": 2, "v": "new"}]
        }),
        Some(1),
    );

    let report = coordinator.perform_sync().await;

    assert!(report.is_success());
    assert_eq!(
        report.push.resolutions,
        vec![(key("e-1"), Resolution::Merged { version: 3 })]
    );

    let expected = json!({
        "clientName": "B",
        "paxCount": 6,
        "services": [{"id": 1, "v": "y"}, {"id": 2, "v": "new"}]
    });
    let cached = cache.get_cached_item(&key("e-1")).unwrap();
    assert_eq!(cached.version, 3);
    assert_eq!(cached.data, expected);
    assert_eq!(transport.store.lock().get("estimate", "e-1").unwrap().data, expected);
}

#[tokio::test]
async fn merge_uses_snapshot_from_when_change_was_queued() {
    let config = SyncConfig {
        batch_size: 1,
        ..config()
    };
    let mut store = VersionedStore::new();
    let base = store.create("estimate", "e-1", json!({"a": 1, "b": 1}), 500).unwrap();
    let (coordinator, transport, cache) = setup_with(store, config, Schema::new());
    cache.update_cached_item(base, now());

    coordinator.queue_change("estimate", "e-2", ChangeAction::Create, json!({}), None);
    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({"a": 2, "b": 1}),
        Some(1),
    );
    transport.server_update("estimate", "e-1", json!({"a": 1, "b": 5}), 1);

    // Pushes e-2 and pulls the other client's v2 into the cache
    let first = coordinator.perform_sync().await;
    assert!(first.is_success());
    assert_eq!(cache.get_cached_item(&key("e-1")).unwrap().version, 2);

    let second = coordinator.perform_sync().await;
    assert_eq!(
        second.push.resolutions,
        vec![(key("e-1"), Resolution::Merged { version: 3 })]
    );
    let stored = transport.store.lock().get("estimate", "e-1").unwrap().data.clone();
    assert_eq!(stored, json!({"a": 2, "b": 5}));
}

#[tokio::test]
async fn refreshed_cache_is_not_used_as_merge_base() {
    let config = SyncConfig {
        batch_size: 1,
        ..config()
    };
    let mut store = VersionedStore::new();
    store.create("estimate", "e-1", json!({"a": 1, "b": 1}), 500).unwrap();
    let (coordinator, transport, cache) = setup_with(store, config, Schema::new());

    // Nothing cached when the edit is queued, so no base is kept
    coordinator.queue_change("estimate", "e-2", ChangeAction::Create, json!({}), None);
    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({"a": 2, "b": 1}),
        Some(1),
    );
    let server = transport.server_update("estimate", "e-1", json!({"a": 1, "b": 5}), 1);

    coordinator.perform_sync().await;
    assert_eq!(cache.get_cached_item(&key("e-1")), Some(server.clone()));

    let report = coordinator.perform_sync().await;
    assert_eq!(
        report.push.resolutions,
        vec![(key("e-1"), Resolution::AcceptedServer)]
    );
    assert_eq!(transport.store.lock().get("estimate", "e-1"), Some(&server));
}

#[tokio::test]
async fn version_conflict_without_base_accepts_server() {
    let mut store = VersionedStore::new();
    store.create("estimate", "e-1", json!({"a": 1}), 500).unwrap();
    let (coordinator, transport, cache) = setup(store);
    let server = transport.server_update("estimate", "e-1", json!({"a": 5}), 1);

    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({"a": 2}),
        Some(1),
    );
    let report = coordinator.perform_sync().await;

    assert_eq!(
        report.push.resolutions,
        vec![(key("e-1"), Resolution::AcceptedServer)]
    );
    assert_eq!(cache.get_cached_item(&key("e-1")), Some(server));
}

#[tokio::test]
async fn failed_resubmission_falls_back_to_server() {
    let mut store = VersionedStore::new();
    let base = store.create("estimate", "e-1", json!({"a": 1, "b": 1}), 500).unwrap();
    let (coordinator, transport, cache) = setup(store);
    cache.update_cached_item(base, now());
    let server = transport.server_update("estimate", "e-1", json!({"a": 1, "b": 2}), 1);

    // The resubmission races a third writer
    struct RacingTransport {
        inner: Arc<StoreTransport>,
    }

    #[async_trait]
    impl Transport for RacingTransport {
        async fn get(
            &self,
            path: &str,
            query: &[(&'static str, String)],
        ) -> Result<ApiResponse, TransportError> {
            self.inner.get(path, query).await
        }

        async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
            self.inner.post(path, body).await
        }

        async fn put(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
            self.inner.server_update("estimate", "e-1", json!({"a": 1, "b": 3}), 2);
            self.inner.put(path, body).await
        }
    }

    let racing = SyncCoordinator::new(
        config(),
        Arc::new(RacingTransport {
            inner: transport.clone(),
        }),
        cache.clone(),
    );
    drop(coordinator);

    racing.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({"a": 9, "b": 1}),
        Some(1),
    );
    let report = racing.perform_sync().await;

    assert_eq!(
        report.push.resolutions,
        vec![(key("e-1"), Resolution::AcceptedServer)]
    );
    // The fallback writes the state carried by the original conflict; the
    // pull phase then brings in the racing write
    let cached = cache.get_cached_item(&key("e-1")).unwrap();
    assert!(cached.version > server.version);
    assert_eq!(cached.data, json!({"a": 1, "b": 3}));
}

#[tokio::test]
async fn delete_conflict_evicts() {
    let mut store = VersionedStore::new();
    let entity = store.create("estimate", "e-1", json!({"a": 1}), 500).unwrap();
    store.delete("estimate", "e-1", 1, 600).unwrap();
    let (coordinator, _transport, cache) = setup(store);
    cache.update_cached_item(entity, now());

    coordinator.queue_change(
        "estimate",
        "e-1",
        ChangeAction::Update,
        json!({"a": 2}),
        Some(1),
    );
    let report = coordinator.perform_sync().await;

    assert_eq!(report.push.resolutions, vec![(key("e-1"), Resolution::Evicted)]);
    assert!(cache.get_cached_item(&key("e-1")).is_none());
    assert_eq!(coordinator.pending_changes(), 0);
}

#[tokio::test]
async fn permission_conflict_leaves_cache_untouched() {
    let mut store = VersionedStore::new().with_read_only(["user_settings"]);
    let entity = VersionedEntity::new("user_settings", "theme", json!({"v": "light"}), 500);
    store.insert(entity.clone());
    let (coordinator, _transport, cache) = setup(store);
    cache.update_cached_item(entity.clone(), now());

    coordinator.queue_change(
        "user_settings",
        "theme",
        ChangeAction::Update,
        json!({"v": "dark"}),
        Some(1),
    );
    let report = coordinator.perform_sync().await;

    assert_eq!(
        report.push.resolutions,
        vec![(entity.key(), Resolution::Discarded)]
    );
    assert_eq!(cache.get_cached_item(&entity.key()), Some(entity));
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn pull_follows_pages_and_stores_cursor() {
    let mut store = VersionedStore::new();
    for i in 0..250u64 {
        store
            .create("estimate", &format!("e-{:03}", i), json!({"n": i}), 100 + i)
            .unwrap();
    }
    let config = SyncConfig {
        pull_limit: 100,
        ..config()
    };
    let (coordinator, transport, cache) = setup_with(store, config, Schema::new());

    let report = coordinator.perform_sync().await;

    assert!(report.is_success());
    assert_eq!(report.pull.inserted, 250);
    assert_eq!(cache.len(), 250);
    assert_eq!(transport.calls(), 3);

    let cursor = coordinator.metadata().cursor.unwrap();
    assert_eq!(cursor.entity_id, "e-249");

    let again = coordinator.perform_sync().await;
    assert_eq!(again.pull.total(), 0);
}

#[tokio::test]
async fn pull_applies_server_updates_and_tombstones() {
    let mut store = VersionedStore::new();
    store.create("estimate", "e-1", json!({"a": 1}), 100).unwrap();
    store.create("estimate", "e-2", json!({"a": 1}), 100).unwrap();
    let (coordinator, transport, cache) = setup(store);

    coordinator.perform_sync().await;
    assert_eq!(cache.len(), 2);

    transport.server_update("estimate", "e-1", json!({"a": 2}), 1);
    let at = transport.tick();
    transport.store.lock().delete("estimate", "e-2", 1, at).unwrap();

    let report = coordinator.perform_sync().await;

    assert_eq!(report.pull.updated, 1);
    assert_eq!(report.pull.removed, 1);
    assert_eq!(cache.get_cached_item(&key("e-1")).unwrap().data, json!({"a": 2}));
    assert!(cache.get_cached_item(&key("e-2")).is_none());
}

// ============================================================================
// Single flight, metadata and full sync
// ============================================================================

#[tokio::test]
async fn concurrent_trigger_is_a_no_op() {
    let (coordinator, transport, _cache) = setup(VersionedStore::new());
    coordinator.queue_change("estimate", "e-1", ChangeAction::Create, json!({}), None);
    coordinator.queue_change("estimate", "e-2", ChangeAction::Create, json!({}), None);
    transport.set_delay(Duration::from_millis(200));

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.perform_sync().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.is_syncing());

    let calls_before = transport.calls();
    let pending_before = coordinator.pending_changes();

    let second = coordinator.perform_sync().await;

    assert!(second.skipped);
    assert_eq!(transport.calls(), calls_before);
    assert_eq!(coordinator.pending_changes(), pending_before);

    let first = running.await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.push.succeeded, 2);
    assert!(!coordinator.is_syncing());
}

#[tokio::test]
async fn metadata_written_on_success_and_failure() {
    let (coordinator, transport, _cache) = setup(VersionedStore::new());
    assert_eq!(coordinator.metadata().status, SyncStatus::Never);

    let ok = coordinator.perform_sync().await;
    assert!(ok.is_success());
    let meta = coordinator.metadata();
    assert_eq!(meta.status, SyncStatus::Success);
    assert!(meta.last_sync_at.is_some());

    transport.set_failing(true);
    let failed = coordinator.manual_sync().await;
    assert!(failed.is_failure());

    let meta = coordinator.metadata();
    assert_eq!(meta.status, SyncStatus::Error);
    assert!(meta.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn timeout_fails_the_cycle() {
    let config = SyncConfig {
        request_timeout: Duration::from_millis(20),
        ..config()
    };
    let (coordinator, transport, _cache) = setup_with(VersionedStore::new(), config, Schema::new());
    coordinator.queue_change("estimate", "e-1", ChangeAction::Create, json!({}), None);
    transport.set_delay(Duration::from_millis(200));

    let report = coordinator.perform_sync().await;

    assert!(report.is_failure());
    assert!(report.error.unwrap().contains("timed out"));
    assert_eq!(coordinator.pending_changes(), 1);
}

#[tokio::test]
async fn full_sync_replaces_cache_and_keeps_settings() {
    let mut store = VersionedStore::new();
    for i in 0..7 {
        store
            .create("estimate", &format!("e-{}", i), json!({"n": i}), 100)
            .unwrap();
    }
    store.delete("estimate", "e-6", 1, 200).unwrap();
    let config = SyncConfig {
        page_size: 3,
        entity_types: vec!["estimate".into()],
        ..config()
    };
    let (coordinator, _transport, cache) = setup_with(store, config, Schema::new());

    let stale = VersionedEntity::new("estimate", "gone", json!({}), 50);
    let setting = VersionedEntity::new("user_settings", "theme", json!({"v": "dark"}), 50);
    cache.update_cached_item(stale.clone(), now());
    cache.update_cached_item(setting.clone(), now());

    let report = coordinator.manual_full_sync().await.unwrap();

    assert_eq!(report.loaded, 6);
    assert_eq!(report.pages, 2);
    assert!(cache.get_cached_item(&stale.key()).is_none());
    assert_eq!(cache.get_cached_item(&setting.key()), Some(setting));
    assert_eq!(cache.count("estimate"), 6);
}

#[tokio::test]
async fn full_sync_surfaces_errors() {
    let (coordinator, transport, _cache) = setup(VersionedStore::new());
    transport.set_failing(true);

    let err = coordinator.perform_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::FullSync(_)));

    // The periodic cycle swallows the same failure
    let report = coordinator.perform_sync().await;
    assert!(report.is_failure());
}

#[tokio::test]
async fn full_sync_while_syncing_is_busy() {
    let (coordinator, transport, _cache) = setup(VersionedStore::new());
    transport.set_delay(Duration::from_millis(200));

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.perform_sync().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = coordinator.perform_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Busy));
    assert!(running.await.unwrap().is_success());
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test]
async fn start_runs_a_cycle_immediately() {
    let (coordinator, _transport, cache) = setup(VersionedStore::new());
    coordinator.queue_change("estimate", "e-1", ChangeAction::Create, json!({}), None);

    let handle = coordinator.start();
    for _ in 0..50 {
        if coordinator.metadata().status != SyncStatus::Never {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert_eq!(coordinator.metadata().status, SyncStatus::Success);
    assert!(cache.get_cached_item(&key("e-1")).is_some());
}

#[tokio::test]
async fn stop_lets_in_flight_cycle_finish() {
    let (coordinator, transport, cache) = setup(VersionedStore::new());
    coordinator.queue_change("estimate", "e-1", ChangeAction::Create, json!({}), None);
    transport.set_delay(Duration::from_millis(200));

    let handle = coordinator.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.is_syncing());

    handle.shutdown().await;

    assert!(!coordinator.is_syncing());
    assert_eq!(coordinator.metadata().status, SyncStatus::Success);
    assert!(cache.get_cached_item(&key("e-1")).is_some());
}

#[tokio::test]
async fn stopped_scheduler_runs_no_more_cycles() {
    let config = SyncConfig {
        sync_interval: Duration::from_millis(20),
        ..config()
    };
    let (coordinator, transport, _cache) = setup_with(VersionedStore::new(), config, Schema::new());

    let handle = coordinator.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator.stop();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(handle.is_finished());

    let calls = transport.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), calls);
}
