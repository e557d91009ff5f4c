//! End-to-end reconciliation against the in-process server, on every backend

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use taskline_core::storage::FileFormat;
use taskline_core::{
    Config, InMemoryItemApi, Item, LocalStore, PatchOutcome, ReconciliationStore, RetryPolicy,
    StorageKind, SyncGateway, SyncState, SyncStatus,
};

fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        min_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        factor: 2.0,
        jitter: 0.0,
        max_attempts,
    }
}

fn config_for(dir: &TempDir, storage: StorageKind, file_format: FileFormat) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        storage,
        file_format,
        ..Config::default()
    }
}

fn open_store(config: &Config, api: &Arc<InMemoryItemApi>) -> ReconciliationStore {
    let local = LocalStore::open_with_config(config).unwrap();
    let state = SyncState::with_path(config.sync_state_path()).unwrap();
    let gateway = SyncGateway::new(api.clone(), quick_policy(3));
    ReconciliationStore::new(local, state, Arc::new(gateway))
}

fn all_backends() -> Vec<(StorageKind, FileFormat)> {
    vec![
        (StorageKind::File, FileFormat::Json),
        (StorageKind::File, FileFormat::Csv),
        (StorageKind::Object, FileFormat::Json),
        (StorageKind::Sqlite, FileFormat::Json),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_offline_edits_survive_restart_and_converge() {
    for (storage, format) in all_backends() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, storage, format);
        let api = Arc::new(InMemoryItemApi::new());

        {
            let store = open_store(&config, &api);
            api.set_offline(true);
            store.add(Item::with_id("a", "written offline")).await.unwrap();
            store.add(Item::with_id("b", "also offline")).await.unwrap();
            assert_eq!(store.status().await, SyncStatus::Dirty, "{}", storage);
            store.flush().await.unwrap();
        }

        let store = open_store(&config, &api);
        assert_eq!(store.status().await, SyncStatus::Dirty, "{}", storage);
        assert_eq!(store.items().await.len(), 2, "{}", storage);

        api.set_offline(false);
        store.add(Item::with_id("c", "back online")).await.unwrap();

        assert_eq!(store.status().await, SyncStatus::Clean, "{}", storage);
        let remote: Vec<_> = api.items().into_iter().map(|i| i.id).collect();
        assert_eq!(remote, vec!["a", "b", "c"], "{}", storage);
    }
}

#[tokio::test(start_paused = true)]
async fn test_write_recovers_from_concurrent_revision_bump() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, StorageKind::Sqlite, FileFormat::Json);
    let api = Arc::new(InMemoryItemApi::new().at_revision(5));
    let store = open_store(&config, &api);

    store.load().await.unwrap();
    assert_eq!(store.gateway().revision().await, 5);

    // Another client writes twice
    api.bump_revision(2);

    assert!(store.add(Item::with_id("x", "after bump")).await.unwrap());
    assert_eq!(store.status().await, SyncStatus::Clean);
    assert_eq!(store.gateway().revision().await, 8);
    assert_eq!(api.items().len(), 1);

    let writes: Vec<_> = api
        .calls()
        .into_iter()
        .filter(|c| c.op == "create_item")
        .map(|c| c.revision)
        .collect();
    assert_eq!(writes, vec![5, 7]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_is_tried_a_bounded_number_of_times() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, StorageKind::Object, FileFormat::Json);
    let api = Arc::new(InMemoryItemApi::new());
    let store = open_store(&config, &api);

    api.set_offline(true);
    store.add(Item::with_id("1", "lonely")).await.unwrap();

    assert_eq!(api.call_count(), 3);
    assert_eq!(store.status().await, SyncStatus::Dirty);
    assert_eq!(store.get("1").await.map(|i| i.text), Some("lonely".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_load_adopts_server_list_on_every_backend() {
    for (storage, format) in all_backends() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, storage, format);
        let server = vec![
            Item::with_id("s1", "first").completed(true),
            Item::with_id("s2", "second"),
        ];
        let api = Arc::new(InMemoryItemApi::new().with_items(server.clone()));

        {
            let store = open_store(&config, &api);
            assert_eq!(store.load().await.unwrap(), SyncStatus::Clean);
            store.flush().await.unwrap();
        }

        let store = open_store(&config, &api);
        assert_eq!(store.items().await, server, "{}", storage);
        assert_eq!(store.completed_count().await, 1, "{}", storage);
        assert!(store.last_synced_at().await.is_some(), "{}", storage);
    }
}

#[tokio::test(start_paused = true)]
async fn test_manual_patch_after_outage() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, StorageKind::File, FileFormat::Json);
    let api = Arc::new(InMemoryItemApi::new());
    let store = open_store(&config, &api);

    store.add(Item::with_id("1", "synced")).await.unwrap();
    api.set_offline(true);
    store.delete("1").await.unwrap();
    store.add(Item::with_id("2", "pending")).await.unwrap();
    assert_eq!(store.patch().await.unwrap(), PatchOutcome::Failed);

    api.set_offline(false);
    assert_eq!(store.patch().await.unwrap(), PatchOutcome::Patched);
    assert_eq!(store.patch().await.unwrap(), PatchOutcome::NotNeeded);

    // A patch only merges; the delete made offline is not replayed
    let remote: Vec<_> = api.items().into_iter().map(|i| i.id).collect();
    assert_eq!(remote, vec!["1", "2"]);
    let local: Vec<_> = store.items().await.into_iter().map(|i| i.id).collect();
    assert_eq!(local, vec!["1", "2"]);
}
