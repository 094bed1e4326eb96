mod test_utils;

use std::sync::Arc;

use repo_tracker::repositories::{ConnectionRepository, SnapshotRepository};
use repo_tracker::snapshot::{AttributeValue, RepositorySnapshot};
use repo_tracker::workflow::{ConnectionRegistry, SnapshotStore};
use test_utils::{setup_test_db_arc, snapshot};

#[tokio::test]
async fn snapshot_repository_upserts_and_reads_items() {
    let db = setup_test_db_arc().await.unwrap();
    let store = SnapshotRepository::new(db);

    let first = snapshot("acme/widget", "2024-01-01T00:00:00Z");
    store
        .upsert(&first.full_name, &first.to_item().unwrap())
        .await
        .unwrap();

    let mut second = first.clone();
    second.stars = 501;
    second.last_updated = "2024-02-01T00:00:00Z".to_string();
    store
        .upsert(&second.full_name, &second.to_item().unwrap())
        .await
        .unwrap();

    let items = store.list_all().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["stars"], AttributeValue::N("501".to_string()));

    let stored = store.get("acme/widget").await.unwrap().unwrap();
    assert_eq!(RepositorySnapshot::from_item(&stored).unwrap(), second);
    assert!(store.get("acme/other").await.unwrap().is_none());
}

#[tokio::test]
async fn snapshot_repository_remove_reports_presence() {
    let db = setup_test_db_arc().await.unwrap();
    let store = SnapshotRepository::new(db);
    let item = snapshot("acme/widget", "2024-01-01T00:00:00Z")
        .to_item()
        .unwrap();
    store.upsert("acme/widget", &item).await.unwrap();

    assert!(store.remove("acme/widget").await.unwrap());
    assert!(!store.remove("acme/widget").await.unwrap());
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn connection_repository_filters_and_purges_expired() {
    let db = setup_test_db_arc().await.unwrap();
    let registry = ConnectionRepository::new(Arc::clone(&db));
    let now = 1_700_000_000;

    registry.save("live", now + 3600).await.unwrap();
    registry.save("edge", now).await.unwrap();
    registry.save("stale", now - 1).await.unwrap();

    let active = registry.list_active(now).await.unwrap();
    let ids: Vec<_> = active.iter().map(|c| c.connection_id.as_str()).collect();
    assert_eq!(ids, vec!["live"]);

    assert_eq!(registry.purge_expired(now).await.unwrap(), 2);
    assert_eq!(registry.purge_expired(now).await.unwrap(), 0);
    assert_eq!(registry.list_active(now - 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn connection_repository_save_refreshes_expiry_and_delete_is_idempotent() {
    let db = setup_test_db_arc().await.unwrap();
    let registry = ConnectionRepository::new(db);
    let now = 1_700_000_000;

    registry.save("conn", now - 5).await.unwrap();
    assert!(registry.list_active(now).await.unwrap().is_empty());

    registry.save("conn", now + 60).await.unwrap();
    let active = registry.list_active(now).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].expires_at, now + 60);

    registry.delete("conn").await.unwrap();
    registry.delete("conn").await.unwrap();
    assert!(registry.list_active(now).await.unwrap().is_empty());
}
