mod support;

use octofhir_realtime::{
    CacheOutcome, CollectionKey, EchoPolicy, ResourceUpdateEvent, UpdateAction,
};
use serde_json::json;
use support::*;

#[tokio::test(start_paused = true)]
async fn created_then_deleted_leaves_no_entry() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.update(
        "created",
        "p1",
        json!({"resourceType": "Condition", "id": "c1", "code": "I10"}),
    );
    conn.delete("p1", "Condition", "c1");
    next_update(&mut dispatched).await;
    let deleted = next_update(&mut dispatched).await;
    assert_eq!(deleted.action, UpdateAction::Deleted);

    let key = CollectionKey::patient("p1", "Condition");
    assert!(!client.cache().contains(&key, "c1"));
    assert!(client.cache().collection(&key).is_empty());
}

#[tokio::test(start_paused = true)]
async fn cache_is_maintained_without_subscribers() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.update(
        "created",
        "p1",
        json!({"resourceType": "Observation", "id": "o1", "value": 7}),
    );
    next_update(&mut dispatched).await;

    let cached = client
        .cache()
        .get(&CollectionKey::patient("p1", "Observation"), "o1")
        .unwrap();
    assert_eq!(cached["value"], 7);
}

#[tokio::test(start_paused = true)]
async fn identical_updates_are_broadcast_once() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);
    let mut changes = client.updates();

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    let snapshot = json!({"resourceType": "Condition", "id": "c1", "status": "active"});
    conn.update("updated", "p1", snapshot.clone());
    conn.update("updated", "p1", snapshot.clone());
    next_update(&mut dispatched).await;
    next_update(&mut dispatched).await;

    let key = CollectionKey::patient("p1", "Condition");
    assert_eq!(client.cache().len(), 1);
    assert_eq!(*client.cache().get(&key, "c1").unwrap(), snapshot);

    assert_eq!(changes.try_recv().unwrap().resource_id, "c1");
    assert!(changes.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn later_update_replaces_whole_snapshot() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.update(
        "created",
        "p1",
        json!({"resourceType": "Condition", "id": "c1", "note": "first", "severity": "mild"}),
    );
    conn.update(
        "updated",
        "p1",
        json!({"resourceType": "Condition", "id": "c1", "note": "second"}),
    );
    next_update(&mut dispatched).await;
    next_update(&mut dispatched).await;

    let cached = client
        .cache()
        .get(&CollectionKey::patient("p1", "Condition"), "c1")
        .unwrap();
    assert_eq!(cached["note"], "second");
    assert!(cached.get("severity").is_none());
}

#[tokio::test(start_paused = true)]
async fn own_echo_is_suppressed_when_configured() {
    let (connector, mut conns) = MockConnector::new();
    let mut config = test_config();
    config.cache.echo_policy = EchoPolicy::SuppressOwn;
    let client = client_with(config, &connector);
    let mut dispatched = dispatched_updates(&client);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.welcome("me");
    wait_until(|| client.connection_state().session_id.is_some()).await;

    let local = json!({"resourceType": "Condition", "id": "c1", "status": "active"});
    let outcome = client.apply_local_write(
        ResourceUpdateEvent::updated("Condition", "c1", local.clone()).with_patient("p1"),
    );
    assert_eq!(outcome, CacheOutcome::Inserted);

    // Server echo of our own write, decorated with server metadata.
    conn.update_from(
        "me",
        "p1",
        json!({"resourceType": "Condition", "id": "c1", "status": "active", "meta": {"versionId": "2"}}),
    );
    next_update(&mut dispatched).await;
    let key = CollectionKey::patient("p1", "Condition");
    assert_eq!(*client.cache().get(&key, "c1").unwrap(), local);

    // Someone else's write is applied.
    let theirs = json!({"resourceType": "Condition", "id": "c1", "status": "resolved"});
    conn.update_from("other", "p1", theirs.clone());
    next_update(&mut dispatched).await;
    assert_eq!(*client.cache().get(&key, "c1").unwrap(), theirs);
}

#[tokio::test(start_paused = true)]
async fn own_echo_is_applied_by_default() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.welcome("me");
    wait_until(|| client.connection_state().session_id.is_some()).await;

    client.apply_local_write(
        ResourceUpdateEvent::updated("Condition", "c1", json!({"id": "c1"})).with_patient("p1"),
    );
    let echoed = json!({"resourceType": "Condition", "id": "c1", "meta": {"versionId": "2"}});
    conn.update_from("me", "p1", echoed.clone());
    next_update(&mut dispatched).await;

    let key = CollectionKey::patient("p1", "Condition");
    assert_eq!(*client.cache().get(&key, "c1").unwrap(), echoed);
}

#[tokio::test(start_paused = true)]
async fn caller_owns_collection_lifetime() {
    let (connector, _conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let cache = client.cache();

    let key = CollectionKey::patient("p1", "Condition");
    let stored = cache.refresh(
        key.clone(),
        vec![json!({"id": "c1"}), json!({"id": "c2"})],
    );
    assert_eq!(stored, 2);
    cache.refresh(CollectionKey::patient("p1", "Observation"), vec![json!({"id": "o1"})]);
    cache.refresh(CollectionKey::patient("p2", "Condition"), vec![json!({"id": "c9"})]);
    assert_eq!(cache.len(), 4);

    assert_eq!(cache.invalidate_patient("p1"), 2);
    assert_eq!(cache.collection_keys(), vec![CollectionKey::patient("p2", "Condition")]);

    cache.clear();
    assert!(cache.is_empty());
}
