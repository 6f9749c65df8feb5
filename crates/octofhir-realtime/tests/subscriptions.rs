mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use octofhir_realtime::{ResourceUpdateEvent, SubscriptionFilter};
use serde_json::json;
use support::*;

fn counter() -> (Arc<AtomicUsize>, impl Fn(&ResourceUpdateEvent) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move |_: &ResourceUpdateEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test(start_paused = true)]
async fn patient_subscription_is_reissued_once_after_reconnect() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let id = client.subscribe_to_patient("p1", ["Condition"], |_: &ResourceUpdateEvent| {});
    let expected = json!({
        "type": "subscription",
        "data": {
            "subscription_id": id.as_str(),
            "patient_ids": ["p1"],
            "resource_types": ["Condition"]
        }
    });

    client.connect(None).await;
    let mut conn1 = next_conn(&mut conns).await;
    conn1.welcome("client-1");
    assert_eq!(conn1.next_frame().await, expected);

    conn1.close(1006);
    let mut conn2 = next_conn(&mut conns).await;
    conn2.welcome("client-2");
    assert_eq!(conn2.next_frame().await, expected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(frames_of_type(&conn2.drain_frames(), "subscription").is_empty());
    assert!(frames_of_type(&conn1.drain_frames(), "subscription").is_empty());
    assert_eq!(
        client.connection_state().session_id.as_deref(),
        Some("client-2")
    );
}

#[tokio::test(start_paused = true)]
async fn nothing_is_subscribed_before_welcome() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);

    client.connect(None).await;
    let mut conn = next_conn(&mut conns).await;
    let id = client.subscribe_to_room("icu", |_: &ResourceUpdateEvent| {});

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(conn.drain_frames().is_empty());

    conn.welcome("client-1");
    assert_eq!(
        conn.next_frame().await,
        json!({"type": "subscription", "data": {"subscription_id": id.as_str(), "room": "icu"}})
    );
}

#[tokio::test(start_paused = true)]
async fn subscribe_and_unsubscribe_while_connected() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);

    client.connect(None).await;
    let mut conn = next_conn(&mut conns).await;
    conn.welcome("client-1");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let id = client.subscribe_all(|_: &ResourceUpdateEvent| {});
    let frame = conn.next_frame().await;
    assert_eq!(frame["type"], "subscription");
    assert_eq!(frame["data"]["subscription_id"], id.as_str());

    assert!(client.unsubscribe(&id));
    assert_eq!(
        conn.next_frame().await,
        json!({"type": "unsubscribe", "data": {"subscription_id": id.as_str()}})
    );
    assert!(!client.unsubscribe(&id));
    assert!(client.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_while_disconnected_is_local_only() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let id = client.subscribe_to_room("icu", |_: &ResourceUpdateEvent| {});
    assert!(client.unsubscribe(&id));

    client.connect(None).await;
    let mut conn = next_conn(&mut conns).await;
    conn.welcome("client-1");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(conn.drain_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn updates_fan_out_to_every_matching_subscription() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    let (patient_hits, patient) = counter();
    let (type_hits, by_type) = counter();
    let (other_hits, other_patient) = counter();
    let (room_hits, room) = counter();
    let (all_hits, all) = counter();
    client.subscribe_to_patient("p1", ["Condition"], patient);
    client.subscribe(SubscriptionFilter::resource_types(["Condition"]), by_type);
    client.subscribe_to_patient("p2", ["Condition"], other_patient);
    client.subscribe_to_room("icu", room);
    client.subscribe_all(all);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    conn.welcome("client-1");
    conn.update(
        "created",
        "p1",
        json!({"resourceType": "Condition", "id": "c1"}),
    );
    conn.send_json(json!({
        "type": "update",
        "data": {
            "event_type": "created",
            "resource_type": "Task",
            "room": "icu",
            "resource": {"resourceType": "Task", "id": "t1"}
        }
    }));
    next_update(&mut dispatched).await;
    next_update(&mut dispatched).await;

    assert_eq!(patient_hits.load(Ordering::SeqCst), 1);
    assert_eq!(type_hits.load(Ordering::SeqCst), 1);
    assert_eq!(other_hits.load(Ordering::SeqCst), 0);
    assert_eq!(room_hits.load(Ordering::SeqCst), 1);
    assert_eq!(all_hits.load(Ordering::SeqCst), 2);
}

fn exploding_handler(_: &ResourceUpdateEvent) {
    panic!("handler bug");
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_affect_others() {
    let (connector, mut conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);
    let mut dispatched = dispatched_updates(&client);

    client.subscribe_all(exploding_handler);
    let (hits, handler) = counter();
    client.subscribe_all(handler);

    client.connect(None).await;
    let conn = next_conn(&mut conns).await;
    for id in ["c1", "c2"] {
        conn.update(
            "created",
            "p1",
            json!({"resourceType": "Condition", "id": id}),
        );
    }
    next_update(&mut dispatched).await;
    next_update(&mut dispatched).await;

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(client.connection_state().is_connected);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_listed_and_found_by_filter() {
    let (connector, _conns) = MockConnector::new();
    let client = client_with(test_config(), &connector);

    let a = client.subscribe_to_patient("p1", ["Observation", "Condition"], |_: &ResourceUpdateEvent| {});
    let b = client.subscribe_to_room("icu", |_: &ResourceUpdateEvent| {});

    let listed: Vec<_> = client.subscriptions().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![a.clone(), b]);

    let filter = SubscriptionFilter::resources(["p1"], ["Condition", "Observation"]);
    assert_eq!(client.find_subscriptions(&filter), vec![a]);
}
