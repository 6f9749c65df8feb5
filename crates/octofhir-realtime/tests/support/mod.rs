//! In-memory server side for driving `RealtimeClient` in tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use octofhir_realtime::{
    Connection, Connector, ConnectionStatus, InboundKind, InboundMessage, RealtimeClient,
    RealtimeConfig, ResourceUpdateEvent, TransportError, TransportFrame,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use url::Url;

const WAIT: Duration = Duration::from_secs(120);

struct Inner {
    accept: AtomicBool,
    connects: Mutex<Vec<(Instant, Url)>>,
    closes: Mutex<Vec<u16>>,
    sessions: mpsc::UnboundedSender<ServerConn>,
}

/// Connector handing every accepted connection to the test as a [`ServerConn`].
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerConn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                accept: AtomicBool::new(true),
                connects: Mutex::new(Vec::new()),
                closes: Mutex::new(Vec::new()),
                sessions: tx,
            }),
        };
        (connector, rx)
    }

    pub fn set_accept(&self, accept: bool) {
        self.inner.accept.store(accept, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.lock().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.inner.connects.lock().iter().map(|(t, _)| *t).collect()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.inner.connects.lock().iter().map(|(_, u)| u.clone()).collect()
    }

    /// Close codes sent by the client, in order.
    pub fn close_codes(&self) -> Vec<u16> {
        self.inner.closes.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        self.inner
            .connects
            .lock()
            .push((Instant::now(), url.clone()));
        if !self.inner.accept.load(Ordering::SeqCst) {
            return Err(TransportError::connect(url.as_str(), "connection refused"));
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.inner.sessions.send(ServerConn {
            tx: to_client,
            rx: from_client,
            url: url.clone(),
        });
        Ok(Box::new(MockConnection {
            inbound,
            outbound,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<TransportFrame>,
    outbound: mpsc::UnboundedSender<String>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::send("server side dropped"))
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16) {
        self.inner.closes.lock().push(code);
    }
}

/// Server end of one accepted connection.
pub struct ServerConn {
    tx: mpsc::UnboundedSender<TransportFrame>,
    rx: mpsc::UnboundedReceiver<String>,
    pub url: Url,
}

impl ServerConn {
    pub fn send_json(&self, value: Value) {
        let _ = self.tx.send(TransportFrame::Text(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.send(TransportFrame::Text(text.to_string()));
    }

    pub fn welcome(&self, client_id: &str) {
        self.send_json(json!({"type": "welcome", "data": {"client_id": client_id}}));
    }

    pub fn auth_failed(&self) {
        self.send_json(json!({"type": "error", "data": {"error": "AUTH_FAILED"}}));
    }

    pub fn update(&self, event_type: &str, patient_id: &str, resource: Value) {
        self.send_json(json!({
            "type": "update",
            "data": {
                "event_type": event_type,
                "patient_id": patient_id,
                "resource_type": resource["resourceType"],
                "resource": resource,
            }
        }));
    }

    pub fn update_from(&self, origin: &str, patient_id: &str, resource: Value) {
        self.send_json(json!({
            "type": "update",
            "data": {
                "event_type": "updated",
                "patient_id": patient_id,
                "resource_type": resource["resourceType"],
                "resource": resource,
                "origin": origin,
            }
        }));
    }

    pub fn delete(&self, patient_id: &str, resource_type: &str, resource_id: &str) {
        self.send_json(json!({
            "type": "update",
            "data": {
                "event_type": "deleted",
                "patient_id": patient_id,
                "resource_type": resource_type,
                "resource_id": resource_id,
            }
        }));
    }

    pub fn close(&self, code: u16) {
        let _ = self.tx.send(TransportFrame::Close(Some(code)));
    }

    /// Next frame the client sent on this connection.
    pub async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client connection dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        frames
    }
}

pub async fn next_conn(rx: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig::with_endpoint("ws://realtime.test/ws")
}

pub fn client_with(
    config: RealtimeConfig,
    connector: &MockConnector,
) -> RealtimeClient {
    RealtimeClient::builder(config)
        .connector(Arc::new(connector.clone()))
        .build()
        .expect("client builds")
}

/// Record every connection status notification.
pub fn record_statuses(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionStatus>>> {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = statuses.clone();
    let _handle = client.on_connection_change(move |status| s.lock().push(status));
    statuses
}

/// Channel receiving every dispatched update after the cache and handlers ran.
pub fn dispatched_updates(
    client: &RealtimeClient,
) -> mpsc::UnboundedReceiver<ResourceUpdateEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _handle = client.on_message(InboundKind::Update, move |msg: &InboundMessage| {
        if let InboundMessage::Update(event) = msg {
            let _ = tx.send(event.clone());
        }
    });
    rx
}

pub async fn next_update(
    rx: &mut mpsc::UnboundedReceiver<ResourceUpdateEvent>,
) -> ResourceUpdateEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("listener dropped")
}

/// Wait (in virtual time) until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn frames_of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == kind).collect()
}
