//! Session handle.
//!
//! A [`RealtimeClient`] is constructed once per session and passed by
//! reference (or cheap clone) to every consumer. It owns one background
//! connection task; all handles talk to it over a command channel. The task
//! stops when the last handle is dropped.

use std::sync::Arc;

use octofhir_core::{EventBroadcaster, ResourceUpdateEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::auth::{AuthCoordinator, TokenProvider};
use crate::cache::{CacheOutcome, EchoPolicy, ResourceCache};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::listeners::{ListenerHandle, Listeners};
use crate::protocol::{InboundKind, InboundMessage, OutboundFrame};
use crate::queue::OutboundQueue;
use crate::registry::{
    SubscriptionFilter, SubscriptionId, SubscriptionInfo, SubscriptionRegistry, UpdateHandler,
};
use crate::state::{ConnectionSnapshot, ConnectionState, ConnectionStatus};
use crate::transport::manager::{Command, ManagerSettings, TransportManager};
use crate::transport::{Connector, WsConnector};

/// Link status mirrored by the connection task for synchronous reads.
#[derive(Debug)]
pub(crate) struct LinkStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub session_id: Option<String>,
}

/// State shared between client handles and the connection task.
pub(crate) struct Shared {
    pub link: RwLock<LinkStatus>,
    pub queue: Mutex<OutboundQueue>,
    pub registry: RwLock<SubscriptionRegistry>,
    pub cache: ResourceCache,
    pub listeners: Arc<Listeners>,
    pub updates: EventBroadcaster,
}

impl Shared {
    pub(crate) fn new(echo_policy: EchoPolicy, broadcast_capacity: usize) -> Self {
        Self {
            link: RwLock::new(LinkStatus {
                state: ConnectionState::Disconnected,
                reconnect_attempts: 0,
                session_id: None,
            }),
            queue: Mutex::new(OutboundQueue::new()),
            registry: RwLock::new(SubscriptionRegistry::new()),
            cache: ResourceCache::new(echo_policy),
            listeners: Listeners::new(),
            updates: EventBroadcaster::with_capacity(broadcast_capacity),
        }
    }
}

/// Builder for [`RealtimeClient`].
pub struct RealtimeClientBuilder {
    config: RealtimeConfig,
    connector: Option<Arc<dyn Connector>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl RealtimeClientBuilder {
    /// Replace the default WebSocket connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Provider consulted when the server rejects the current token.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Validate the configuration and spawn the connection task.
    ///
    /// Must be called from within a Tokio runtime. The client starts
    /// `Disconnected`; call [`RealtimeClient::connect`] to open the link.
    pub fn build(self) -> RealtimeResult<RealtimeClient> {
        self.config.validate()?;
        let endpoint = self.config.endpoint_url()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RealtimeError::Runtime(e.to_string()))?;

        let shared = Arc::new(Shared::new(
            self.config.cache.echo_policy,
            self.config.cache.broadcast_capacity,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = TransportManager::new(
            ManagerSettings::from_config(&self.config, endpoint),
            self.connector.unwrap_or_else(|| Arc::new(WsConnector::new())),
            Arc::clone(&shared),
            AuthCoordinator::new(self.token_provider, self.config.auth.max_retries),
            rx,
            tx.downgrade(),
        );
        runtime.spawn(manager.run());

        Ok(RealtimeClient {
            shared,
            commands: tx,
        })
    }
}

/// Handle to one realtime session.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl RealtimeClient {
    pub fn builder(config: RealtimeConfig) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            config,
            connector: None,
            token_provider: None,
        }
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("Realtime connection task has stopped");
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Open the connection, optionally with a bearer token.
    ///
    /// Resolves once the socket is open or the first attempt has failed and a
    /// retry has been scheduled. Returns the resulting state.
    pub async fn connect(&self, token: Option<String>) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { token, reply });
        rx.await.unwrap_or_else(|_| self.state())
    }

    /// Close with a normal-closure code and stop reconnecting.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply });
        let _ = rx.await;
    }

    /// Reset the attempt counter and connect immediately.
    ///
    /// This is the only way out of [`ConnectionState::Failed`].
    pub async fn reconnect(&self) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Reconnect { reply });
        rx.await.unwrap_or_else(|_| self.state())
    }

    fn state(&self) -> ConnectionState {
        self.shared.link.read().state
    }

    pub fn connection_state(&self) -> ConnectionSnapshot {
        let link = self.shared.link.read();
        ConnectionSnapshot {
            state: link.state,
            is_connected: link.state.is_connected(),
            reconnect_attempts: link.reconnect_attempts,
            queued_messages: self.shared.queue.lock().len(),
            session_id: link.session_id.clone(),
        }
    }

    pub fn on_connection_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.shared.listeners.add_connection(Arc::new(listener))
    }

    pub fn on_message<F>(&self, kind: InboundKind, listener: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.listeners.add_message(kind, Arc::new(listener))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send an application frame. Never blocks: the frame is queued and
    /// flushed in order once the connection is open.
    pub fn publish(&self, event_type: &str, data: Value) {
        let frame = match OutboundFrame::custom(event_type, data).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event_type, error = %e, "Failed to encode outbound frame");
                return;
            }
        };
        self.shared.queue.lock().push(frame);
        self.command(Command::Flush);
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe<H: UpdateHandler>(
        &self,
        filter: SubscriptionFilter,
        handler: H,
    ) -> SubscriptionId {
        let id = self.shared.registry.write().insert(filter, Arc::new(handler));
        debug!(subscription_id = %id, "Subscription registered");
        self.command(Command::Subscribed(id.clone()));
        id
    }

    pub fn subscribe_to_patient<T, H>(
        &self,
        patient_id: &str,
        resource_types: impl IntoIterator<Item = T>,
        handler: H,
    ) -> SubscriptionId
    where
        T: Into<String>,
        H: UpdateHandler,
    {
        self.subscribe(SubscriptionFilter::patient(patient_id, resource_types), handler)
    }

    pub fn subscribe_to_room<H: UpdateHandler>(&self, room: &str, handler: H) -> SubscriptionId {
        self.subscribe(SubscriptionFilter::room(room), handler)
    }

    pub fn subscribe_all<H: UpdateHandler>(&self, handler: H) -> SubscriptionId {
        self.subscribe(SubscriptionFilter::All, handler)
    }

    /// Remove a subscription. The server is told only while connected.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.shared.registry.write().remove(id);
        if removed {
            debug!(subscription_id = %id, "Subscription removed");
            self.command(Command::Unsubscribed(id.clone()));
        }
        removed
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.registry.read().infos()
    }

    pub fn find_subscriptions(&self, filter: &SubscriptionFilter) -> Vec<SubscriptionId> {
        self.shared.registry.read().find_by_filter(filter)
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    pub fn cache(&self) -> &ResourceCache {
        &self.shared.cache
    }

    /// Updates that changed the cache, in arrival order.
    pub fn updates(&self) -> broadcast::Receiver<ResourceUpdateEvent> {
        self.shared.updates.subscribe()
    }

    /// Record a write this client has just made.
    ///
    /// The event is tagged with the current session id (when it has none) so
    /// that the server's echo can be recognised under
    /// [`EchoPolicy::SuppressOwn`].
    pub fn apply_local_write(&self, mut event: ResourceUpdateEvent) -> CacheOutcome {
        if event.origin.is_none() {
            event.origin = self.shared.link.read().session_id.clone();
        }
        let outcome = self.shared.cache.apply(&event, None);
        if outcome.changed() {
            self.shared.updates.send(event);
        }
        outcome
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
