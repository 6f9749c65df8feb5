//! Connection task.
//!
//! One task per client owns the physical connection and serializes every
//! state change: owner commands, inbound frames, the reconnect timer and the
//! heartbeat timers are multiplexed through a single biased `select!`. Each
//! inbound frame is fully dispatched before the next one is read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    CLIENT_RESET, Connection, Connector, NORMAL_CLOSURE, TransportFrame, endpoint_with_token,
    redacted,
};
use crate::auth::{AuthCoordinator, AuthDecision, TokenProvider};
use crate::backoff::BackoffPolicy;
use crate::client::Shared;
use crate::config::RealtimeConfig;
use crate::dispatcher::{EventDispatcher, Routed};
use crate::error::{AuthError, RealtimeError, TransportError};
use crate::protocol::{OutboundFrame, ServerError, parse_frame};
use crate::registry::SubscriptionId;
use crate::state::{ConnectionEvent, ConnectionState, ConnectionStatus};

/// Requests from the client handle to the connection task.
pub(crate) enum Command {
    Connect {
        token: Option<String>,
        reply: oneshot::Sender<ConnectionState>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<ConnectionState>,
    },
    /// A subscription was added to the registry.
    Subscribed(SubscriptionId),
    /// A subscription was removed from the registry.
    Unsubscribed(SubscriptionId),
    /// Frames were queued; send them if the connection is open.
    Flush,
    /// Result of a background token refresh.
    TokenRefreshed(Result<String, AuthError>),
    /// Result of the token fetch started by `connect` or `reconnect`.
    InitialToken {
        fetch: u64,
        result: Result<String, AuthError>,
    },
}

/// Timing and endpoint settings resolved from [`RealtimeConfig`].
pub(crate) struct ManagerSettings {
    pub endpoint: Url,
    pub token_param: String,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval: Duration,
    pub stale_after: Option<Duration>,
}

impl ManagerSettings {
    pub(crate) fn from_config(config: &RealtimeConfig, endpoint: Url) -> Self {
        Self {
            endpoint,
            token_param: config.token_query_param.clone(),
            connect_timeout: config.connect_timeout(),
            backoff: config.reconnect.policy(),
            heartbeat_interval: config.heartbeat.interval(),
            stale_after: config.heartbeat.stale_after(),
        }
    }
}

pub(crate) struct TransportManager {
    settings: ManagerSettings,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    dispatcher: EventDispatcher,
    auth: AuthCoordinator,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::WeakUnboundedSender<Command>,
    conn: Option<Box<dyn Connection>>,
    retry_at: Option<Instant>,
    ping_at: Option<Instant>,
    stale_at: Option<Instant>,
    /// Incremented on every `welcome`.
    session: u64,
    welcomed: bool,
    /// Initial token fetch the next connect attempt waits for.
    awaiting_token: Option<u64>,
    token_fetches: u64,
    pending_connects: Vec<oneshot::Sender<ConnectionState>>,
}

impl TransportManager {
    pub(crate) fn new(
        settings: ManagerSettings,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        auth: AuthCoordinator,
        commands: mpsc::UnboundedReceiver<Command>,
        command_tx: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            settings,
            connector,
            dispatcher: EventDispatcher::new(Arc::clone(&shared)),
            shared,
            auth,
            commands,
            command_tx,
            conn: None,
            retry_at: None,
            ping_at: None,
            stale_at: None,
            session: 0,
            welcomed: false,
            awaiting_token: None,
            token_fetches: 0,
            pending_connects: Vec::new(),
        }
    }

    /// Run until every client handle has been dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                frame = recv_frame(&mut self.conn) => self.handle_frame(frame).await,
                _ = sleep_until_opt(self.retry_at) => self.on_retry_due().await,
                _ = sleep_until_opt(self.ping_at) => self.on_ping_due().await,
                _ = sleep_until_opt(self.stale_at) => self.on_stale().await,
            }
        }

        if let Some(mut conn) = self.conn.take() {
            conn.close(NORMAL_CLOSURE).await;
        }
        debug!("Realtime connection task stopped");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { token, reply } => {
                if let Some(token) = token {
                    self.auth.set_token(token);
                }
                match self.state() {
                    ConnectionState::Connected | ConnectionState::Failed => {
                        let _ = reply.send(self.state());
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {
                        self.pending_connects.push(reply);
                    }
                    ConnectionState::Disconnected => {
                        self.pending_connects.push(reply);
                        self.auth.reset();
                        self.apply(ConnectionEvent::Connect);
                        self.start_connect().await;
                    }
                }
            }
            Command::Disconnect { reply } => {
                self.shutdown_link().await;
                let previous = self.state();
                self.apply(ConnectionEvent::Disconnect);
                if previous != ConnectionState::Disconnected {
                    info!("Realtime connection closed by owner");
                    self.notify(ConnectionStatus::Disconnected);
                }
                self.resolve_pending();
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                info!("Manual reconnect requested");
                self.shutdown_link().await;
                self.set_attempts(0);
                self.auth.reset();
                self.apply(ConnectionEvent::ManualReconnect);
                self.pending_connects.push(reply);
                self.start_connect().await;
            }
            Command::Subscribed(id) => {
                if self.welcomed {
                    let pending = self.shared.registry.read().pending_entry(&id, self.session);
                    if let Some(filter) = pending {
                        let frame = OutboundFrame::subscription(&id, &filter);
                        if self.send_frame(&frame).await {
                            self.shared.registry.write().mark_sent(&id, self.session);
                        }
                    }
                }
            }
            Command::Unsubscribed(id) => {
                if self.state().is_connected() {
                    self.send_frame(&OutboundFrame::unsubscribe(&id)).await;
                }
            }
            Command::Flush => {
                if self.state().is_connected() {
                    self.flush_queue().await;
                }
            }
            Command::TokenRefreshed(Ok(token)) => {
                if matches!(
                    self.state(),
                    ConnectionState::Disconnected | ConnectionState::Failed
                ) {
                    debug!("Discarding refreshed token, connection no longer active");
                    self.auth.set_token(token);
                    return;
                }
                info!(failures = self.auth.failures(), "Token refreshed, reconnecting");
                self.auth.set_token(token);
                if let Some(mut conn) = self.conn.take() {
                    conn.close(CLIENT_RESET).await;
                }
                self.clear_link_timers();
                self.retry_at = None;
                self.apply(ConnectionEvent::Reauthenticate);
                self.attempt_connect().await;
            }
            Command::TokenRefreshed(Err(e)) => {
                if matches!(
                    self.state(),
                    ConnectionState::Disconnected | ConnectionState::Failed
                ) {
                    debug!(error = %e, "Ignoring token refresh failure, connection no longer active");
                    return;
                }
                self.give_up_auth(e).await;
            }
            Command::InitialToken { fetch, result } => {
                if self.awaiting_token != Some(fetch) {
                    debug!(fetch, "Discarding superseded token fetch");
                    return;
                }
                self.awaiting_token = None;
                match result {
                    Ok(token) => self.auth.set_token(token),
                    Err(e) => warn!(error = %e, "Initial token fetch failed, connecting without token"),
                }
                self.attempt_connect().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Connect now, or first fetch a token in the background when none has
    /// been supplied and a provider is available.
    async fn start_connect(&mut self) {
        let provider = if self.auth.token().is_none() {
            self.auth.provider()
        } else {
            None
        };
        let Some(provider) = provider else {
            self.attempt_connect().await;
            return;
        };
        self.token_fetches += 1;
        let fetch = self.token_fetches;
        self.awaiting_token = Some(fetch);
        debug!(fetch, "Fetching initial token");
        self.spawn_token_fetch(provider, move |result| Command::InitialToken { fetch, result });
    }

    /// Run `fetch_token` off the connection task, bounded by the connect
    /// timeout, and feed the result back as a command.
    fn spawn_token_fetch<F>(&self, provider: Arc<dyn TokenProvider>, into_command: F)
    where
        F: FnOnce(Result<String, AuthError>) -> Command + Send + 'static,
    {
        let Some(tx) = self.command_tx.upgrade() else {
            return;
        };
        let limit = self.settings.connect_timeout;
        tokio::spawn(async move {
            let result = match timeout(limit, provider.fetch_token()).await {
                Ok(result) => result,
                Err(_) => Err(AuthError::provider(format!(
                    "token fetch timed out after {}ms",
                    limit.as_millis()
                ))),
            };
            let _ = tx.send(into_command(result));
        });
    }

    async fn attempt_connect(&mut self) {
        let url = endpoint_with_token(
            &self.settings.endpoint,
            &self.settings.token_param,
            self.auth.token(),
        );
        let endpoint = redacted(&url);
        debug!(endpoint = %endpoint, attempt = self.attempts(), "Connecting");

        let result = match timeout(self.settings.connect_timeout, self.connector.connect(&url)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout_ms: self.settings.connect_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(conn) => self.on_open(conn).await,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Connect failed");
                self.apply(ConnectionEvent::ConnectFailed);
                self.notify(ConnectionStatus::Error);
                self.schedule_retry();
            }
        }
        self.resolve_pending();
    }

    async fn on_open(&mut self, conn: Box<dyn Connection>) {
        self.conn = Some(conn);
        self.retry_at = None;
        self.set_attempts(0);
        self.apply(ConnectionEvent::Opened);
        let now = Instant::now();
        self.ping_at = Some(now + self.settings.heartbeat_interval);
        self.stale_at = self.settings.stale_after.map(|d| now + d);
        info!(endpoint = %self.settings.endpoint, "Realtime connection established");

        self.flush_queue().await;
        if self.state().is_connected() {
            self.notify(ConnectionStatus::Connected);
        }
    }

    /// Move to Reconnecting's retry timer, or to Failed when out of attempts.
    fn schedule_retry(&mut self) {
        let attempts = self.attempts();
        if self.settings.backoff.is_exhausted(attempts) {
            self.apply(ConnectionEvent::AttemptsExhausted);
            self.retry_at = None;
            let err = RealtimeError::CapacityExceeded { attempts };
            error!(error = %err, category = err.category(), "Giving up on reconnecting");
            self.notify(ConnectionStatus::Failed);
            return;
        }
        let attempt = attempts + 1;
        self.set_attempts(attempt);
        let delay = self.settings.backoff.delay_for(attempt);
        self.retry_at = Some(Instant::now() + delay);
        info!(
            attempt,
            max_attempts = self.settings.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
    }

    async fn on_retry_due(&mut self) {
        self.retry_at = None;
        if self.apply(ConnectionEvent::BackoffElapsed) != ConnectionState::Connecting {
            return;
        }
        self.attempt_connect().await;
    }

    /// Socket went away without the owner asking for it.
    async fn on_link_lost(&mut self, code: Option<u16>) {
        let normal = code == Some(NORMAL_CLOSURE);
        self.drop_link();
        self.apply(ConnectionEvent::Closed { normal });
        self.notify(ConnectionStatus::Disconnected);
        if normal {
            info!("Server closed connection normally");
        } else {
            warn!(code = ?code, "Connection lost");
            self.schedule_retry();
        }
    }

    /// Close the current socket with a normal code and cancel timers.
    async fn shutdown_link(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close(NORMAL_CLOSURE).await;
        }
        self.drop_link();
        self.retry_at = None;
        self.awaiting_token = None;
    }

    fn drop_link(&mut self) {
        self.conn = None;
        self.welcomed = false;
        self.clear_link_timers();
        self.shared.link.write().session_id = None;
    }

    fn clear_link_timers(&mut self) {
        self.ping_at = None;
        self.stale_at = None;
    }

    async fn give_up_auth(&mut self, err: AuthError) {
        error!(error = %err, "Authentication failed, giving up");
        self.shutdown_link().await;
        self.apply(ConnectionEvent::Disconnect);
        self.notify(ConnectionStatus::AuthFailed);
        self.resolve_pending();
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: Option<Result<TransportFrame, TransportError>>) {
        if let Some(stale_after) = self.settings.stale_after {
            self.stale_at = Some(Instant::now() + stale_after);
        }
        match frame {
            Some(Ok(TransportFrame::Text(text))) => self.handle_text(&text).await,
            Some(Ok(TransportFrame::Heartbeat)) => {}
            Some(Ok(TransportFrame::Close(code))) => self.on_link_lost(code).await,
            Some(Err(e)) => {
                warn!(error = %e, "Receive failed");
                if let Some(mut conn) = self.conn.take() {
                    conn.close(CLIENT_RESET).await;
                }
                self.on_link_lost(None).await;
            }
            None => self.on_link_lost(None).await,
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match parse_frame(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        let session_id = self.shared.link.read().session_id.clone();
        match self.dispatcher.route(&message, session_id.as_deref()) {
            Routed::Delivered => {}
            Routed::Welcome(client_id) => {
                self.on_welcome(client_id).await;
                self.dispatcher.notify(&message);
            }
            Routed::AuthRejected(error) => self.on_auth_rejected(&error).await,
        }
    }

    async fn on_welcome(&mut self, client_id: String) {
        self.session += 1;
        self.welcomed = true;
        self.auth.reset();
        info!(client_id = %client_id, session = self.session, "Session established");
        self.shared.link.write().session_id = Some(client_id);

        let pending = self.shared.registry.read().pending_for(self.session);
        for info in pending {
            let frame = OutboundFrame::subscription(&info.id, &info.filter);
            if !self.send_frame(&frame).await {
                return;
            }
            debug!(subscription_id = %info.id, "Subscription issued");
            self.shared.registry.write().mark_sent(&info.id, self.session);
        }
    }

    async fn on_auth_rejected(&mut self, error: &ServerError) {
        match self.auth.on_rejected(error) {
            AuthDecision::Refresh(provider) => {
                warn!(failures = self.auth.failures(), "Refreshing token");
                self.spawn_token_fetch(provider, Command::TokenRefreshed);
            }
            AuthDecision::GiveUp(err) => self.give_up_auth(err).await,
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send every queued frame in order. On failure the unsent remainder goes
    /// back to the head of the queue and the link is treated as lost.
    async fn flush_queue(&mut self) {
        let frames = self.shared.queue.lock().drain();
        if frames.is_empty() {
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            self.shared.queue.lock().requeue_front(frames);
            return;
        };
        let total = frames.len();
        let mut iter = frames.into_iter();
        while let Some(frame) = iter.next() {
            let result = conn.send(frame.clone()).await;
            if let Err(e) = result {
                warn!(error = %e, "Flush interrupted");
                let mut rest = vec![frame];
                rest.extend(iter);
                self.shared.queue.lock().requeue_front(rest);
                self.on_link_lost(None).await;
                return;
            }
        }
        debug!(count = total, "Outbound queue flushed");
    }

    /// Send a control frame on the open socket. Returns false if the link was lost.
    async fn send_frame(&mut self, frame: &OutboundFrame) -> bool {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, kind = %frame.kind, "Failed to encode frame");
                return true;
            }
        };
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        let result = conn.send(text).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, kind = %frame.kind, "Send failed");
                self.on_link_lost(None).await;
                false
            }
        }
    }

    async fn on_ping_due(&mut self) {
        self.ping_at = Some(Instant::now() + self.settings.heartbeat_interval);
        debug!("Sending heartbeat ping");
        self.send_frame(&OutboundFrame::ping()).await;
    }

    async fn on_stale(&mut self) {
        warn!(
            stale_after_ms = self.settings.stale_after.map(|d| d.as_millis() as u64),
            "No traffic within liveness window, dropping connection"
        );
        if let Some(mut conn) = self.conn.take() {
            conn.close(CLIENT_RESET).await;
        }
        self.on_link_lost(None).await;
    }

    // ------------------------------------------------------------------
    // Shared state helpers
    // ------------------------------------------------------------------

    fn state(&self) -> ConnectionState {
        self.shared.link.read().state
    }

    fn attempts(&self) -> u32 {
        self.shared.link.read().reconnect_attempts
    }

    fn set_attempts(&self, attempts: u32) {
        self.shared.link.write().reconnect_attempts = attempts;
    }

    /// Apply a state-machine event, returning the resulting state.
    fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let mut link = self.shared.link.write();
        match link.state.transition(event) {
            Some(next) => {
                if next != link.state {
                    debug!(from = %link.state, to = %next, event = ?event, "Connection state changed");
                }
                link.state = next;
            }
            None => debug!(state = %link.state, event = ?event, "Ignoring event"),
        }
        link.state
    }

    fn notify(&self, status: ConnectionStatus) {
        self.shared.listeners.emit_status(status);
    }

    fn resolve_pending(&mut self) {
        let state = self.state();
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(state);
        }
    }
}

async fn recv_frame(
    conn: &mut Option<Box<dyn Connection>>,
) -> Option<Result<TransportFrame, TransportError>> {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
