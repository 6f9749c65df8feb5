//! Connection state machine and the notifications it emits.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted. Only a manual reconnect leaves this state.
    Failed,
}

/// Input to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` called by the owner.
    Connect,
    /// Socket handshake completed.
    Opened,
    /// Handshake failed or timed out.
    ConnectFailed,
    /// Peer closed the socket. `normal` is true for close code 1000.
    Closed { normal: bool },
    /// Read/write error or liveness deadline missed.
    Error,
    /// Retry delay has elapsed.
    BackoffElapsed,
    /// Reconnect attempt budget is used up.
    AttemptsExhausted,
    /// `disconnect()` called by the owner.
    Disconnect,
    /// `reconnect()` called by the owner.
    ManualReconnect,
    /// Fresh credential obtained after an auth rejection.
    Reauthenticate,
}

impl ConnectionState {
    /// Apply `event`, returning the next state or `None` when the event is not
    /// valid in the current state.
    pub fn transition(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, event) {
            (_, E::Disconnect) => S::Disconnected,
            (_, E::ManualReconnect) => S::Connecting,

            (S::Disconnected, E::Connect) => S::Connecting,

            (S::Connecting, E::Opened) => S::Connected,
            (S::Connecting, E::ConnectFailed | E::Error | E::Closed { .. }) => S::Reconnecting,

            (S::Connected, E::Closed { normal: true }) => S::Disconnected,
            (S::Connected, E::Closed { normal: false } | E::Error) => S::Reconnecting,

            (S::Reconnecting, E::BackoffElapsed) => S::Connecting,
            (S::Reconnecting, E::AttemptsExhausted) => S::Failed,

            (S::Connecting | S::Connected | S::Reconnecting, E::Reauthenticate) => S::Connecting,

            _ => return None,
        };
        Some(next)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous notification delivered to connection-change listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
    Failed,
    AuthFailed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::AuthFailed => "auth_failed",
        }
    }

    /// Terminal notifications need the owner to act before traffic resumes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Failed | ConnectionStatus::AuthFailed)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the connection, as returned by
/// [`RealtimeClient::connection_state`](crate::RealtimeClient::connection_state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    pub queued_messages: usize,
    /// Client id assigned by the server in the last `welcome`.
    pub session_id: Option<String>,
}
