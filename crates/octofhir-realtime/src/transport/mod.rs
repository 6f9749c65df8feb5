//! Physical transport.
//!
//! The connection task talks to the network only through [`Connector`] and
//! [`Connection`], so tests can drive it with an in-memory implementation.
//! [`WsConnector`] is the production WebSocket implementation.

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

pub(crate) mod manager;
mod websocket;

pub use websocket::WsConnector;

/// Close code for an intentional shutdown. Suppresses reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code used when dropping a socket to re-authenticate or after a missed
/// liveness deadline.
pub const CLIENT_RESET: u16 = 4000;

/// Frame surfaced by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    /// Transport-level keepalive traffic. Only refreshes liveness.
    Heartbeat,
    /// Peer closed the connection with an optional close code.
    Close(Option<u16>),
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open physical connection.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the stream has ended.
    ///
    /// Must be cancel safe: the connection task polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>>;

    /// Close with the given code. Errors are ignored.
    async fn close(&mut self, code: u16);
}

/// Endpoint with the bearer token appended as a query parameter.
pub fn endpoint_with_token(endpoint: &Url, param: &str, token: Option<&str>) -> Url {
    let mut url = endpoint.clone();
    if let Some(token) = token {
        url.query_pairs_mut().append_pair(param, token);
    }
    url
}

/// Endpoint rendered for logs, without query string.
pub fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
